//! Backend type selector

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which backend a store uses and whether it persists
///
/// Parsed from and printed as `RAM`, `RAM_STORE`, `MMAP`, `OFF_HEAP`,
/// `OFF_HEAP_STORE` and `OFF_HEAP_UNCHECKED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DaType {
    /// Heap memory, never persisted
    Ram,
    /// Heap memory, written to disk on flush
    RamStore,
    /// Memory-mapped file
    Mmap,
    /// Anonymous native memory, never persisted
    OffHeap,
    /// Anonymous native memory, written to disk on flush
    OffHeapStore,
    /// Like `OffHeapStore` without capacity checks on access
    OffHeapUnchecked,
}

impl DaType {
    /// Whether the store survives the process
    pub fn is_storing(self) -> bool {
        !matches!(self, DaType::Ram | DaType::OffHeap)
    }

    /// Whether bytes live in a file mapping
    pub fn is_mmap(self) -> bool {
        self == DaType::Mmap
    }

    /// Canonical configuration name
    pub fn as_str(self) -> &'static str {
        match self {
            DaType::Ram => "RAM",
            DaType::RamStore => "RAM_STORE",
            DaType::Mmap => "MMAP",
            DaType::OffHeap => "OFF_HEAP",
            DaType::OffHeapStore => "OFF_HEAP_STORE",
            DaType::OffHeapUnchecked => "OFF_HEAP_UNCHECKED",
        }
    }
}

impl fmt::Display for DaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "RAM" => Ok(DaType::Ram),
            "RAM_STORE" => Ok(DaType::RamStore),
            "MMAP" => Ok(DaType::Mmap),
            "OFF_HEAP" => Ok(DaType::OffHeap),
            "OFF_HEAP_STORE" => Ok(DaType::OffHeapStore),
            "OFF_HEAP_UNCHECKED" => Ok(DaType::OffHeapUnchecked),
            other => Err(Error::invalid_config(format!("unknown store type '{other}'"))),
        }
    }
}

impl TryFrom<String> for DaType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DaType> for String {
    fn from(value: DaType) -> Self {
        value.as_str().to_string()
    }
}
