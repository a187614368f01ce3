//! Error types for Waygraph Core

use thiserror::Error;

/// Result type alias using Waygraph Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the graph storage engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from storage operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors for manifests, properties and config
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Address not covered by `ensure_capacity`
    #[error("Address out of range in '{store}': {address}+{len} exceeds capacity {capacity}")]
    OutOfRange {
        /// Logical store name
        store: String,
        /// Requested address
        address: u64,
        /// Number of bytes accessed
        len: usize,
        /// Current capacity in bytes
        capacity: u64,
    },

    /// Access to a store after `close`
    #[error("Store '{0}' is already closed")]
    Closed(String),

    /// A value does not fit into its fixed-point or bit-packed field
    #[error("Value too large: {0}")]
    ValueTooLarge(String),

    /// The edge exists but is not adjacent to the requested node
    #[error("Edge {edge} is not adjacent to node {node}")]
    NoSuchEdgeOrientation {
        /// Edge id
        edge: u32,
        /// Requested adjacent node
        node: u32,
    },

    /// Edge id beyond the edge table
    #[error("Edge {edge} out of bounds [0, {count})")]
    EdgeOutOfRange {
        /// Edge id
        edge: u32,
        /// Current edge count
        count: u32,
    },

    /// Node id beyond the node table
    #[error("Node {node} out of bounds [0, {count})")]
    NodeOutOfRange {
        /// Node id
        node: u32,
        /// Current node count
        count: u32,
    },

    /// A persisted version stamp disagrees with the running build
    #[error("Version mismatch for '{store}': expected {expected}, found {found}")]
    VersionMismatch {
        /// Store or component name
        store: String,
        /// Version this build writes
        expected: i64,
        /// Version found on disk
        found: i64,
    },

    /// A logical name was requested again with an incompatible configuration
    #[error("Incompatible request for store '{name}': {reason}")]
    IncompatibleType {
        /// Logical store name
        name: String,
        /// What differs from the earlier request
        reason: String,
    },

    /// Construction-time misconfiguration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Node or edge creation after the graph was frozen
    #[error("Graph is frozen: {0}")]
    Frozen(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Argument outside the domain of an operation (NaN, negative distance, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Advisory lock could not be obtained or released
    #[error("Lock error: {0}")]
    Lock(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a value-too-large error
    pub fn value_too_large(msg: impl Into<String>) -> Self {
        Self::ValueTooLarge(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a frozen-graph error
    pub fn frozen(msg: impl Into<String>) -> Self {
        Self::Frozen(msg.into())
    }

    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a lock error
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    /// Create a version mismatch error
    pub fn version_mismatch(store: impl Into<String>, expected: i64, found: i64) -> Self {
        Self::VersionMismatch {
            store: store.into(),
            expected,
            found,
        }
    }

    /// Whether the error leaves the owning store unusable.
    ///
    /// Closed stores and version mismatches cannot be recovered by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed(_) | Self::VersionMismatch { .. })
    }
}
