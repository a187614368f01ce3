//! Bit-packed field descriptors
//!
//! Edge attributes (access, speed, road class, ...) are packed into a block of
//! `u32` words per edge. Which attributes exist is decided by the encoding
//! registry of the caller; this module only allocates bit ranges and reads and
//! writes values:
//!
//! ```text
//! bit 0          reverse bit (edge blocks only)
//! bits 1..       fields in registration order; two-directional fields take
//!                a forward range followed by a backward range
//! ```
//!
//! Turn-cost blocks use the same descriptors in a single word without a
//! reverse bit.

pub mod bits;

use crate::{Error, Result};
use std::fmt::Write as _;

/// Bit range(s) of one field inside a block
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    name: String,
    bits: u32,
    fwd: u32,
    bwd: Option<u32>,
}

impl Slot {
    fn offset(&self, reverse: bool) -> u32 {
        match (reverse, self.bwd) {
            (true, Some(bwd)) => bwd,
            _ => self.fwd,
        }
    }

    fn read(&self, words: &[u32], reverse: bool) -> u64 {
        bits::read_bits(words, self.offset(reverse), self.bits)
    }

    fn write(&self, words: &mut [u32], reverse: bool, raw: u64) {
        bits::write_bits(words, self.offset(reverse), self.bits, raw);
    }

    fn max_raw(&self) -> u64 {
        (1u64 << self.bits) - 1
    }
}

/// A typed value stored in a flag block
///
/// `reverse` selects the backward range of two-directional fields; for
/// one-directional fields both directions share the same bits.
pub trait EncodedField {
    /// Decoded value type
    type Value;

    /// Field name
    fn name(&self) -> &str;

    /// Whether forward and backward values are stored separately
    fn is_two_directional(&self) -> bool;

    /// Decode the value for the given direction
    fn read(&self, words: &[u32], reverse: bool) -> Self::Value;

    /// Encode a value for the given direction
    fn write(&self, words: &mut [u32], reverse: bool, value: Self::Value) -> Result<()>;
}

/// Single-bit boolean field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoolField {
    slot: Slot,
}

impl EncodedField for BoolField {
    type Value = bool;

    fn name(&self) -> &str {
        &self.slot.name
    }

    fn is_two_directional(&self) -> bool {
        self.slot.bwd.is_some()
    }

    fn read(&self, words: &[u32], reverse: bool) -> bool {
        self.slot.read(words, reverse) != 0
    }

    fn write(&self, words: &mut [u32], reverse: bool, value: bool) -> Result<()> {
        self.slot.write(words, reverse, value as u64);
        Ok(())
    }
}

/// Integer field, optionally signed (two's complement in `bits` bits)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntField {
    slot: Slot,
    signed: bool,
}

impl IntField {
    /// Smallest storable value
    pub fn min_value(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.slot.bits - 1))
        } else {
            0
        }
    }

    /// Largest storable value
    pub fn max_value(&self) -> i64 {
        if self.signed {
            (1i64 << (self.slot.bits - 1)) - 1
        } else {
            self.slot.max_raw() as i64
        }
    }
}

impl EncodedField for IntField {
    type Value = i64;

    fn name(&self) -> &str {
        &self.slot.name
    }

    fn is_two_directional(&self) -> bool {
        self.slot.bwd.is_some()
    }

    fn read(&self, words: &[u32], reverse: bool) -> i64 {
        let raw = self.slot.read(words, reverse);
        if self.signed {
            let shift = 64 - self.slot.bits;
            ((raw << shift) as i64) >> shift
        } else {
            raw as i64
        }
    }

    fn write(&self, words: &mut [u32], reverse: bool, value: i64) -> Result<()> {
        if value < self.min_value() || value > self.max_value() {
            return Err(Error::value_too_large(format!(
                "{} = {} outside [{}, {}]",
                self.slot.name,
                value,
                self.min_value(),
                self.max_value()
            )));
        }
        self.slot.write(words, reverse, value as u64);
        Ok(())
    }
}

/// Non-negative decimal stored as `round(value / factor)`
///
/// With `max_is_infinity` the largest raw value encodes `f64::INFINITY`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecimalField {
    slot: Slot,
    factor: f64,
    max_is_infinity: bool,
}

impl DecimalField {
    /// Scale between raw integers and values
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Largest finite storable value
    pub fn max_finite(&self) -> f64 {
        let max_raw = self.slot.max_raw() - self.max_is_infinity as u64;
        max_raw as f64 * self.factor
    }
}

impl EncodedField for DecimalField {
    type Value = f64;

    fn name(&self) -> &str {
        &self.slot.name
    }

    fn is_two_directional(&self) -> bool {
        self.slot.bwd.is_some()
    }

    fn read(&self, words: &[u32], reverse: bool) -> f64 {
        let raw = self.slot.read(words, reverse);
        if self.max_is_infinity && raw == self.slot.max_raw() {
            f64::INFINITY
        } else {
            raw as f64 * self.factor
        }
    }

    fn write(&self, words: &mut [u32], reverse: bool, value: f64) -> Result<()> {
        if value.is_nan() || value < 0.0 {
            return Err(Error::invalid_argument(format!(
                "{} = {} is not a non-negative number",
                self.slot.name, value
            )));
        }
        if value.is_infinite() {
            if !self.max_is_infinity {
                return Err(Error::value_too_large(format!(
                    "{} cannot store infinity",
                    self.slot.name
                )));
            }
            self.slot.write(words, reverse, self.slot.max_raw());
            return Ok(());
        }
        let raw = (value / self.factor).round();
        let max_raw = (self.slot.max_raw() - self.max_is_infinity as u64) as f64;
        if raw > max_raw {
            return Err(Error::value_too_large(format!(
                "{} = {} exceeds maximum {}",
                self.slot.name,
                value,
                self.max_finite()
            )));
        }
        self.slot.write(words, reverse, raw as u64);
        Ok(())
    }
}

/// Allocated layout of a flag block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    words: usize,
    bits_used: u32,
    has_reverse_bit: bool,
    description: String,
}

impl FieldLayout {
    /// Builder for edge flag blocks (bit 0 reserved for the reverse bit)
    pub fn builder() -> FieldLayoutBuilder {
        FieldLayoutBuilder {
            next_bit: 1,
            max_bits: None,
            has_reverse_bit: true,
            names: Vec::new(),
            description: String::new(),
        }
    }

    /// Builder for single-word turn-cost blocks
    pub fn turn_cost_builder() -> FieldLayoutBuilder {
        FieldLayoutBuilder {
            next_bit: 0,
            max_bits: Some(32),
            has_reverse_bit: false,
            names: Vec::new(),
            description: String::new(),
        }
    }

    /// Width of the block in `u32` words (at least one)
    pub fn words(&self) -> usize {
        self.words
    }

    /// Allocated bits including the reverse bit
    pub fn bits_used(&self) -> u32 {
        self.bits_used
    }

    /// Whether bit 0 is the reverse bit
    pub fn has_reverse_bit(&self) -> bool {
        self.has_reverse_bit
    }

    /// Stable textual form, used to detect layout changes between runs
    pub fn describe(&self) -> &str {
        &self.description
    }
}

/// Allocates bit ranges for fields
#[derive(Debug)]
pub struct FieldLayoutBuilder {
    next_bit: u32,
    max_bits: Option<u32>,
    has_reverse_bit: bool,
    names: Vec<String>,
    description: String,
}

impl FieldLayoutBuilder {
    fn allocate(&mut self, kind: &str, name: &str, bits: u32, two_directional: bool) -> Result<Slot> {
        if bits == 0 || bits > 32 {
            return Err(Error::invalid_config(format!(
                "field '{name}' must use 1..=32 bits, got {bits}"
            )));
        }
        if self.names.iter().any(|n| n == name) {
            return Err(Error::invalid_config(format!("field '{name}' registered twice")));
        }
        let total = if two_directional { 2 * bits } else { bits };
        if let Some(max) = self.max_bits {
            if self.next_bit + total > max {
                return Err(Error::invalid_config(format!(
                    "field '{name}' does not fit into {max} bits"
                )));
            }
        }
        let fwd = self.next_bit;
        let bwd = two_directional.then_some(fwd + bits);
        self.next_bit += total;
        self.names.push(name.to_string());
        let _ = write!(
            self.description,
            "{}{kind}:{name}:{bits}:{}",
            if self.description.is_empty() { "" } else { "|" },
            if two_directional { 2 } else { 1 }
        );
        Ok(Slot {
            name: name.to_string(),
            bits,
            fwd,
            bwd,
        })
    }

    /// Register a boolean field
    pub fn add_bool(&mut self, name: &str, two_directional: bool) -> Result<BoolField> {
        Ok(BoolField {
            slot: self.allocate("bool", name, 1, two_directional)?,
        })
    }

    /// Register an unsigned or signed integer field
    pub fn add_int(
        &mut self,
        name: &str,
        bits: u32,
        signed: bool,
        two_directional: bool,
    ) -> Result<IntField> {
        let kind = if signed { "sint" } else { "int" };
        Ok(IntField {
            slot: self.allocate(kind, name, bits, two_directional)?,
            signed,
        })
    }

    /// Register a decimal field
    pub fn add_decimal(
        &mut self,
        name: &str,
        bits: u32,
        factor: f64,
        max_is_infinity: bool,
        two_directional: bool,
    ) -> Result<DecimalField> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(Error::invalid_config(format!(
                "field '{name}' needs a positive factor, got {factor}"
            )));
        }
        let kind = format!("decimal({factor},{})", max_is_infinity as u8);
        Ok(DecimalField {
            slot: self.allocate(&kind, name, bits, two_directional)?,
            factor,
            max_is_infinity,
        })
    }

    /// Finish the layout
    pub fn build(self) -> FieldLayout {
        FieldLayout {
            words: (self.next_bit.div_ceil(32) as usize).max(1),
            bits_used: self.next_bit,
            has_reverse_bit: self.has_reverse_bit,
            description: self.description,
        }
    }
}
