//! Register word decoding
//!
//! Pure conversions from raw 16-bit holding registers to typed field values.
//! Controllers report an unconnected sensor with a reserved raw value; those
//! decode to `None`, which is different from a decode failure.

use crate::error::{Result, TelemetryError};
use crate::model::{FieldMap, FieldValue};

/// Raw value reported for an unconnected sensor
pub const NO_DATA_VALUE: u16 = 32766;

/// Raw values at or above this are treated as "no data" for analog inputs
pub const NO_DATA_THRESHOLD: u16 = 32000;

pub fn signed16(v: u16) -> i64 {
    if v > 32767 {
        i64::from(v) - 65536
    } else {
        i64::from(v)
    }
}

/// Combine a low/high word pair into a signed 32-bit value
pub fn signed32(low: u16, high: u16) -> i64 {
    let combined = unsigned32(low, high);
    if combined > 0x7FFF_FFFF {
        combined - 0x1_0000_0000
    } else {
        combined
    }
}

pub fn unsigned32(low: u16, high: u16) -> i64 {
    i64::from(high) * 65536 + i64::from(low)
}

pub fn is_no_data(raw: u16) -> bool {
    raw == NO_DATA_VALUE || raw >= NO_DATA_THRESHOLD
}

/// Temperature sensors outside -50..=200 degC are wiring faults
pub fn is_bad_temperature(raw: u16) -> bool {
    let s = signed16(raw);
    is_no_data(raw) || s > 200 || s < -50
}

/// Load percentage, rejecting sentinels and values outside -50..=150
pub fn safe_load(raw: u16) -> Option<i64> {
    if is_no_data(raw) {
        return None;
    }
    let s = signed16(raw);
    if (-50..=150).contains(&s) {
        Some(s)
    } else {
        None
    }
}

/// Fixed decimal multiplier applied after sign conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Unit,
    Tenths,
    Hundredths,
    Thousandths,
}

impl Scale {
    pub fn apply(self, value: i64) -> FieldValue {
        match self {
            Scale::Unit => FieldValue::Int(value),
            Scale::Tenths => FieldValue::Float(value as f64 / 10.0),
            Scale::Hundredths => FieldValue::Float(value as f64 / 100.0),
            Scale::Thousandths => FieldValue::Float(value as f64 / 1000.0),
        }
    }
}

/// How a field is extracted from its block's words
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// One bit of the word
    Bit(u8),
    /// Unsigned word, scaled
    Unsigned(Scale),
    /// Two's-complement word, scaled
    Signed(Scale),
    /// Unsigned word with the no-data guard
    Guarded(Scale),
    /// Low word at the offset, high word after it
    Unsigned32(Scale),
    /// Low word at the offset, high word after it
    Signed32(Scale),
    /// Signed degrees, rejected outside the sensor range
    Temperature,
    /// Valid only while `raw < limit` and not the sentinel
    Below(u16, Scale),
    /// Valid only while `raw <= max` and not the sentinel
    AtMost(u16, Scale),
    /// Load percentage
    Load,
}

impl FieldKind {
    pub fn width(&self) -> usize {
        match self {
            FieldKind::Unsigned32(_) | FieldKind::Signed32(_) => 2,
            _ => 1,
        }
    }

    /// Decode from `words` starting at `offset`; the caller checks bounds
    fn decode(&self, words: &[u16], offset: usize) -> Option<FieldValue> {
        let raw = words[offset];
        match *self {
            FieldKind::Bit(bit) => Some(FieldValue::Bool(raw & (1 << bit) != 0)),
            FieldKind::Unsigned(scale) => Some(scale.apply(i64::from(raw))),
            FieldKind::Signed(scale) => Some(scale.apply(signed16(raw))),
            FieldKind::Guarded(scale) => {
                (!is_no_data(raw)).then(|| scale.apply(i64::from(raw)))
            },
            FieldKind::Unsigned32(scale) => {
                Some(scale.apply(unsigned32(raw, words[offset + 1])))
            },
            FieldKind::Signed32(scale) => Some(scale.apply(signed32(raw, words[offset + 1]))),
            FieldKind::Temperature => {
                (!is_bad_temperature(raw)).then(|| FieldValue::Int(signed16(raw)))
            },
            FieldKind::Below(limit, scale) => {
                (raw < limit && raw != NO_DATA_VALUE).then(|| scale.apply(i64::from(raw)))
            },
            FieldKind::AtMost(max, scale) => {
                (raw <= max && raw != NO_DATA_VALUE).then(|| scale.apply(i64::from(raw)))
            },
            FieldKind::Load => safe_load(raw).map(FieldValue::Int),
        }
    }
}

/// A named field at a word offset inside its block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: usize,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, offset: usize, kind: FieldKind) -> Self {
        Self { name, offset, kind }
    }
}

/// Contiguous holding registers read in one request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterBlock {
    pub name: &'static str,
    pub start: u16,
    pub count: u16,
    pub fields: &'static [FieldSpec],
}

impl RegisterBlock {
    /// Decode every field of the block into `out`.
    ///
    /// A block shorter than its declared fields fails as a whole and leaves
    /// `out` untouched.
    pub fn decode_into(&self, words: &[u16], out: &mut FieldMap) -> Result<()> {
        let needed = self
            .fields
            .iter()
            .map(|f| f.offset + f.kind.width())
            .max()
            .unwrap_or(0);
        if words.len() < needed {
            return Err(TelemetryError::decode(format!(
                "block {} needs {} registers, got {}",
                self.name,
                needed,
                words.len()
            )));
        }

        for field in self.fields {
            out.insert(
                field.name.to_string(),
                field.kind.decode(words, field.offset),
            );
        }
        Ok(())
    }
}
