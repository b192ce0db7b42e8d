//! Device property characteristics.
//!
//! Each characteristic is a fixed-width little-endian scalar with a declared
//! valid range and, for most formats, a raw sentinel meaning "value is not
//! known". The sentinel decodes to [`CharacteristicValue::Unknown`], never to
//! a numeric zero. Raw values outside the declared range are rejected.

use bytes::BufMut;
use mesh_wire::WireError;
use std::fmt;

/// Decoded characteristic value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CharacteristicValue<T> {
    /// Value within the declared range
    Known(T),
    /// The sensor reported "value is not known"
    Unknown,
}

impl<T> CharacteristicValue<T> {
    /// The value, if known
    pub fn known(self) -> Option<T> {
        match self {
            CharacteristicValue::Known(v) => Some(v),
            CharacteristicValue::Unknown => None,
        }
    }

    /// Whether the sensor reported "value is not known"
    pub fn is_unknown(&self) -> bool {
        matches!(self, CharacteristicValue::Unknown)
    }
}

impl<T: fmt::Display> CharacteristicValue<T> {
    fn fmt_with_unit(&self, f: &mut fmt::Formatter<'_>, unit: &str) -> fmt::Result {
        match self {
            CharacteristicValue::Known(v) => write!(f, "{}{}", v, unit),
            CharacteristicValue::Unknown => f.write_str("unknown"),
        }
    }
}

/// Characteristic formats referenced by the known device properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicKind {
    /// uint8 percentage in 0.5 % steps, 0..=100 %
    Percentage8,
    /// uint16 count
    Count16,
    /// sint8 temperature in 0.5 °C steps
    Temperature8,
    /// uint24 illuminance in 0.01 lux steps
    Illuminance,
    /// Single octet boolean
    Boolean,
    /// uint16 time in seconds
    TimeSecond16,
}

const PERCENTAGE8_MAX: u8 = 200;
const PERCENTAGE8_UNKNOWN: u8 = 0xFF;
const COUNT16_UNKNOWN: u16 = 0xFFFF;
const TEMPERATURE8_UNKNOWN: i8 = 0x7F;
const ILLUMINANCE_UNKNOWN: u32 = 0x00FF_FFFF;
const TIME_SECOND16_UNKNOWN: u16 = 0xFFFF;

impl CharacteristicKind {
    /// Encoded width in octets
    pub const fn width(self) -> usize {
        match self {
            CharacteristicKind::Percentage8 => 1,
            CharacteristicKind::Count16 => 2,
            CharacteristicKind::Temperature8 => 1,
            CharacteristicKind::Illuminance => 3,
            CharacteristicKind::Boolean => 1,
            CharacteristicKind::TimeSecond16 => 2,
        }
    }

    /// Characteristic name
    pub fn name(self) -> &'static str {
        match self {
            CharacteristicKind::Percentage8 => "Percentage 8",
            CharacteristicKind::Count16 => "Count 16",
            CharacteristicKind::Temperature8 => "Temperature 8",
            CharacteristicKind::Illuminance => "Illuminance",
            CharacteristicKind::Boolean => "Boolean",
            CharacteristicKind::TimeSecond16 => "Time Second 16",
        }
    }

    /// Decode exactly [`width`](Self::width) octets
    pub fn decode(self, raw: &[u8]) -> Result<Characteristic, WireError> {
        if raw.len() != self.width() {
            return Err(WireError::MalformedPayload(format!(
                "{} needs {} bytes, got {}",
                self.name(),
                self.width(),
                raw.len()
            )));
        }

        let value = match self {
            CharacteristicKind::Percentage8 => Characteristic::Percentage8(match raw[0] {
                PERCENTAGE8_UNKNOWN => CharacteristicValue::Unknown,
                v if v <= PERCENTAGE8_MAX => CharacteristicValue::Known(v as f32 * 0.5),
                v => {
                    return Err(WireError::MalformedPayload(format!(
                        "Percentage 8 raw value {} outside 0..={}",
                        v, PERCENTAGE8_MAX
                    )))
                }
            }),
            CharacteristicKind::Count16 => {
                Characteristic::Count16(match u16::from_le_bytes([raw[0], raw[1]]) {
                    COUNT16_UNKNOWN => CharacteristicValue::Unknown,
                    v => CharacteristicValue::Known(v),
                })
            }
            CharacteristicKind::Temperature8 => {
                Characteristic::Temperature8(match raw[0] as i8 {
                    TEMPERATURE8_UNKNOWN => CharacteristicValue::Unknown,
                    v => CharacteristicValue::Known(v as f32 * 0.5),
                })
            }
            CharacteristicKind::Illuminance => {
                let v = u32::from_le_bytes([raw[0], raw[1], raw[2], 0]);
                Characteristic::Illuminance(if v == ILLUMINANCE_UNKNOWN {
                    CharacteristicValue::Unknown
                } else {
                    CharacteristicValue::Known(v as f32 / 100.0)
                })
            }
            CharacteristicKind::Boolean => Characteristic::Boolean(match raw[0] {
                0 => false,
                1 => true,
                v => {
                    return Err(WireError::MalformedPayload(format!(
                        "Boolean raw value {} is neither 0 nor 1",
                        v
                    )))
                }
            }),
            CharacteristicKind::TimeSecond16 => {
                Characteristic::TimeSecond16(match u16::from_le_bytes([raw[0], raw[1]]) {
                    TIME_SECOND16_UNKNOWN => CharacteristicValue::Unknown,
                    v => CharacteristicValue::Known(v),
                })
            }
        };
        Ok(value)
    }
}

/// A decoded characteristic
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Characteristic {
    /// Percent
    Percentage8(CharacteristicValue<f32>),
    /// Count
    Count16(CharacteristicValue<u16>),
    /// Degrees Celsius
    Temperature8(CharacteristicValue<f32>),
    /// Lux
    Illuminance(CharacteristicValue<f32>),
    /// Flag
    Boolean(bool),
    /// Seconds
    TimeSecond16(CharacteristicValue<u16>),
}

impl Characteristic {
    /// Format of this value
    pub fn kind(&self) -> CharacteristicKind {
        match self {
            Characteristic::Percentage8(_) => CharacteristicKind::Percentage8,
            Characteristic::Count16(_) => CharacteristicKind::Count16,
            Characteristic::Temperature8(_) => CharacteristicKind::Temperature8,
            Characteristic::Illuminance(_) => CharacteristicKind::Illuminance,
            Characteristic::Boolean(_) => CharacteristicKind::Boolean,
            Characteristic::TimeSecond16(_) => CharacteristicKind::TimeSecond16,
        }
    }

    /// Append the raw encoding. Known values are rounded to the nearest step
    /// and clamped to the declared range.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match *self {
            Characteristic::Percentage8(v) => buf.put_u8(match v {
                CharacteristicValue::Known(p) => (p * 2.0).round().clamp(0.0, 200.0) as u8,
                CharacteristicValue::Unknown => PERCENTAGE8_UNKNOWN,
            }),
            Characteristic::Count16(v) => buf.put_u16_le(match v {
                CharacteristicValue::Known(c) => c.min(COUNT16_UNKNOWN - 1),
                CharacteristicValue::Unknown => COUNT16_UNKNOWN,
            }),
            Characteristic::Temperature8(v) => buf.put_i8(match v {
                CharacteristicValue::Known(t) => (t * 2.0).round().clamp(-128.0, 126.0) as i8,
                CharacteristicValue::Unknown => TEMPERATURE8_UNKNOWN,
            }),
            Characteristic::Illuminance(v) => {
                let raw = match v {
                    CharacteristicValue::Known(lux) => (lux * 100.0)
                        .round()
                        .clamp(0.0, (ILLUMINANCE_UNKNOWN - 1) as f32)
                        as u32,
                    CharacteristicValue::Unknown => ILLUMINANCE_UNKNOWN,
                };
                buf.put_slice(&raw.to_le_bytes()[..3]);
            }
            Characteristic::Boolean(b) => buf.put_u8(b as u8),
            Characteristic::TimeSecond16(v) => buf.put_u16_le(match v {
                CharacteristicValue::Known(s) => s.min(TIME_SECOND16_UNKNOWN - 1),
                CharacteristicValue::Unknown => TIME_SECOND16_UNKNOWN,
            }),
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Characteristic::Percentage8(v) => v.fmt_with_unit(f, " %"),
            Characteristic::Count16(v) => v.fmt_with_unit(f, ""),
            Characteristic::Temperature8(v) => v.fmt_with_unit(f, " °C"),
            Characteristic::Illuminance(v) => v.fmt_with_unit(f, " lx"),
            Characteristic::Boolean(b) => write!(f, "{}", b),
            Characteristic::TimeSecond16(v) => v.fmt_with_unit(f, " s"),
        }
    }
}
