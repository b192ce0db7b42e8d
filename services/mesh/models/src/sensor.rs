//! Sensor model messages.
//!
//! Status decoders take the parameter bytes of an access PDU (opcode already
//! split off). Truncated input is rejected with
//! [`WireError::MalformedPayload`]; properties without a known characteristic
//! keep their raw bytes.

use crate::characteristic::Characteristic;
use crate::property::DeviceProperty;
use crate::reader::{truncated, ParameterReader};
use bytes::{BufMut, Bytes, BytesMut};
use mesh_wire::{AccessPdu, Opcode, WireError};

/// Sensor Descriptor Get
pub const SENSOR_DESCRIPTOR_GET: Opcode = Opcode::sig(0x8230);
/// Sensor Descriptor Status
pub const SENSOR_DESCRIPTOR_STATUS: Opcode = Opcode::short(0x51);
/// Sensor Get
pub const SENSOR_GET: Opcode = Opcode::sig(0x8231);
/// Sensor Status
pub const SENSOR_STATUS: Opcode = Opcode::short(0x52);
/// Sensor Cadence Get
pub const SENSOR_CADENCE_GET: Opcode = Opcode::sig(0x8234);
/// Sensor Cadence Status
pub const SENSOR_CADENCE_STATUS: Opcode = Opcode::short(0x57);

/// Largest valid fast cadence period divisor exponent
pub const MAX_PERIOD_DIVISOR_EXPONENT: u8 = 15;
/// Largest valid status min interval exponent
pub const MAX_MIN_INTERVAL_EXPONENT: u8 = 26;

const PROPERTY_ID_LEN: usize = 2;
const DESCRIPTOR_LEN: usize = 8;
const PERCENT_DELTA_LEN: usize = 2;

/// Sensor Get, optionally narrowed to one property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorGet {
    /// Property to read; all properties when absent
    pub property: Option<DeviceProperty>,
}

impl SensorGet {
    /// Access PDU for this request
    pub fn to_access_pdu(&self) -> AccessPdu {
        let parameters = self
            .property
            .map(|p| p.to_le_bytes().to_vec())
            .unwrap_or_default();
        AccessPdu::new(SENSOR_GET, parameters)
    }
}

/// Sensor Cadence Get
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCadenceGet {
    /// Property whose cadence is requested
    pub property: DeviceProperty,
}

impl SensorCadenceGet {
    /// Access PDU for this request
    pub fn to_access_pdu(&self) -> AccessPdu {
        AccessPdu::new(SENSOR_CADENCE_GET, self.property.to_le_bytes().to_vec())
    }
}

/// Sensor Descriptor Get, optionally narrowed to one property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorDescriptorGet {
    /// Property to describe; all properties when absent
    pub property: Option<DeviceProperty>,
}

impl SensorDescriptorGet {
    /// Access PDU for this request
    pub fn to_access_pdu(&self) -> AccessPdu {
        let parameters = self
            .property
            .map(|p| p.to_le_bytes().to_vec())
            .unwrap_or_default();
        AccessPdu::new(SENSOR_DESCRIPTOR_GET, parameters)
    }
}

/// How status publication is triggered by value changes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusTrigger {
    /// Deltas in the property's own characteristic
    Value {
        /// Decrease that triggers a status
        down: Characteristic,
        /// Increase that triggers a status
        up: Characteristic,
    },
    /// Deltas in percent of the current value
    Percent {
        /// Decrease in percent
        down: f32,
        /// Increase in percent
        up: f32,
    },
}

/// Cadence state of one sensor property
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorCadence {
    /// Fast cadence divides the publish period by `2^n`
    pub fast_cadence_period_divisor: u8,
    /// Delta trigger
    pub trigger: StatusTrigger,
    /// Minimum interval between statuses is `2^n` milliseconds
    pub status_min_interval: u8,
    /// Lower bound of the fast cadence range
    pub fast_cadence_low: Characteristic,
    /// Upper bound of the fast cadence range
    pub fast_cadence_high: Characteristic,
}

impl SensorCadence {
    /// Publish period divisor
    pub fn period_divisor(&self) -> u32 {
        1 << self.fast_cadence_period_divisor
    }

    /// Minimum interval between statuses in milliseconds
    pub fn min_interval_ms(&self) -> u64 {
        1 << self.status_min_interval
    }
}

/// Sensor Cadence Status
#[derive(Debug, Clone, PartialEq)]
pub enum SensorCadenceStatus {
    /// Only the property id was sent: the property has no cadence state
    NotSet {
        /// Property
        property: DeviceProperty,
    },
    /// Cadence of a known property
    Cadence {
        /// Property
        property: DeviceProperty,
        /// Cadence state
        cadence: SensorCadence,
    },
    /// Cadence of a property whose characteristic is not known
    Unrecognized {
        /// Raw property id
        property_id: u16,
        /// Parameters after the property id
        raw: Bytes,
    },
}

impl SensorCadenceStatus {
    /// Property the status refers to
    pub fn property(&self) -> DeviceProperty {
        match self {
            SensorCadenceStatus::NotSet { property }
            | SensorCadenceStatus::Cadence { property, .. } => *property,
            SensorCadenceStatus::Unrecognized { property_id, .. } => {
                DeviceProperty::from_id(*property_id)
            }
        }
    }

    /// Decode Sensor Cadence Status parameters
    pub fn decode(parameters: &[u8]) -> Result<Self, WireError> {
        let mut reader = ParameterReader::new(parameters, "Sensor Cadence Status");
        let property = DeviceProperty::from_id(reader.u16_le()?);

        if reader.is_empty() {
            return Ok(SensorCadenceStatus::NotSet { property });
        }

        let Some(kind) = property.characteristic() else {
            return Ok(SensorCadenceStatus::Unrecognized {
                property_id: property.id(),
                raw: Bytes::copy_from_slice(reader.rest()),
            });
        };

        let octet = reader.u8()?;
        let divisor = octet & 0x7F;
        let percent_trigger = octet & 0x80 != 0;
        if divisor > MAX_PERIOD_DIVISOR_EXPONENT {
            return Err(WireError::MalformedPayload(format!(
                "fast cadence period divisor {} exceeds {}",
                divisor, MAX_PERIOD_DIVISOR_EXPONENT
            )));
        }

        let delta_len = if percent_trigger {
            PERCENT_DELTA_LEN
        } else {
            kind.width()
        };
        let needed = 2 * delta_len + 1 + 2 * kind.width();
        if reader.remaining() < needed {
            return Err(truncated(
                "Sensor Cadence Status",
                needed,
                reader.remaining(),
            ));
        }

        let trigger = if percent_trigger {
            StatusTrigger::Percent {
                down: reader.u16_le()? as f32 / 100.0,
                up: reader.u16_le()? as f32 / 100.0,
            }
        } else {
            StatusTrigger::Value {
                down: kind.decode(reader.take(delta_len)?)?,
                up: kind.decode(reader.take(delta_len)?)?,
            }
        };

        let status_min_interval = reader.u8()?;
        if status_min_interval > MAX_MIN_INTERVAL_EXPONENT {
            return Err(WireError::MalformedPayload(format!(
                "status min interval {} exceeds {}",
                status_min_interval, MAX_MIN_INTERVAL_EXPONENT
            )));
        }

        let fast_cadence_low = kind.decode(reader.take(kind.width())?)?;
        let fast_cadence_high = kind.decode(reader.take(kind.width())?)?;

        Ok(SensorCadenceStatus::Cadence {
            property,
            cadence: SensorCadence {
                fast_cadence_period_divisor: divisor,
                trigger,
                status_min_interval,
                fast_cadence_low,
                fast_cadence_high,
            },
        })
    }
}

/// Value of one property in a Sensor Status
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    /// Decoded with the property's characteristic
    Decoded(Characteristic),
    /// Property without a known characteristic
    Raw(Bytes),
    /// Zero-length value
    Empty,
}

/// One property reading of a Sensor Status
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Property
    pub property: DeviceProperty,
    /// Value
    pub value: SensorValue,
}

/// Sensor Status: a sequence of marshalled property readings
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorStatus {
    /// Readings in the order they were sent
    pub readings: Vec<SensorReading>,
}

impl SensorStatus {
    /// Decode Sensor Status parameters.
    ///
    /// Format A: 2-octet header with 4-bit length and 11-bit property id.
    /// Format B: 1 octet with 7-bit length, then a 2-octet property id; a
    /// length field of 0x7F encodes a zero-length value.
    pub fn decode(parameters: &[u8]) -> Result<Self, WireError> {
        let mut reader = ParameterReader::new(parameters, "Sensor Status");
        let mut readings = Vec::new();

        while !reader.is_empty() {
            let first = reader.u8()?;
            let (len, property_id) = if first & 0x01 == 0 {
                let header = u16::from_le_bytes([first, reader.u8()?]);
                (((header >> 1) & 0x0F) as usize + 1, header >> 5)
            } else {
                let len = match first >> 1 {
                    0x7F => 0,
                    n => n as usize + 1,
                };
                (len, reader.u16_le()?)
            };

            let property = DeviceProperty::from_id(property_id);
            let raw = reader.take(len)?;
            let value = match (len, property.characteristic()) {
                (0, _) => SensorValue::Empty,
                (_, Some(kind)) => SensorValue::Decoded(kind.decode(raw)?),
                (_, None) => SensorValue::Raw(Bytes::copy_from_slice(raw)),
            };
            readings.push(SensorReading { property, value });
        }

        Ok(SensorStatus { readings })
    }

    /// Marshal readings, choosing format A whenever the property id and
    /// length allow it
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for reading in &self.readings {
            let value = match &reading.value {
                SensorValue::Decoded(c) => {
                    let mut v = BytesMut::new();
                    c.encode(&mut v);
                    v.freeze()
                }
                SensorValue::Raw(raw) => raw.clone(),
                SensorValue::Empty => Bytes::new(),
            };
            let id = reading.property.id();
            if (1..=16).contains(&value.len()) && id < 0x0800 {
                buf.put_u16_le(((value.len() as u16 - 1) << 1) | (id << 5));
            } else {
                let len_field = if value.is_empty() {
                    0x7F
                } else {
                    value.len() as u8 - 1
                };
                buf.put_u8((len_field << 1) | 0x01);
                buf.put_u16_le(id);
            }
            buf.put_slice(&value);
        }
        buf.freeze()
    }

    /// Reading for `property`, if present
    pub fn reading(&self, property: DeviceProperty) -> Option<&SensorValue> {
        self.readings
            .iter()
            .find(|r| r.property == property)
            .map(|r| &r.value)
    }
}

/// Sampling function of a sensor descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingFunction {
    /// Unspecified
    Unspecified,
    /// Instantaneous
    Instantaneous,
    /// Arithmetic mean
    ArithmeticMean,
    /// Root mean square
    Rms,
    /// Maximum
    Maximum,
    /// Minimum
    Minimum,
    /// Accumulated
    Accumulated,
    /// Count
    Count,
    /// Reserved value
    Reserved(u8),
}

impl From<u8> for SamplingFunction {
    fn from(raw: u8) -> Self {
        match raw {
            0x00 => SamplingFunction::Unspecified,
            0x01 => SamplingFunction::Instantaneous,
            0x02 => SamplingFunction::ArithmeticMean,
            0x03 => SamplingFunction::Rms,
            0x04 => SamplingFunction::Maximum,
            0x05 => SamplingFunction::Minimum,
            0x06 => SamplingFunction::Accumulated,
            0x07 => SamplingFunction::Count,
            other => SamplingFunction::Reserved(other),
        }
    }
}

/// Descriptor of one sensor property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorDescriptor {
    /// Property
    pub property: DeviceProperty,
    /// 12-bit positive tolerance
    pub positive_tolerance: u16,
    /// 12-bit negative tolerance
    pub negative_tolerance: u16,
    /// Sampling function
    pub sampling_function: SamplingFunction,
    /// Measurement period exponent, 0 when not applicable
    pub measurement_period: u8,
    /// Update interval exponent, 0 when not applicable
    pub update_interval: u8,
}

/// Sensor Descriptor Status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorDescriptorStatus {
    /// The requested property does not exist on the sensor
    NotFound {
        /// Requested property
        property: DeviceProperty,
    },
    /// One or more descriptors
    Descriptors(Vec<SensorDescriptor>),
}

impl SensorDescriptorStatus {
    /// Decode Sensor Descriptor Status parameters
    pub fn decode(parameters: &[u8]) -> Result<Self, WireError> {
        if parameters.len() == PROPERTY_ID_LEN {
            let property = DeviceProperty::from_id(u16::from_le_bytes([parameters[0], parameters[1]]));
            return Ok(SensorDescriptorStatus::NotFound { property });
        }
        if parameters.is_empty() || parameters.len() % DESCRIPTOR_LEN != 0 {
            return Err(WireError::MalformedPayload(format!(
                "Sensor Descriptor Status length {} is not a property id or a multiple of {}",
                parameters.len(),
                DESCRIPTOR_LEN
            )));
        }

        let descriptors = parameters
            .chunks_exact(DESCRIPTOR_LEN)
            .map(|d| SensorDescriptor {
                property: DeviceProperty::from_id(u16::from_le_bytes([d[0], d[1]])),
                positive_tolerance: u16::from(d[2]) | (u16::from(d[3] & 0x0F) << 8),
                negative_tolerance: u16::from(d[3] >> 4) | (u16::from(d[4]) << 4),
                sampling_function: SamplingFunction::from(d[5]),
                measurement_period: d[6],
                update_interval: d[7],
            })
            .collect();
        Ok(SensorDescriptorStatus::Descriptors(descriptors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characteristic::CharacteristicValue;

    fn pct(v: f32) -> Characteristic {
        Characteristic::Percentage8(CharacteristicValue::Known(v))
    }

    #[test]
    fn test_cadence_not_set() {
        let status = SensorCadenceStatus::decode(&[0x42, 0x00]).unwrap();
        assert_eq!(
            status,
            SensorCadenceStatus::NotSet {
                property: DeviceProperty::MotionSensed
            }
        );
    }

    #[test]
    fn test_cadence_value_trigger() {
        // Motion Sensed, divisor 2, value trigger, deltas 5 % / 10 %,
        // min interval 2^10 ms, fast cadence 25 %..100 %
        let params = [0x42, 0x00, 0x02, 0x0A, 0x14, 0x0A, 0x32, 0xC8];
        let status = SensorCadenceStatus::decode(&params).unwrap();
        let SensorCadenceStatus::Cadence { property, cadence } = status else {
            panic!("expected cadence, got {:?}", status);
        };
        assert_eq!(property, DeviceProperty::MotionSensed);
        assert_eq!(cadence.period_divisor(), 4);
        assert_eq!(
            cadence.trigger,
            StatusTrigger::Value {
                down: pct(5.0),
                up: pct(10.0)
            }
        );
        assert_eq!(cadence.min_interval_ms(), 1024);
        assert_eq!(cadence.fast_cadence_low, pct(25.0));
        assert_eq!(cadence.fast_cadence_high, pct(100.0));
    }

    #[test]
    fn test_cadence_percent_trigger() {
        // People Count, percent trigger 2.5 % / 12.5 %
        let params = [
            0x4C, 0x00, 0x81, 0xFA, 0x00, 0xE2, 0x04, 0x05, 0x01, 0x00, 0x64, 0x00,
        ];
        let status = SensorCadenceStatus::decode(&params).unwrap();
        let SensorCadenceStatus::Cadence { cadence, .. } = status else {
            panic!("expected cadence");
        };
        assert_eq!(
            cadence.trigger,
            StatusTrigger::Percent {
                down: 2.5,
                up: 12.5
            }
        );
        assert_eq!(
            cadence.fast_cadence_high,
            Characteristic::Count16(CharacteristicValue::Known(100))
        );
    }

    #[test]
    fn test_cadence_truncated() {
        let params = [0x42, 0x00, 0x02, 0x0A, 0x14, 0x0A, 0x32];
        assert!(matches!(
            SensorCadenceStatus::decode(&params),
            Err(WireError::MalformedPayload(_))
        ));
        assert!(SensorCadenceStatus::decode(&[0x42]).is_err());
    }

    #[test]
    fn test_cadence_unrecognized_property() {
        let status = SensorCadenceStatus::decode(&[0x99, 0x01, 0x02, 0xAA, 0xBB]).unwrap();
        assert_eq!(
            status,
            SensorCadenceStatus::Unrecognized {
                property_id: 0x0199,
                raw: Bytes::from_static(&[0x02, 0xAA, 0xBB]),
            }
        );
        assert_eq!(status.property(), DeviceProperty::Unrecognized(0x0199));
    }

    #[test]
    fn test_cadence_rejects_out_of_range_characteristic() {
        // Fast cadence high of 0xC9 is outside Percentage 8
        let params = [0x42, 0x00, 0x02, 0x0A, 0x14, 0x0A, 0x32, 0xC9];
        assert!(SensorCadenceStatus::decode(&params).is_err());
    }

    #[test]
    fn test_status_format_a_and_b() {
        let status = SensorStatus {
            readings: vec![
                SensorReading {
                    property: DeviceProperty::MotionSensed,
                    value: SensorValue::Decoded(pct(50.0)),
                },
                SensorReading {
                    property: DeviceProperty::Unrecognized(0x2A6E),
                    value: SensorValue::Raw(Bytes::from_static(&[1, 2, 3])),
                },
                SensorReading {
                    property: DeviceProperty::PeopleCount,
                    value: SensorValue::Empty,
                },
            ],
        };
        let encoded = status.encode();
        // Format A header for 0x0042 with one value octet
        assert_eq!(&encoded[..3], &[0x40, 0x08, 100]);
        // Format B for an id beyond 11 bits
        assert_eq!(&encoded[3..6], &[0x05, 0x6E, 0x2A]);
        assert_eq!(SensorStatus::decode(&encoded).unwrap(), status);
        assert_eq!(
            status.reading(DeviceProperty::MotionSensed),
            Some(&SensorValue::Decoded(pct(50.0)))
        );
    }

    #[test]
    fn test_status_truncated_value() {
        // Format A, length 2, People Count, one value octet
        let header: u16 = (1 << 1) | (0x004C << 5);
        let mut params = header.to_le_bytes().to_vec();
        params.push(0x01);
        assert!(matches!(
            SensorStatus::decode(&params),
            Err(WireError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_descriptor_status() {
        let params = [0x4E, 0x00, 0x23, 0x51, 0x04, 0x02, 0x40, 0x0C];
        let status = SensorDescriptorStatus::decode(&params).unwrap();
        assert_eq!(
            status,
            SensorDescriptorStatus::Descriptors(vec![SensorDescriptor {
                property: DeviceProperty::PresentAmbientLightLevel,
                positive_tolerance: 0x123,
                negative_tolerance: 0x045,
                sampling_function: SamplingFunction::ArithmeticMean,
                measurement_period: 0x40,
                update_interval: 0x0C,
            }])
        );

        assert_eq!(
            SensorDescriptorStatus::decode(&[0x42, 0x00]).unwrap(),
            SensorDescriptorStatus::NotFound {
                property: DeviceProperty::MotionSensed
            }
        );
        assert!(SensorDescriptorStatus::decode(&[0x42, 0x00, 0x01]).is_err());
    }

    #[test]
    fn test_get_encoders() {
        let get = SensorGet {
            property: Some(DeviceProperty::MotionSensed),
        }
        .to_access_pdu();
        assert_eq!(get.encode().unwrap().as_ref(), &[0x82, 0x31, 0x42, 0x00]);

        let all = SensorGet { property: None }.to_access_pdu();
        assert_eq!(all.encode().unwrap().as_ref(), &[0x82, 0x31]);

        let cadence = SensorCadenceGet {
            property: DeviceProperty::PeopleCount,
        }
        .to_access_pdu();
        assert_eq!(cadence.encode().unwrap().as_ref(), &[0x82, 0x34, 0x4C, 0x00]);
    }
}
