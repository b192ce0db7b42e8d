//! Device property identifiers.

use crate::characteristic::CharacteristicKind;
use std::fmt;

/// Device property carried as a little-endian 16-bit id.
///
/// Ids without a known characteristic are kept as [`DeviceProperty::Unrecognized`]
/// so they survive a decode and re-encode unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceProperty {
    /// Motion Sensed (0x0042)
    MotionSensed,
    /// Motion Threshold (0x0043)
    MotionThreshold,
    /// People Count (0x004C)
    PeopleCount,
    /// Presence Detected (0x004D)
    PresenceDetected,
    /// Present Ambient Light Level (0x004E)
    PresentAmbientLightLevel,
    /// Present Ambient Temperature (0x004F)
    PresentAmbientTemperature,
    /// Time Since Motion Sensed (0x0068)
    TimeSinceMotionSensed,
    /// Any other property id
    Unrecognized(u16),
}

impl DeviceProperty {
    /// Map a raw id
    pub fn from_id(id: u16) -> Self {
        match id {
            0x0042 => DeviceProperty::MotionSensed,
            0x0043 => DeviceProperty::MotionThreshold,
            0x004C => DeviceProperty::PeopleCount,
            0x004D => DeviceProperty::PresenceDetected,
            0x004E => DeviceProperty::PresentAmbientLightLevel,
            0x004F => DeviceProperty::PresentAmbientTemperature,
            0x0068 => DeviceProperty::TimeSinceMotionSensed,
            other => DeviceProperty::Unrecognized(other),
        }
    }

    /// Raw id
    pub fn id(self) -> u16 {
        match self {
            DeviceProperty::MotionSensed => 0x0042,
            DeviceProperty::MotionThreshold => 0x0043,
            DeviceProperty::PeopleCount => 0x004C,
            DeviceProperty::PresenceDetected => 0x004D,
            DeviceProperty::PresentAmbientLightLevel => 0x004E,
            DeviceProperty::PresentAmbientTemperature => 0x004F,
            DeviceProperty::TimeSinceMotionSensed => 0x0068,
            DeviceProperty::Unrecognized(id) => id,
        }
    }

    /// Format of the property value, if the property is known
    pub fn characteristic(self) -> Option<CharacteristicKind> {
        match self {
            DeviceProperty::MotionSensed | DeviceProperty::MotionThreshold => {
                Some(CharacteristicKind::Percentage8)
            }
            DeviceProperty::PeopleCount => Some(CharacteristicKind::Count16),
            DeviceProperty::PresenceDetected => Some(CharacteristicKind::Boolean),
            DeviceProperty::PresentAmbientLightLevel => Some(CharacteristicKind::Illuminance),
            DeviceProperty::PresentAmbientTemperature => Some(CharacteristicKind::Temperature8),
            DeviceProperty::TimeSinceMotionSensed => Some(CharacteristicKind::TimeSecond16),
            DeviceProperty::Unrecognized(_) => None,
        }
    }

    /// Whether the id is one of the known properties
    pub fn is_recognized(self) -> bool {
        !matches!(self, DeviceProperty::Unrecognized(_))
    }

    /// Little-endian encoding
    pub fn to_le_bytes(self) -> [u8; 2] {
        self.id().to_le_bytes()
    }
}

impl From<u16> for DeviceProperty {
    fn from(id: u16) -> Self {
        DeviceProperty::from_id(id)
    }
}

impl fmt::Display for DeviceProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceProperty::MotionSensed => "Motion Sensed",
            DeviceProperty::MotionThreshold => "Motion Threshold",
            DeviceProperty::PeopleCount => "People Count",
            DeviceProperty::PresenceDetected => "Presence Detected",
            DeviceProperty::PresentAmbientLightLevel => "Present Ambient Light Level",
            DeviceProperty::PresentAmbientTemperature => "Present Ambient Temperature",
            DeviceProperty::TimeSinceMotionSensed => "Time Since Motion Sensed",
            DeviceProperty::Unrecognized(id) => return write!(f, "Unrecognized (0x{:04X})", id),
        };
        write!(f, "{} (0x{:04X})", name, self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_ids_map_back() {
        for id in [0x0042, 0x0043, 0x004C, 0x004D, 0x004E, 0x004F, 0x0068] {
            let property = DeviceProperty::from_id(id);
            assert!(property.is_recognized());
            assert!(property.characteristic().is_some());
            assert_eq!(property.id(), id);
        }
    }

    #[test]
    fn test_unrecognized_preserved() {
        let property = DeviceProperty::from(0x2A6E);
        assert_eq!(property, DeviceProperty::Unrecognized(0x2A6E));
        assert_eq!(property.to_le_bytes(), [0x6E, 0x2A]);
        assert_eq!(property.characteristic(), None);
        assert_eq!(property.to_string(), "Unrecognized (0x2A6E)");
    }
}
