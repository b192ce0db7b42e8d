//! Opcode-keyed catalog of typed model messages.

use crate::sensor::{
    SensorCadenceStatus, SensorDescriptorStatus, SensorStatus, SENSOR_CADENCE_STATUS,
    SENSOR_DESCRIPTOR_STATUS, SENSOR_STATUS,
};
use bytes::Bytes;
use mesh_wire::{AccessPdu, Opcode, OpcodeTable, WireError};
use tracing::debug;

/// Decoded model message
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMessage {
    /// Sensor Descriptor Status
    SensorDescriptorStatus(SensorDescriptorStatus),
    /// Sensor Status
    SensorStatus(SensorStatus),
    /// Sensor Cadence Status
    SensorCadenceStatus(SensorCadenceStatus),
    /// Opcode without a registered decoder
    Unrecognized {
        /// Opcode
        opcode: Opcode,
        /// Raw parameters
        parameters: Bytes,
    },
}

fn decode_descriptor_status(parameters: &[u8]) -> Result<ModelMessage, WireError> {
    SensorDescriptorStatus::decode(parameters).map(ModelMessage::SensorDescriptorStatus)
}

fn decode_sensor_status(parameters: &[u8]) -> Result<ModelMessage, WireError> {
    SensorStatus::decode(parameters).map(ModelMessage::SensorStatus)
}

fn decode_cadence_status(parameters: &[u8]) -> Result<ModelMessage, WireError> {
    SensorCadenceStatus::decode(parameters).map(ModelMessage::SensorCadenceStatus)
}

/// Immutable decoder table built once at startup and shared by reference
#[derive(Debug)]
pub struct MessageCatalog {
    table: OpcodeTable<ModelMessage>,
}

impl MessageCatalog {
    /// Catalog with every sensor status decoder registered
    pub fn sensor() -> Self {
        let mut table = OpcodeTable::new();
        table
            .register(
                SENSOR_DESCRIPTOR_STATUS,
                "Sensor Descriptor Status",
                2,
                decode_descriptor_status,
            )
            .register(SENSOR_STATUS, "Sensor Status", 0, decode_sensor_status)
            .register(
                SENSOR_CADENCE_STATUS,
                "Sensor Cadence Status",
                2,
                decode_cadence_status,
            );
        Self { table }
    }

    /// Underlying opcode table
    pub fn table(&self) -> &OpcodeTable<ModelMessage> {
        &self.table
    }

    /// Registered name of `opcode`
    pub fn name(&self, opcode: Opcode) -> Option<&'static str> {
        self.table.name(opcode)
    }

    /// Decode an access PDU. Unregistered opcodes yield
    /// [`ModelMessage::Unrecognized`]; malformed parameters are an error.
    pub fn decode(&self, pdu: &AccessPdu) -> Result<ModelMessage, WireError> {
        match self.table.decode_parameters(pdu.opcode, &pdu.parameters) {
            Err(e) if e.is_unknown_opcode() => {
                debug!("No decoder for opcode {}", pdu.opcode);
                Ok(ModelMessage::Unrecognized {
                    opcode: pdu.opcode,
                    parameters: pdu.parameters.clone(),
                })
            }
            other => other,
        }
    }

    /// Decode raw access PDU bytes
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<ModelMessage, WireError> {
        let pdu = AccessPdu::decode(&Bytes::copy_from_slice(bytes))?;
        self.decode(&pdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::DeviceProperty;

    #[test]
    fn test_sensor_catalog_registrations() {
        let catalog = MessageCatalog::sensor();
        assert_eq!(
            catalog.table().opcodes(),
            vec![SENSOR_DESCRIPTOR_STATUS, SENSOR_STATUS, SENSOR_CADENCE_STATUS]
        );
        assert_eq!(catalog.name(SENSOR_STATUS), Some("Sensor Status"));
    }

    #[test]
    fn test_decode_cadence_status() {
        let catalog = MessageCatalog::sensor();
        let message = catalog.decode_bytes(&[0x57, 0x42, 0x00]).unwrap();
        assert_eq!(
            message,
            ModelMessage::SensorCadenceStatus(SensorCadenceStatus::NotSet {
                property: DeviceProperty::MotionSensed
            })
        );
    }

    #[test]
    fn test_unknown_opcode_is_unrecognized() {
        let catalog = MessageCatalog::sensor();
        let message = catalog.decode_bytes(&[0x82, 0x04, 0x01]).unwrap();
        assert_eq!(
            message,
            ModelMessage::Unrecognized {
                opcode: Opcode::sig(0x8204),
                parameters: Bytes::from_static(&[0x01]),
            }
        );
    }

    #[test]
    fn test_short_parameters_rejected() {
        let catalog = MessageCatalog::sensor();
        assert!(matches!(
            catalog.decode_bytes(&[0x57, 0x42]),
            Err(WireError::MalformedPayload(_))
        ));
    }
}
