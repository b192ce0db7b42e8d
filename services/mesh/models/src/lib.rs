//! Typed model messages on top of raw access PDUs.
//!
//! Decoders are plain functions registered in a [`MessageCatalog`] by
//! opcode. Each decoder declares a minimum parameter length that the table
//! enforces before the decoder reads anything.
//!
//! ```rust
//! use mesh_models::{MessageCatalog, ModelMessage};
//!
//! let catalog = MessageCatalog::sensor();
//! let message = catalog.decode_bytes(&[0x57, 0x42, 0x00]).unwrap();
//! assert!(matches!(message, ModelMessage::SensorCadenceStatus(_)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod characteristic;
pub mod property;
mod reader;
pub mod sensor;

pub use catalog::{MessageCatalog, ModelMessage};
pub use characteristic::{Characteristic, CharacteristicKind, CharacteristicValue};
pub use property::DeviceProperty;
pub use sensor::{
    SamplingFunction, SensorCadence, SensorCadenceGet, SensorCadenceStatus, SensorDescriptor,
    SensorDescriptorGet, SensorDescriptorStatus, SensorGet, SensorReading, SensorStatus,
    SensorValue, StatusTrigger,
};
