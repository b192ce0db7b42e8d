//! Provisioner registry for a single mesh network.
//!
//! The [`AddressKeyAllocator`] owns every provisioner of one network and
//! hands out the resources they manage:
//!
//! ```text
//!   provisioner ─┬─ unicast ranges ──► node address blocks
//!                ├─ group ranges
//!                ├─ scene ranges
//!                └─ sequence number (monotonic, 24 bit)
//! ```
//!
//! Ranges are validated against their address class and against the ranges
//! the same provisioner already holds. State changes are persisted through
//! [`mesh_storage::Storage`] before they become visible in memory.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod error;
pub mod validate;

pub use allocator::AddressKeyAllocator;
pub use error::RegistryError;
pub use validate::{
    class_bounds, validate_against, validate_name, validate_provisioner, validate_range_bounds,
    validate_ttl,
};
