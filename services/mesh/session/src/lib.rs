//! Provisioning handshakes and access messaging for a mesh provisioner.
//!
//! A [`ProvisioningSession`] is a pure state machine: it consumes decoded
//! provisioning PDUs and returns the PDUs to send next. The
//! [`ProvisioningManager`] drives sessions over a [`ProvisioningBearer`],
//! applies step timeouts and cancellation, and hands the final address and
//! device key to the registry and key ring.
//!
//! ```text
//!  Idle ─► Invite ─► Capabilities ─► KeyExchange ─► Authentication
//!                                                        │
//!          Failed / Cancelled ◄── (any step) ──┐         ▼
//!                                              └── DistributingKeys ─► Complete
//! ```
//!
//! [`MeshMessenger`] carries access messages once nodes are provisioned.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_session::{ChannelBearer, ManagerConfig, ProvisioningManager, SimulatedDevice};
//! # use std::sync::Arc;
//! # async fn example(
//! #     allocator: Arc<mesh_registry::AddressKeyAllocator>,
//! #     security: Arc<mesh_security::MeshSecurity>,
//! #     provisioner_id: uuid::Uuid,
//! # ) -> Result<(), mesh_session::ProvisioningError> {
//! let manager = ProvisioningManager::new(allocator, security, ManagerConfig::default());
//! let device_uuid = uuid::Uuid::new_v4();
//! let (mut near, mut far) = ChannelBearer::pair();
//!
//! let mut device = SimulatedDevice::new(device_uuid, 2);
//! tokio::spawn(async move { device.run(&mut far).await });
//!
//! let outcome = manager.provision(device_uuid, provisioner_id, &mut near).await?;
//! println!("node at 0x{:04X}", outcome.unicast_address);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bearer;
mod context;
pub mod device;
pub mod error;
pub mod manager;
pub mod messenger;
pub mod session;
pub mod state;

pub use bearer::{ChannelBearer, ProvisioningBearer, DEFAULT_BEARER_CAPACITY};
pub use device::{ProvisionedNode, SimulatedDevice};
pub use error::{MessageError, ProvisioningError};
pub use manager::{ManagerConfig, ProvisioningManager, ProvisioningTimeouts, DEFAULT_STEP_TIMEOUT};
pub use messenger::{MeshMessenger, MessengerConfig, ReceivedMessage, ReplayCache};
pub use session::{ProvisioningOutcome, ProvisioningParameters, ProvisioningSession, Transition};
pub use state::ProvisioningState;
