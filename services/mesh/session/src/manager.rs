//! Provisioning manager driving sessions over bearers.
//!
//! The manager owns at most one session per device UUID. Each session runs on
//! the caller's task; `cancel` may be called from any other task and takes
//! effect immediately, both on the session state and on the pending wait.

use crate::bearer::ProvisioningBearer;
use crate::error::ProvisioningError;
use crate::session::{ProvisioningOutcome, ProvisioningParameters, ProvisioningSession};
use crate::state::ProvisioningState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mesh_registry::AddressKeyAllocator;
use mesh_security::{KeyBytes, MeshSecurity};
use mesh_wire::{ProvisioningFlags, ProvisioningPdu};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Mesh provisioning protocol timeout
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-step timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningTimeouts {
    /// Longest wait for any single device PDU
    pub step: Duration,
}

impl Default for ProvisioningTimeouts {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP_TIMEOUT,
        }
    }
}

/// Settings shared by every session the manager starts
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Network key handed to new nodes
    pub network_key_index: u16,
    /// Current IV index
    pub iv_index: u32,
    /// Provisioning data flags
    pub flags: ProvisioningFlags,
    /// Attention timer sent in the Invite
    pub attention_duration: u8,
    /// Static OOB value, if devices are set up with one
    pub static_oob: Option<KeyBytes>,
    /// Refuse devices without static OOB
    pub require_static_oob: bool,
    /// Step timeouts
    pub timeouts: ProvisioningTimeouts,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            network_key_index: 0,
            iv_index: 0,
            flags: ProvisioningFlags::empty(),
            attention_duration: 5,
            static_oob: None,
            require_static_oob: false,
            timeouts: ProvisioningTimeouts::default(),
        }
    }
}

struct ActiveSession {
    session: Arc<Mutex<ProvisioningSession>>,
    cancel: watch::Sender<bool>,
}

/// Coordinates provisioning sessions against the allocator and key ring
pub struct ProvisioningManager {
    allocator: Arc<AddressKeyAllocator>,
    security: Arc<MeshSecurity>,
    config: ManagerConfig,
    sessions: DashMap<Uuid, ActiveSession>,
}

fn lock(session: &Mutex<ProvisioningSession>) -> MutexGuard<'_, ProvisioningSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProvisioningManager {
    /// Create a manager
    pub fn new(
        allocator: Arc<AddressKeyAllocator>,
        security: Arc<MeshSecurity>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            allocator,
            security,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Manager settings
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Devices with a session in progress
    pub fn active_sessions(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    /// State of the session for `device_uuid`, while it is active
    pub fn state(&self, device_uuid: Uuid) -> Option<ProvisioningState> {
        self.sessions
            .get(&device_uuid)
            .map(|active| lock(&active.session).state())
    }

    /// Cancel the session for `device_uuid`. Key material is dropped before
    /// this returns.
    pub fn cancel(&self, device_uuid: Uuid) -> bool {
        match self.sessions.get(&device_uuid) {
            Some(active) => {
                lock(&active.session).cancel();
                let _ = active.cancel.send(true);
                info!("Cancelled provisioning of {}", device_uuid);
                true
            }
            None => false,
        }
    }

    /// Provision `device_uuid` on behalf of `provisioner_id` over `bearer`
    pub async fn provision<B: ProvisioningBearer>(
        &self,
        device_uuid: Uuid,
        provisioner_id: Uuid,
        bearer: &mut B,
    ) -> Result<ProvisioningOutcome, ProvisioningError> {
        let network_key = self
            .security
            .network_key(self.config.network_key_index)
            .ok_or(ProvisioningError::UnknownNetworkKey(
                self.config.network_key_index,
            ))?;
        // Fails early for unknown provisioners
        self.allocator.provisioner(provisioner_id).await?;

        let params = ProvisioningParameters {
            attention_duration: self.config.attention_duration,
            network_key_index: network_key.index(),
            network_key: network_key.key().clone(),
            iv_index: self.config.iv_index,
            flags: self.config.flags,
            static_oob: self.config.static_oob.clone(),
            require_static_oob: self.config.require_static_oob,
        };

        let (session, cancel_rx) = match self.sessions.entry(device_uuid) {
            Entry::Occupied(_) => return Err(ProvisioningError::SessionInProgress(device_uuid)),
            Entry::Vacant(vacant) => {
                let session = Arc::new(Mutex::new(ProvisioningSession::new(device_uuid, params)));
                let (cancel, cancel_rx) = watch::channel(false);
                vacant.insert(ActiveSession {
                    session: session.clone(),
                    cancel,
                });
                (session, cancel_rx)
            }
        };

        let result = self
            .drive(&session, provisioner_id, bearer, cancel_rx)
            .await;

        if let Err(e) = &result {
            lock(&session).fail(e.to_string());
            self.allocator.release_reservation(device_uuid);
            error!("Provisioning {} failed: {}", device_uuid, e);
        }
        self.sessions.remove(&device_uuid);
        result
    }

    async fn drive<B: ProvisioningBearer>(
        &self,
        session: &Mutex<ProvisioningSession>,
        provisioner_id: Uuid,
        bearer: &mut B,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<ProvisioningOutcome, ProvisioningError> {
        let device_uuid = lock(session).device_uuid();
        let invite = lock(session).invite()?;
        bearer.send_pdu(invite.encode()).await?;

        loop {
            let state = lock(session).state();
            if state == ProvisioningState::Cancelled {
                return Err(ProvisioningError::Cancelled);
            }

            let raw = tokio::select! {
                _ = cancel_rx.changed() => return Err(ProvisioningError::Cancelled),
                received = tokio::time::timeout(self.config.timeouts.step, bearer.recv_pdu()) => {
                    match received {
                        Ok(raw) => raw?,
                        Err(_) => {
                            warn!("Provisioning {} timed out in state {}", device_uuid, state);
                            return Err(ProvisioningError::Timeout { state });
                        }
                    }
                }
            };

            let pdu = ProvisioningPdu::decode(&raw)?;
            debug!("Provisioning {} received {:?}", device_uuid, pdu.pdu_type());

            let element_count = match &pdu {
                ProvisioningPdu::Capabilities(caps) => Some(caps.element_count),
                _ => None,
            };
            let transition = lock(session).handle_pdu(pdu)?;

            if let Some(element_count) = element_count {
                let address = self
                    .allocator
                    .reserve_address(provisioner_id, element_count, device_uuid)
                    .await?;
                lock(session).set_unicast_address(address)?;
            }

            for out in transition.outgoing {
                bearer.send_pdu(out.encode()).await?;
            }

            if let Some(outcome) = transition.outcome {
                self.finish(provisioner_id, &outcome).await?;
                return Ok(outcome);
            }
        }
    }

    async fn finish(
        &self,
        provisioner_id: Uuid,
        outcome: &ProvisioningOutcome,
    ) -> Result<(), ProvisioningError> {
        if self.security.network_key(outcome.network_key_index).is_none() {
            return Err(ProvisioningError::UnknownNetworkKey(
                outcome.network_key_index,
            ));
        }
        self.allocator
            .commit_node_address(
                provisioner_id,
                outcome.unicast_address,
                outcome.element_count,
                outcome.device_uuid,
            )
            .await?;
        self.security
            .install_device_key(outcome.unicast_address, outcome.device_key.clone());
        info!(
            "Node {} added at 0x{:04X}",
            outcome.device_uuid, outcome.unicast_address
        );
        Ok(())
    }
}

impl std::fmt::Debug for ProvisioningManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningManager")
            .field("active_sessions", &self.sessions.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bearer::ChannelBearer;
    use crate::device::SimulatedDevice;
    use mesh_security::NetworkKey;
    use mesh_storage::{AllocatedRange, MemoryStore, Provisioner, RangeKind, Storage};

    struct Fixture {
        manager: Arc<ProvisioningManager>,
        allocator: Arc<AddressKeyAllocator>,
        security: Arc<MeshSecurity>,
        provisioner_id: Uuid,
    }

    async fn fixture(config: ManagerConfig) -> Fixture {
        let mesh = Uuid::new_v4();
        let storage = Storage::from_backend(Arc::new(MemoryStore::new()));
        let allocator = Arc::new(AddressKeyAllocator::new(mesh, storage));
        let provisioner = Provisioner::new(mesh, "Test")
            .with_address(0x0001)
            .with_range(RangeKind::Unicast, AllocatedRange::new(0x0001, 0x00FF));
        let provisioner_id = provisioner.id;
        allocator.add_provisioner(provisioner).await.unwrap();

        let security = Arc::new(MeshSecurity::new());
        security.install_network_key(NetworkKey::generate(0, "Primary").unwrap());

        Fixture {
            manager: Arc::new(ProvisioningManager::new(
                allocator.clone(),
                security.clone(),
                config,
            )),
            allocator,
            security,
            provisioner_id,
        }
    }

    #[tokio::test]
    async fn test_provision_over_channel() {
        let f = fixture(ManagerConfig::default()).await;
        let device_uuid = Uuid::new_v4();
        let (mut near, mut far) = ChannelBearer::pair();
        let mut device = SimulatedDevice::new(device_uuid, 3);
        let device_task = tokio::spawn(async move {
            device.run(&mut far).await.unwrap();
            device
        });

        let outcome = f
            .manager
            .provision(device_uuid, f.provisioner_id, &mut near)
            .await
            .unwrap();
        let device = device_task.await.unwrap();

        // 0x0001 belongs to the provisioner
        assert_eq!(outcome.unicast_address, 0x0002);
        assert_eq!(outcome.element_count, 3);
        assert!(f.security.has_device_key(0x0002));
        assert_eq!(f.allocator.nodes().len(), 1);
        assert_eq!(&device.provisioned().unwrap().device_key, &outcome.device_key);
        assert!(f.manager.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_device_releases_address() {
        let f = fixture(ManagerConfig::default()).await;
        let device_uuid = Uuid::new_v4();
        let (mut near, mut far) = ChannelBearer::pair();
        let mut device = SimulatedDevice::new(device_uuid, 1);
        device.set_tamper_confirmation(true);
        tokio::spawn(async move {
            let _ = device.run(&mut far).await;
        });

        let result = f
            .manager
            .provision(device_uuid, f.provisioner_id, &mut near)
            .await;
        assert!(matches!(result, Err(ProvisioningError::ConfirmationMismatch)));
        assert!(f.allocator.nodes().is_empty());
        assert_eq!(
            f.allocator
                .next_available_address(f.provisioner_id, 1)
                .await
                .unwrap(),
            0x0002
        );
        assert!(!f.security.has_device_key(0x0002));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out() {
        let config = ManagerConfig {
            timeouts: ProvisioningTimeouts {
                step: Duration::from_secs(5),
            },
            ..ManagerConfig::default()
        };
        let f = fixture(config).await;
        // Keep the far end open but never answer
        let (mut near, _far) = ChannelBearer::pair();

        let result = f
            .manager
            .provision(Uuid::new_v4(), f.provisioner_id, &mut near)
            .await;
        assert!(matches!(
            result,
            Err(ProvisioningError::Timeout {
                state: ProvisioningState::Invite
            })
        ));
    }

    #[tokio::test]
    async fn test_second_session_for_same_device_rejected() {
        let f = fixture(ManagerConfig::default()).await;
        let device_uuid = Uuid::new_v4();
        let (mut near, _far) = ChannelBearer::pair();

        let manager = f.manager.clone();
        let provisioner_id = f.provisioner_id;
        let first = tokio::spawn(async move {
            manager
                .provision(device_uuid, provisioner_id, &mut near)
                .await
        });
        while f.manager.state(device_uuid).is_none() {
            tokio::task::yield_now().await;
        }

        let (mut other, _other_far) = ChannelBearer::pair();
        assert!(matches!(
            f.manager
                .provision(device_uuid, f.provisioner_id, &mut other)
                .await,
            Err(ProvisioningError::SessionInProgress(_))
        ));

        assert!(f.manager.cancel(device_uuid));
        assert!(matches!(
            first.await.unwrap(),
            Err(ProvisioningError::Cancelled)
        ));
        assert!(!f.manager.cancel(device_uuid));
    }

    #[tokio::test]
    async fn test_unknown_network_key() {
        let config = ManagerConfig {
            network_key_index: 7,
            ..ManagerConfig::default()
        };
        let f = fixture(config).await;
        let (mut near, _far) = ChannelBearer::pair();
        assert!(matches!(
            f.manager
                .provision(Uuid::new_v4(), f.provisioner_id, &mut near)
                .await,
            Err(ProvisioningError::UnknownNetworkKey(7))
        ));
    }
}
