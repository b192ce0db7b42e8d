//! Provisioning session states.

use std::fmt;

/// Provisioner-side handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningState {
    /// Created, nothing sent
    Idle,
    /// Invite sent, waiting for capabilities
    Invite,
    /// Capabilities received, method being chosen
    Capabilities,
    /// Public keys being exchanged
    KeyExchange,
    /// Confirmations and randoms being exchanged
    Authentication,
    /// Provisioning data sent, waiting for Complete
    DistributingKeys,
    /// Device provisioned
    Complete,
    /// Aborted by an error or timeout
    Failed,
    /// Aborted by the caller
    Cancelled,
}

impl ProvisioningState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Complete | ProvisioningState::Failed | ProvisioningState::Cancelled
        )
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisioningState::Idle => "idle",
            ProvisioningState::Invite => "invite",
            ProvisioningState::Capabilities => "capabilities",
            ProvisioningState::KeyExchange => "key-exchange",
            ProvisioningState::Authentication => "authentication",
            ProvisioningState::DistributingKeys => "distributing-keys",
            ProvisioningState::Complete => "complete",
            ProvisioningState::Failed => "failed",
            ProvisioningState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
