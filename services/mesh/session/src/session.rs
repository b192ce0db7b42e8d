//! Provisioner side of the provisioning handshake.
//!
//! [`ProvisioningSession`] is a pure state machine: it consumes decoded
//! device PDUs and returns the PDUs to send next. I/O, timeouts and address
//! allocation are left to the caller (see [`crate::manager`]).
//!
//! ```text
//! Idle --invite()--> Invite --Capabilities--> KeyExchange --PublicKey-->
//! Authentication --Confirmation/Random--> DistributingKeys --Complete--> Complete
//! ```

use crate::context::ProvisioningContext;
use crate::error::ProvisioningError;
use crate::state::ProvisioningState;
use mesh_security::crypto::constant_time_eq;
use mesh_security::provisioning::{
    confirmation_inputs, confirmation_key, confirmation_salt, confirmation_value,
    encrypt_provisioning_data, generate_random, provisioning_salt,
};
use mesh_security::{EcdhKeyPair, KeyBytes, SessionKeys};
use mesh_wire::{
    Algorithms, AuthenticationMethod, Capabilities, ProvisioningData, ProvisioningFlags,
    ProvisioningPdu, Start,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Inputs a provisioner brings to a handshake
#[derive(Clone, Debug)]
pub struct ProvisioningParameters {
    /// Attention timer sent in the Invite
    pub attention_duration: u8,
    /// Index of the network key handed to the device
    pub network_key_index: u16,
    /// Network key handed to the device
    pub network_key: KeyBytes,
    /// Current IV index
    pub iv_index: u32,
    /// Key refresh / IV update flags
    pub flags: ProvisioningFlags,
    /// Static OOB value shared with the device, if any
    pub static_oob: Option<KeyBytes>,
    /// Fail instead of falling back to No OOB when the device lacks static OOB
    pub require_static_oob: bool,
}

impl ProvisioningParameters {
    /// No OOB, zero IV index, no flags
    pub fn new(network_key_index: u16, network_key: KeyBytes) -> Self {
        Self {
            attention_duration: 0,
            network_key_index,
            network_key,
            iv_index: 0,
            flags: ProvisioningFlags::empty(),
            static_oob: None,
            require_static_oob: false,
        }
    }
}

/// What a successful handshake produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisioningOutcome {
    /// Provisioned device
    pub device_uuid: Uuid,
    /// Address of the primary element
    pub unicast_address: u16,
    /// Number of elements on the device
    pub element_count: u8,
    /// Device key shared with the node
    pub device_key: KeyBytes,
    /// Network key the node received
    pub network_key_index: u16,
}

/// Result of feeding one PDU to the session
#[derive(Debug, Default)]
pub struct Transition {
    /// PDUs to send to the device, in order
    pub outgoing: Vec<ProvisioningPdu>,
    /// Set once the device reports Complete
    pub outcome: Option<ProvisioningOutcome>,
}

impl Transition {
    fn send(pdus: Vec<ProvisioningPdu>) -> Self {
        Self {
            outgoing: pdus,
            outcome: None,
        }
    }
}

/// One provisioning handshake with one device
pub struct ProvisioningSession {
    device_uuid: Uuid,
    state: ProvisioningState,
    params: ProvisioningParameters,
    capabilities: Option<Capabilities>,
    unicast_address: Option<u16>,
    context: Option<ProvisioningContext>,
    failure: Option<String>,
}

impl ProvisioningSession {
    /// New idle session
    pub fn new(device_uuid: Uuid, params: ProvisioningParameters) -> Self {
        Self {
            device_uuid,
            state: ProvisioningState::Idle,
            params,
            capabilities: None,
            unicast_address: None,
            context: Some(ProvisioningContext::new()),
            failure: None,
        }
    }

    /// Device being provisioned
    pub fn device_uuid(&self) -> Uuid {
        self.device_uuid
    }

    /// Current state
    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    /// Capabilities reported by the device
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Address that will be sent in the provisioning data
    pub fn unicast_address(&self) -> Option<u16> {
        self.unicast_address
    }

    /// Reason the session failed
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Whether transient key material is still held
    pub fn has_key_material(&self) -> bool {
        self.context.is_some()
    }

    /// Start the handshake
    pub fn invite(&mut self) -> Result<ProvisioningPdu, ProvisioningError> {
        if self.state != ProvisioningState::Idle {
            return Err(self.invalid("invite"));
        }
        let pdu = ProvisioningPdu::Invite {
            attention_duration: self.params.attention_duration,
        };
        self.context_mut()?.invite = pdu.parameters().to_vec();
        self.state = ProvisioningState::Invite;
        info!("Provisioning {}: invite sent", self.device_uuid);
        Ok(pdu)
    }

    /// Set the address sent to the device; allowed until the data is sent
    pub fn set_unicast_address(&mut self, address: u16) -> Result<(), ProvisioningError> {
        if self.state.is_terminal() || self.state == ProvisioningState::DistributingKeys {
            return Err(self.invalid("assign an address"));
        }
        self.unicast_address = Some(address);
        Ok(())
    }

    /// Feed a PDU received from the device.
    ///
    /// Any error moves the session to `Failed` and drops its key material.
    pub fn handle_pdu(&mut self, pdu: ProvisioningPdu) -> Result<Transition, ProvisioningError> {
        if self.state.is_terminal() {
            return Err(self.invalid("handle a pdu"));
        }
        let result = self.step(pdu);
        if let Err(e) = &result {
            self.abort(ProvisioningState::Failed, e.to_string());
        }
        result
    }

    /// Abort with a reason; no-op on terminal sessions
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.abort(ProvisioningState::Failed, reason.into());
        }
    }

    /// Cancel and drop key material immediately; no-op on terminal sessions
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.abort(ProvisioningState::Cancelled, "cancelled".to_string());
        }
    }

    fn abort(&mut self, state: ProvisioningState, reason: String) {
        warn!(
            "Provisioning {} aborted in state {}: {}",
            self.device_uuid, self.state, reason
        );
        self.state = state;
        self.failure = Some(reason);
        self.context = None;
    }

    fn invalid(&self, operation: &'static str) -> ProvisioningError {
        ProvisioningError::InvalidState {
            state: self.state,
            operation,
        }
    }

    fn context_mut(&mut self) -> Result<&mut ProvisioningContext, ProvisioningError> {
        let state = self.state;
        self.context
            .as_mut()
            .ok_or(ProvisioningError::InvalidState {
                state,
                operation: "access key material",
            })
    }

    fn step(&mut self, pdu: ProvisioningPdu) -> Result<Transition, ProvisioningError> {
        use ProvisioningState as S;

        match (self.state, pdu) {
            (_, ProvisioningPdu::Failed(code)) => Err(ProvisioningError::from_failure_code(code)),
            (S::Invite, ProvisioningPdu::Capabilities(caps)) => self.on_capabilities(caps),
            (S::KeyExchange, ProvisioningPdu::PublicKey(key)) => self.on_public_key(key),
            (S::Authentication, ProvisioningPdu::Confirmation(value)) => {
                self.on_confirmation(value)
            }
            (S::Authentication, ProvisioningPdu::Random(random)) => self.on_random(random),
            (S::DistributingKeys, ProvisioningPdu::Complete) => self.on_complete(),
            (state, other) => Err(ProvisioningError::UnexpectedPdu {
                state,
                pdu: other.pdu_type(),
            }),
        }
    }

    fn choose_auth_method(
        &self,
        caps: &Capabilities,
    ) -> Result<AuthenticationMethod, ProvisioningError> {
        let device_has_static = caps
            .static_oob_type
            .contains(mesh_wire::provisioning::StaticOobType::AVAILABLE);
        match (&self.params.static_oob, device_has_static) {
            (Some(_), true) => Ok(AuthenticationMethod::StaticOob),
            (Some(_), false) if self.params.require_static_oob => {
                Err(ProvisioningError::UnsupportedAuthentication)
            }
            _ => Ok(AuthenticationMethod::NoOob),
        }
    }

    fn on_capabilities(&mut self, caps: Capabilities) -> Result<Transition, ProvisioningError> {
        self.state = ProvisioningState::Capabilities;
        if !caps.algorithms.contains(Algorithms::FIPS_P256) {
            return Err(ProvisioningError::UnsupportedAlgorithm);
        }
        let method = self.choose_auth_method(&caps)?;
        let auth_value = match (method, &self.params.static_oob) {
            (AuthenticationMethod::StaticOob, Some(value)) => *value.as_bytes(),
            _ => [0u8; 16],
        };

        let caps_pdu = ProvisioningPdu::Capabilities(caps);
        let start = ProvisioningPdu::Start(Start::fips_p256(method));
        let key_pair = EcdhKeyPair::generate();
        let public_key = ProvisioningPdu::PublicKey(*key_pair.public_key());

        let ctx = self.context_mut()?;
        ctx.capabilities = caps_pdu.parameters().to_vec();
        ctx.start = start.parameters().to_vec();
        ctx.auth_method = Some(method);
        ctx.auth_value = auth_value;
        ctx.key_pair = Some(key_pair);

        debug!(
            "Provisioning {}: {} element(s), auth {:?}",
            self.device_uuid, caps.element_count, method
        );
        self.capabilities = Some(caps);
        self.state = ProvisioningState::KeyExchange;
        Ok(Transition::send(vec![start, public_key]))
    }

    fn on_public_key(
        &mut self,
        device_key: [u8; mesh_wire::provisioning::PUBLIC_KEY_SIZE],
    ) -> Result<Transition, ProvisioningError> {
        let ctx = self.context_mut()?;
        let key_pair = ctx.key_pair.as_ref().ok_or(ProvisioningError::InvalidPublicKey)?;
        let secret = key_pair.shared_secret(&device_key)?;

        let inputs = confirmation_inputs(
            &ctx.invite,
            &ctx.capabilities,
            &ctx.start,
            key_pair.public_key(),
            &device_key,
        )?;
        let salt = confirmation_salt(&inputs);
        let key = confirmation_key(&secret, &salt);
        let random = generate_random();
        let confirmation = confirmation_value(&key, &random, &ctx.auth_value);

        ctx.peer_public_key = Some(device_key);
        ctx.confirmation_salt = salt;
        ctx.confirmation_key = Some(key);
        ctx.own_random = random;
        ctx.secret = Some(secret);

        self.state = ProvisioningState::Authentication;
        Ok(Transition::send(vec![ProvisioningPdu::Confirmation(
            confirmation,
        )]))
    }

    fn on_confirmation(&mut self, value: [u8; 16]) -> Result<Transition, ProvisioningError> {
        let state = self.state;
        let ctx = self.context_mut()?;
        if ctx.peer_confirmation.is_some() {
            return Err(ProvisioningError::UnexpectedPdu {
                state,
                pdu: mesh_wire::PduType::Confirmation,
            });
        }
        ctx.peer_confirmation = Some(value);
        Ok(Transition::send(vec![ProvisioningPdu::Random(
            ctx.own_random,
        )]))
    }

    fn on_random(&mut self, device_random: [u8; 16]) -> Result<Transition, ProvisioningError> {
        let state = self.state;
        let address = self.unicast_address;
        let params = self.params.clone();
        let ctx = self.context_mut()?;

        let (expected, received) = match (&ctx.confirmation_key, ctx.peer_confirmation) {
            (Some(key), Some(received)) => (
                confirmation_value(key, &device_random, &ctx.auth_value),
                received,
            ),
            _ => {
                return Err(ProvisioningError::UnexpectedPdu {
                    state,
                    pdu: mesh_wire::PduType::Random,
                })
            }
        };
        if !constant_time_eq(&expected, &received) {
            return Err(ProvisioningError::ConfirmationMismatch);
        }
        let unicast_address = address.ok_or(ProvisioningError::NoAddressAssigned)?;
        let secret = ctx
            .secret
            .as_ref()
            .ok_or(ProvisioningError::InvalidPublicKey)?;

        let salt = provisioning_salt(&ctx.confirmation_salt, &ctx.own_random, &device_random);
        let keys = SessionKeys::derive(secret, &salt);
        let data = ProvisioningData {
            network_key: *params.network_key.as_bytes(),
            key_index: params.network_key_index,
            flags: params.flags,
            iv_index: params.iv_index,
            unicast_address,
        };
        let (encrypted, mic) = encrypt_provisioning_data(&keys, &data)?;

        ctx.peer_random = Some(device_random);
        ctx.session_keys = Some(keys);
        self.state = ProvisioningState::DistributingKeys;
        debug!(
            "Provisioning {}: data sent, address 0x{:04X}",
            self.device_uuid, unicast_address
        );
        Ok(Transition::send(vec![ProvisioningPdu::Data {
            encrypted,
            mic,
        }]))
    }

    fn on_complete(&mut self) -> Result<Transition, ProvisioningError> {
        let unicast_address = self
            .unicast_address
            .ok_or(ProvisioningError::NoAddressAssigned)?;
        let element_count = self
            .capabilities
            .as_ref()
            .map(|c| c.element_count)
            .unwrap_or(1);
        let device_key = self
            .context_mut()?
            .session_keys
            .as_ref()
            .map(|k| k.device_key().clone())
            .ok_or(ProvisioningError::EncryptionFailure)?;

        self.state = ProvisioningState::Complete;
        self.context = None;
        info!(
            "Provisioning {} complete: address 0x{:04X}, {} element(s)",
            self.device_uuid, unicast_address, element_count
        );
        Ok(Transition {
            outgoing: Vec::new(),
            outcome: Some(ProvisioningOutcome {
                device_uuid: self.device_uuid,
                unicast_address,
                element_count,
                device_key,
                network_key_index: self.params.network_key_index,
            }),
        })
    }
}

impl std::fmt::Debug for ProvisioningSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningSession")
            .field("device_uuid", &self.device_uuid)
            .field("state", &self.state)
            .field("unicast_address", &self.unicast_address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedDevice;

    fn params() -> ProvisioningParameters {
        ProvisioningParameters::new(0, KeyBytes::new([0x7d; 16]))
    }

    /// Run the exchange in memory until the session stops producing PDUs
    fn run(
        session: &mut ProvisioningSession,
        device: &mut SimulatedDevice,
        address: u16,
    ) -> Result<ProvisioningOutcome, ProvisioningError> {
        let mut queue = vec![session.invite()?];
        while let Some(pdu) = queue.pop() {
            for reply in device.handle_pdu(pdu) {
                if matches!(reply, ProvisioningPdu::Capabilities(_)) {
                    session.set_unicast_address(address)?;
                }
                let transition = session.handle_pdu(reply)?;
                if let Some(outcome) = transition.outcome {
                    return Ok(outcome);
                }
                queue.extend(transition.outgoing.into_iter().rev());
            }
        }
        Err(ProvisioningError::BearerClosed)
    }

    #[test]
    fn test_handshake_completes() {
        let device_uuid = Uuid::new_v4();
        let mut session = ProvisioningSession::new(device_uuid, params());
        let mut device = SimulatedDevice::new(device_uuid, 2);

        let outcome = run(&mut session, &mut device, 0x0010).unwrap();
        assert_eq!(session.state(), ProvisioningState::Complete);
        assert!(!session.has_key_material());
        assert_eq!(outcome.unicast_address, 0x0010);
        assert_eq!(outcome.element_count, 2);

        let node = device.provisioned().unwrap();
        assert_eq!(node.unicast_address, 0x0010);
        assert_eq!(node.network_key, KeyBytes::new([0x7d; 16]));
        assert_eq!(&node.device_key, &outcome.device_key);
    }

    #[test]
    fn test_static_oob_handshake() {
        let device_uuid = Uuid::new_v4();
        let oob = KeyBytes::new([0x42; 16]);
        let mut p = params();
        p.static_oob = Some(oob.clone());
        p.require_static_oob = true;
        let mut session = ProvisioningSession::new(device_uuid, p);
        let mut device = SimulatedDevice::new(device_uuid, 1).with_static_oob(oob);

        run(&mut session, &mut device, 0x0020).unwrap();
        assert_eq!(session.state(), ProvisioningState::Complete);
    }

    #[test]
    fn test_static_oob_value_mismatch_fails() {
        let device_uuid = Uuid::new_v4();
        let mut p = params();
        p.static_oob = Some(KeyBytes::new([0x42; 16]));
        let mut session = ProvisioningSession::new(device_uuid, p);
        let mut device =
            SimulatedDevice::new(device_uuid, 1).with_static_oob(KeyBytes::new([0x43; 16]));

        assert!(matches!(
            run(&mut session, &mut device, 0x0020),
            Err(ProvisioningError::ConfirmationMismatch)
        ));
        assert_eq!(session.state(), ProvisioningState::Failed);
        assert!(!session.has_key_material());
    }

    #[test]
    fn test_required_static_oob_unsupported() {
        let device_uuid = Uuid::new_v4();
        let mut p = params();
        p.static_oob = Some(KeyBytes::new([0x42; 16]));
        p.require_static_oob = true;
        let mut session = ProvisioningSession::new(device_uuid, p);
        let mut device = SimulatedDevice::new(device_uuid, 1);

        assert!(matches!(
            run(&mut session, &mut device, 0x0020),
            Err(ProvisioningError::UnsupportedAuthentication)
        ));
    }

    #[test]
    fn test_tampered_confirmation_is_hard_failure() {
        let device_uuid = Uuid::new_v4();
        let mut session = ProvisioningSession::new(device_uuid, params());
        let mut device = SimulatedDevice::new(device_uuid, 1);
        device.set_tamper_confirmation(true);

        assert!(matches!(
            run(&mut session, &mut device, 0x0010),
            Err(ProvisioningError::ConfirmationMismatch)
        ));
        assert_eq!(session.state(), ProvisioningState::Failed);
        assert!(!session.has_key_material());
        // Terminal sessions accept nothing further
        assert!(matches!(
            session.handle_pdu(ProvisioningPdu::Complete),
            Err(ProvisioningError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let device_uuid = Uuid::new_v4();
        let mut session = ProvisioningSession::new(device_uuid, params());
        session.invite().unwrap();
        let mut caps = SimulatedDevice::new(device_uuid, 1).capabilities();
        caps.algorithms = Algorithms::empty();

        assert!(matches!(
            session.handle_pdu(ProvisioningPdu::Capabilities(caps)),
            Err(ProvisioningError::UnsupportedAlgorithm)
        ));
        assert_eq!(session.state(), ProvisioningState::Failed);
    }

    #[test]
    fn test_invalid_public_key() {
        let device_uuid = Uuid::new_v4();
        let mut session = ProvisioningSession::new(device_uuid, params());
        session.invite().unwrap();
        let caps = SimulatedDevice::new(device_uuid, 1).capabilities();
        session
            .handle_pdu(ProvisioningPdu::Capabilities(caps))
            .unwrap();

        assert!(matches!(
            session.handle_pdu(ProvisioningPdu::PublicKey([0x01; 64])),
            Err(ProvisioningError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_unexpected_pdu_and_device_failure() {
        let mut session = ProvisioningSession::new(Uuid::new_v4(), params());
        session.invite().unwrap();
        assert!(matches!(
            session.handle_pdu(ProvisioningPdu::Complete),
            Err(ProvisioningError::UnexpectedPdu { .. })
        ));

        let mut session = ProvisioningSession::new(Uuid::new_v4(), params());
        session.invite().unwrap();
        assert!(matches!(
            session.handle_pdu(ProvisioningPdu::Failed(
                mesh_wire::FailureCode::DecryptionFailed
            )),
            Err(ProvisioningError::EncryptionFailure)
        ));
    }

    #[test]
    fn test_missing_address_fails_before_data() {
        let device_uuid = Uuid::new_v4();
        let mut session = ProvisioningSession::new(device_uuid, params());
        let mut device = SimulatedDevice::new(device_uuid, 1);

        let mut queue = vec![session.invite().unwrap()];
        let mut result = Ok(());
        'outer: while let Some(pdu) = queue.pop() {
            for reply in device.handle_pdu(pdu) {
                match session.handle_pdu(reply) {
                    Ok(t) => queue.extend(t.outgoing.into_iter().rev()),
                    Err(e) => {
                        result = Err(e);
                        break 'outer;
                    }
                }
            }
        }
        assert!(matches!(result, Err(ProvisioningError::NoAddressAssigned)));
    }

    #[test]
    fn test_cancel_drops_key_material() {
        let mut session = ProvisioningSession::new(Uuid::new_v4(), params());
        session.invite().unwrap();
        session.cancel();
        assert_eq!(session.state(), ProvisioningState::Cancelled);
        assert!(!session.has_key_material());

        // No-op once terminal
        session.fail("late timeout");
        assert_eq!(session.state(), ProvisioningState::Cancelled);
    }
}
