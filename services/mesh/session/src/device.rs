//! Device side of the provisioning handshake.
//!
//! [`SimulatedDevice`] answers a provisioner exactly like an unprovisioned
//! node would. It backs the loopback mode of the CLI and the end-to-end
//! tests.

use crate::bearer::ProvisioningBearer;
use crate::context::ProvisioningContext;
use crate::error::ProvisioningError;
use mesh_security::crypto::constant_time_eq;
use mesh_security::provisioning::{
    confirmation_inputs, confirmation_key, confirmation_salt, confirmation_value,
    decrypt_provisioning_data, generate_random, provisioning_salt,
};
use mesh_security::{EcdhKeyPair, KeyBytes, SessionKeys};
use mesh_wire::provisioning::{
    InputOobActions, OutputOobActions, PublicKeyType, StaticOobType, PUBLIC_KEY_SIZE,
};
use mesh_wire::{
    Algorithms, AuthenticationMethod, Capabilities, FailureCode, ProvisioningFlags,
    ProvisioningPdu, Start,
};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration a device received in the provisioning data
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionedNode {
    /// Primary element address
    pub unicast_address: u16,
    /// Network key
    pub network_key: KeyBytes,
    /// Network key index
    pub network_key_index: u16,
    /// IV index
    pub iv_index: u32,
    /// Key refresh / IV update flags
    pub flags: ProvisioningFlags,
    /// Device key
    pub device_key: KeyBytes,
}

impl fmt::Debug for ProvisionedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedNode")
            .field("unicast_address", &format_args!("0x{:04X}", self.unicast_address))
            .field("network_key_index", &self.network_key_index)
            .field("iv_index", &self.iv_index)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Invite,
    Start,
    PublicKey,
    Confirmation,
    Random,
    Data,
    Done,
}

/// Unprovisioned device answering a provisioner
pub struct SimulatedDevice {
    device_uuid: Uuid,
    element_count: u8,
    static_oob: Option<KeyBytes>,
    tamper_confirmation: bool,
    expect: Expect,
    context: Option<ProvisioningContext>,
    provisioned: Option<ProvisionedNode>,
}

impl SimulatedDevice {
    /// Device with `element_count` elements and no static OOB
    pub fn new(device_uuid: Uuid, element_count: u8) -> Self {
        Self {
            device_uuid,
            element_count: element_count.max(1),
            static_oob: None,
            tamper_confirmation: false,
            expect: Expect::Invite,
            context: Some(ProvisioningContext::new()),
            provisioned: None,
        }
    }

    /// Advertise static OOB with this value
    pub fn with_static_oob(mut self, value: KeyBytes) -> Self {
        self.static_oob = Some(value);
        self
    }

    /// Corrupt the confirmation value sent to the provisioner
    pub fn set_tamper_confirmation(&mut self, tamper: bool) {
        self.tamper_confirmation = tamper;
    }

    /// Device UUID
    pub fn device_uuid(&self) -> Uuid {
        self.device_uuid
    }

    /// Capabilities PDU content
    pub fn capabilities(&self) -> Capabilities {
        let static_oob_type = if self.static_oob.is_some() {
            StaticOobType::AVAILABLE
        } else {
            StaticOobType::empty()
        };
        Capabilities {
            element_count: self.element_count,
            algorithms: Algorithms::FIPS_P256,
            public_key_type: PublicKeyType::empty(),
            static_oob_type,
            output_oob_size: 0,
            output_oob_actions: OutputOobActions::empty(),
            input_oob_size: 0,
            input_oob_actions: InputOobActions::empty(),
        }
    }

    /// Node configuration once provisioning completed
    pub fn provisioned(&self) -> Option<&ProvisionedNode> {
        self.provisioned.as_ref()
    }

    /// Answer one provisioner PDU. Errors are reported as a Failed PDU and
    /// end the exchange.
    pub fn handle_pdu(&mut self, pdu: ProvisioningPdu) -> Vec<ProvisioningPdu> {
        match self.respond(pdu) {
            Ok(replies) => replies,
            Err(code) => {
                warn!("Device {} failing provisioning: {}", self.device_uuid, code);
                self.expect = Expect::Done;
                self.context = None;
                vec![ProvisioningPdu::Failed(code)]
            }
        }
    }

    /// Serve a provisioner over `bearer` until the exchange ends
    pub async fn run<B: ProvisioningBearer>(
        &mut self,
        bearer: &mut B,
    ) -> Result<(), ProvisioningError> {
        loop {
            let raw = bearer.recv_pdu().await?;
            let replies = match ProvisioningPdu::decode(&raw) {
                Ok(pdu) => self.handle_pdu(pdu),
                Err(e) => {
                    debug!("Device {} got undecodable pdu: {}", self.device_uuid, e);
                    self.expect = Expect::Done;
                    self.context = None;
                    vec![ProvisioningPdu::Failed(FailureCode::InvalidFormat)]
                }
            };
            for reply in replies {
                let done = match &reply {
                    ProvisioningPdu::Complete => Some(Ok(())),
                    ProvisioningPdu::Failed(code) => {
                        Some(Err(ProvisioningError::DeviceReported(*code)))
                    }
                    _ => None,
                };
                bearer.send_pdu(reply.encode()).await?;
                if let Some(result) = done {
                    return result;
                }
            }
        }
    }

    fn context_mut(&mut self) -> Result<&mut ProvisioningContext, FailureCode> {
        self.context.as_mut().ok_or(FailureCode::UnexpectedPdu)
    }

    fn respond(&mut self, pdu: ProvisioningPdu) -> Result<Vec<ProvisioningPdu>, FailureCode> {
        match (self.expect, pdu) {
            (Expect::Invite, ProvisioningPdu::Invite { attention_duration }) => {
                debug!(
                    "Device {} invited, attention {} s",
                    self.device_uuid, attention_duration
                );
                let caps = ProvisioningPdu::Capabilities(self.capabilities());
                let invite = ProvisioningPdu::Invite { attention_duration };
                let ctx = self.context_mut()?;
                ctx.invite = invite.parameters().to_vec();
                ctx.capabilities = caps.parameters().to_vec();
                self.expect = Expect::Start;
                Ok(vec![caps])
            }
            (Expect::Start, ProvisioningPdu::Start(start)) => {
                self.on_start(start)?;
                self.expect = Expect::PublicKey;
                Ok(Vec::new())
            }
            (Expect::PublicKey, ProvisioningPdu::PublicKey(key)) => {
                let reply = self.on_public_key(key)?;
                self.expect = Expect::Confirmation;
                Ok(vec![reply])
            }
            (Expect::Confirmation, ProvisioningPdu::Confirmation(value)) => {
                let reply = self.on_confirmation(value)?;
                self.expect = Expect::Random;
                Ok(vec![reply])
            }
            (Expect::Random, ProvisioningPdu::Random(random)) => {
                let reply = self.on_random(random)?;
                self.expect = Expect::Data;
                Ok(vec![reply])
            }
            (Expect::Data, ProvisioningPdu::Data { encrypted, mic }) => {
                let ctx = self.context_mut()?;
                let keys = ctx.session_keys.as_ref().ok_or(FailureCode::UnexpectedError)?;
                let data = decrypt_provisioning_data(keys, &encrypted, &mic)
                    .map_err(|_| FailureCode::DecryptionFailed)?;
                let node = ProvisionedNode {
                    unicast_address: data.unicast_address,
                    network_key: KeyBytes::new(data.network_key),
                    network_key_index: data.key_index,
                    iv_index: data.iv_index,
                    flags: data.flags,
                    device_key: keys.device_key().clone(),
                };
                info!(
                    "Device {} provisioned at 0x{:04X}",
                    self.device_uuid, node.unicast_address
                );
                self.provisioned = Some(node);
                self.context = None;
                self.expect = Expect::Done;
                Ok(vec![ProvisioningPdu::Complete])
            }
            _ => Err(FailureCode::UnexpectedPdu),
        }
    }

    fn on_start(&mut self, start: Start) -> Result<(), FailureCode> {
        if start.algorithm != 0x00 || start.public_key != 0x00 {
            return Err(FailureCode::InvalidFormat);
        }
        let auth_value = match (start.auth_method, &self.static_oob) {
            (AuthenticationMethod::NoOob, _) => [0u8; 16],
            (AuthenticationMethod::StaticOob, Some(value)) => *value.as_bytes(),
            _ => return Err(FailureCode::InvalidFormat),
        };
        let ctx = self.context_mut()?;
        ctx.start = ProvisioningPdu::Start(start).parameters().to_vec();
        ctx.auth_method = Some(start.auth_method);
        ctx.auth_value = auth_value;
        Ok(())
    }

    fn on_public_key(
        &mut self,
        provisioner_key: [u8; PUBLIC_KEY_SIZE],
    ) -> Result<ProvisioningPdu, FailureCode> {
        let ctx = self.context_mut()?;
        let key_pair = EcdhKeyPair::generate();
        let secret = key_pair
            .shared_secret(&provisioner_key)
            .map_err(|_| FailureCode::InvalidFormat)?;
        let inputs = confirmation_inputs(
            &ctx.invite,
            &ctx.capabilities,
            &ctx.start,
            &provisioner_key,
            key_pair.public_key(),
        )
        .map_err(|_| FailureCode::UnexpectedError)?;

        ctx.confirmation_salt = confirmation_salt(&inputs);
        ctx.confirmation_key = Some(confirmation_key(&secret, &ctx.confirmation_salt));
        ctx.peer_public_key = Some(provisioner_key);
        ctx.secret = Some(secret);
        let reply = ProvisioningPdu::PublicKey(*key_pair.public_key());
        ctx.key_pair = Some(key_pair);
        Ok(reply)
    }

    fn on_confirmation(&mut self, value: [u8; 16]) -> Result<ProvisioningPdu, FailureCode> {
        let tamper = self.tamper_confirmation;
        let ctx = self.context_mut()?;
        let key = ctx
            .confirmation_key
            .as_ref()
            .ok_or(FailureCode::UnexpectedError)?;
        let random = generate_random();
        let mut confirmation = confirmation_value(key, &random, &ctx.auth_value);
        if tamper {
            confirmation[0] ^= 0xFF;
        }
        ctx.own_random = random;
        ctx.peer_confirmation = Some(value);
        Ok(ProvisioningPdu::Confirmation(confirmation))
    }

    fn on_random(&mut self, provisioner_random: [u8; 16]) -> Result<ProvisioningPdu, FailureCode> {
        let ctx = self.context_mut()?;
        let (key, received) = match (&ctx.confirmation_key, ctx.peer_confirmation) {
            (Some(key), Some(received)) => (key, received),
            _ => return Err(FailureCode::UnexpectedPdu),
        };
        let expected = confirmation_value(key, &provisioner_random, &ctx.auth_value);
        if !constant_time_eq(&expected, &received) {
            return Err(FailureCode::ConfirmationFailed);
        }

        let secret = ctx.secret.as_ref().ok_or(FailureCode::UnexpectedError)?;
        let salt = provisioning_salt(&ctx.confirmation_salt, &provisioner_random, &ctx.own_random);
        ctx.session_keys = Some(SessionKeys::derive(secret, &salt));
        ctx.peer_random = Some(provisioner_random);
        Ok(ProvisioningPdu::Random(ctx.own_random))
    }
}

impl fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("device_uuid", &self.device_uuid)
            .field("element_count", &self.element_count)
            .field("expect", &self.expect)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_pdu_fails() {
        let mut device = SimulatedDevice::new(Uuid::new_v4(), 1);
        let replies = device.handle_pdu(ProvisioningPdu::Random([0; 16]));
        assert_eq!(
            replies,
            vec![ProvisioningPdu::Failed(FailureCode::UnexpectedPdu)]
        );
    }

    #[test]
    fn test_static_oob_start_without_value_rejected() {
        let mut device = SimulatedDevice::new(Uuid::new_v4(), 1);
        device.handle_pdu(ProvisioningPdu::Invite {
            attention_duration: 0,
        });
        let replies = device.handle_pdu(ProvisioningPdu::Start(Start::fips_p256(
            AuthenticationMethod::StaticOob,
        )));
        assert_eq!(
            replies,
            vec![ProvisioningPdu::Failed(FailureCode::InvalidFormat)]
        );
    }

    #[test]
    fn test_capabilities_advertise_static_oob() {
        let device =
            SimulatedDevice::new(Uuid::new_v4(), 3).with_static_oob(KeyBytes::new([1; 16]));
        let caps = device.capabilities();
        assert_eq!(caps.element_count, 3);
        assert!(caps.static_oob_type.contains(StaticOobType::AVAILABLE));
        assert!(caps.algorithms.contains(Algorithms::FIPS_P256));
    }
}
