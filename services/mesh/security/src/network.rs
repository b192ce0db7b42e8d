//! Network PDU encryption and header obfuscation.

use crate::crypto::{aes_ecb, ccm_decrypt, ccm_encrypt, NONCE_SIZE};
use crate::error::SecurityError;
use crate::keys::NetworkKeyMaterial;
use bytes::{BufMut, Bytes, BytesMut};
use mesh_wire::network::{
    header_octet, net_mic_size, parse_header_octet, MAX_NETWORK_PDU_SIZE, MIN_NETWORK_PDU_SIZE,
    NETWORK_HEADER_SIZE,
};
use mesh_wire::NetworkPdu;
use tracing::trace;

/// Octets of the encrypted part used as PrivacyRandom
const PRIVACY_RANDOM_SIZE: usize = 7;

/// Network nonce: 0x00 || CTL|TTL || SEQ || SRC || 0x0000 || IV index
fn network_nonce(header: &[u8; 6], iv_index: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[1..7].copy_from_slice(header);
    nonce[9..].copy_from_slice(&iv_index.to_be_bytes());
    nonce
}

/// PECB = e(PrivacyKey, 0x0000000000 || IV index || PrivacyRandom)
fn pecb(privacy_key: &[u8; 16], iv_index: u32, privacy_random: &[u8]) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[5..9].copy_from_slice(&iv_index.to_be_bytes());
    block[9..].copy_from_slice(&privacy_random[..PRIVACY_RANDOM_SIZE]);
    aes_ecb(privacy_key, &block)
}

fn xor_header(header: &mut [u8; 6], pecb: &[u8; 16]) {
    for (h, p) in header.iter_mut().zip(pecb.iter()) {
        *h ^= p;
    }
}

/// Encrypt and obfuscate a network PDU.
///
/// Deterministic for identical inputs.
pub fn encrypt_network_pdu(
    material: &NetworkKeyMaterial,
    iv_index: u32,
    pdu: &NetworkPdu,
) -> Result<Bytes, SecurityError> {
    pdu.validate()?;

    let mut header = pdu.obfuscated_header();
    let nonce = network_nonce(&header, iv_index);

    let mut plaintext = BytesMut::with_capacity(2 + pdu.transport_pdu.len());
    plaintext.put_u16(pdu.dst);
    plaintext.extend_from_slice(&pdu.transport_pdu);
    let encrypted = ccm_encrypt(
        &material.encryption_key,
        &nonce,
        &plaintext,
        pdu.net_mic_size(),
    )?;

    xor_header(&mut header, &pecb(&material.privacy_key, iv_index, &encrypted));

    let mut out = BytesMut::with_capacity(NETWORK_HEADER_SIZE + encrypted.len());
    out.put_u8(header_octet(iv_index & 1 == 1, material.nid));
    out.extend_from_slice(&header);
    out.extend_from_slice(&encrypted);
    Ok(out.freeze())
}

/// IV index a received PDU was sent with, given its IVI bit
pub fn effective_iv_index(ivi: bool, iv_index: u32) -> Result<u32, SecurityError> {
    if ivi == (iv_index & 1 == 1) {
        Ok(iv_index)
    } else {
        iv_index
            .checked_sub(1)
            .ok_or(SecurityError::Malformed("ivi does not match iv index 0"))
    }
}

/// Check the outer length and split the first octet into IVI and NID
pub fn parse_network_header(bytes: &[u8]) -> Result<(bool, u8), SecurityError> {
    if bytes.len() < MIN_NETWORK_PDU_SIZE || bytes.len() > MAX_NETWORK_PDU_SIZE {
        return Err(SecurityError::Malformed("network pdu length out of range"));
    }
    Ok(parse_header_octet(bytes[0]))
}

/// Try a single key. `iv_index` must already be the effective IV index.
pub fn decrypt_with(
    material: &NetworkKeyMaterial,
    bytes: &[u8],
    iv_index: u32,
) -> Result<NetworkPdu, SecurityError> {
    let (_, nid) = parse_network_header(bytes)?;
    if nid != material.nid {
        return Err(SecurityError::AuthenticationFailed);
    }

    let encrypted = &bytes[NETWORK_HEADER_SIZE..];
    let mut header = [0u8; 6];
    header.copy_from_slice(&bytes[1..NETWORK_HEADER_SIZE]);
    xor_header(&mut header, &pecb(&material.privacy_key, iv_index, encrypted));

    let ctl = header[0] & 0x80 != 0;
    let mic_size = net_mic_size(ctl);
    if encrypted.len() < 2 + 1 + mic_size {
        return Err(SecurityError::AuthenticationFailed);
    }

    let nonce = network_nonce(&header, iv_index);
    let plaintext = ccm_decrypt(&material.encryption_key, &nonce, encrypted, mic_size)?;
    let dst = u16::from_be_bytes([plaintext[0], plaintext[1]]);
    let transport_pdu = Bytes::copy_from_slice(&plaintext[2..]);

    Ok(NetworkPdu::from_parts(header, dst, transport_pdu))
}

/// Decrypt a network PDU, trying each candidate whose NID matches.
///
/// Returns the PDU and the position of the candidate that authenticated it.
pub fn decrypt_network_pdu<'a, I>(
    bytes: &[u8],
    iv_index: u32,
    candidates: I,
) -> Result<(NetworkPdu, usize), SecurityError>
where
    I: IntoIterator<Item = &'a NetworkKeyMaterial>,
{
    let (ivi, nid) = parse_network_header(bytes)?;
    let iv_index = effective_iv_index(ivi, iv_index)?;

    for (position, material) in candidates.into_iter().enumerate() {
        if material.nid != nid {
            continue;
        }
        match decrypt_with(material, bytes, iv_index) {
            Ok(pdu) => return Ok((pdu, position)),
            Err(_) => trace!("NID 0x{:02X} candidate {} did not authenticate", nid, position),
        }
    }

    Err(SecurityError::AuthenticationFailed)
}
