//! Upper transport encryption of access payloads.

use crate::crypto::{ccm_decrypt, ccm_encrypt, NONCE_SIZE};
use crate::error::SecurityError;
use crate::keys::KeyBytes;
use bytes::Bytes;

const APPLICATION_NONCE: u8 = 0x01;
const DEVICE_NONCE: u8 = 0x02;

/// Network fields that feed the application and device nonces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMeta {
    /// SeqAuth (sequence number of the first segment)
    pub seq: u32,
    /// Source address
    pub src: u16,
    /// Destination address
    pub dst: u16,
    /// IV index
    pub iv_index: u32,
    /// 64-bit TransMIC
    pub szmic: bool,
}

impl AccessMeta {
    /// TransMIC size in octets
    pub fn trans_mic_size(&self) -> usize {
        if self.szmic {
            8
        } else {
            4
        }
    }

    fn nonce(&self, nonce_type: u8) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[0] = nonce_type;
        nonce[1] = (self.szmic as u8) << 7;
        nonce[2..5].copy_from_slice(&self.seq.to_be_bytes()[1..]);
        nonce[5..7].copy_from_slice(&self.src.to_be_bytes());
        nonce[7..9].copy_from_slice(&self.dst.to_be_bytes());
        nonce[9..].copy_from_slice(&self.iv_index.to_be_bytes());
        nonce
    }
}

/// Key securing an access payload
#[derive(Debug, Clone, Copy)]
pub enum AccessKey<'a> {
    /// Application key (application nonce, AKF=1)
    Application(&'a KeyBytes),
    /// Device key (device nonce, AKF=0)
    Device(&'a KeyBytes),
}

impl<'a> AccessKey<'a> {
    fn parts(self) -> (&'a KeyBytes, u8) {
        match self {
            AccessKey::Application(key) => (key, APPLICATION_NONCE),
            AccessKey::Device(key) => (key, DEVICE_NONCE),
        }
    }
}

/// Encrypt an access PDU into an upper transport PDU (payload || TransMIC)
pub fn encrypt_access_payload(
    key: AccessKey<'_>,
    meta: &AccessMeta,
    access_pdu: &[u8],
) -> Result<Bytes, SecurityError> {
    let (key, nonce_type) = key.parts();
    let sealed = ccm_encrypt(
        key.as_bytes(),
        &meta.nonce(nonce_type),
        access_pdu,
        meta.trans_mic_size(),
    )?;
    Ok(Bytes::from(sealed))
}

/// Decrypt an upper transport PDU into the access PDU
pub fn decrypt_access_payload(
    key: AccessKey<'_>,
    meta: &AccessMeta,
    upper_pdu: &[u8],
) -> Result<Bytes, SecurityError> {
    let (key, nonce_type) = key.parts();
    let plain = ccm_decrypt(
        key.as_bytes(),
        &meta.nonce(nonce_type),
        upper_pdu,
        meta.trans_mic_size(),
    )?;
    if plain.is_empty() {
        return Err(SecurityError::Malformed("empty access payload"));
    }
    Ok(Bytes::from(plain))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(szmic: bool) -> AccessMeta {
        AccessMeta {
            seq: 0x3129AB,
            src: 0x0003,
            dst: 0x1201,
            iv_index: 0x12345678,
            szmic,
        }
    }

    #[test]
    fn test_nonce_layout() {
        assert_eq!(
            meta(true).nonce(DEVICE_NONCE),
            [0x02, 0x80, 0x31, 0x29, 0xAB, 0x00, 0x03, 0x12, 0x01, 0x12, 0x34, 0x56, 0x78]
        );
    }

    #[test]
    fn test_round_trip_both_mic_sizes() {
        let key = KeyBytes::new([7; 16]);
        for szmic in [false, true] {
            let upper =
                encrypt_access_payload(AccessKey::Application(&key), &meta(szmic), b"\x82\x31")
                    .unwrap();
            assert_eq!(upper.len(), 2 + meta(szmic).trans_mic_size());
            let plain =
                decrypt_access_payload(AccessKey::Application(&key), &meta(szmic), &upper).unwrap();
            assert_eq!(&plain[..], b"\x82\x31");
        }
    }

    #[test]
    fn test_device_and_application_nonces_differ() {
        let key = KeyBytes::new([7; 16]);
        let upper =
            encrypt_access_payload(AccessKey::Device(&key), &meta(false), b"\x80\x08").unwrap();
        assert_eq!(
            decrypt_access_payload(AccessKey::Application(&key), &meta(false), &upper),
            Err(SecurityError::AuthenticationFailed)
        );
        assert!(decrypt_access_payload(AccessKey::Device(&key), &meta(false), &upper).is_ok());
    }

    #[test]
    fn test_wrong_meta_fails() {
        let key = KeyBytes::new([7; 16]);
        let upper =
            encrypt_access_payload(AccessKey::Device(&key), &meta(false), b"\x80\x08").unwrap();
        let mut other = meta(false);
        other.seq += 1;
        assert!(decrypt_access_payload(AccessKey::Device(&key), &other, &upper).is_err());
    }
}
