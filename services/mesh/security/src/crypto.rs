//! Cryptographic primitives and mesh key derivation functions.
//!
//! ```text
//! s1(M)          = AES-CMAC(ZERO, M)
//! k1(N, SALT, P) = AES-CMAC(AES-CMAC(SALT, N), P)
//! k2(N, P)       = NID || EncryptionKey || PrivacyKey
//! k3(N)          = 64-bit network id
//! k4(N)          = 6-bit AID
//! ```

use crate::error::SecurityError;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use ccm::aead::AeadInPlace;
use ccm::consts::{U13, U4, U8};
use ccm::Ccm;
use cmac::{Cmac, Mac};
use subtle::ConstantTimeEq;

/// 128-bit key or block
pub type Block = [u8; 16];

/// AES-CCM nonce length used throughout mesh
pub const NONCE_SIZE: usize = 13;

const ZERO: Block = [0u8; 16];

type CcmMic4 = Ccm<Aes128, U4, U13>;
type CcmMic8 = Ccm<Aes128, U8, U13>;

/// AES-CMAC over the concatenation of `parts`
pub fn aes_cmac_parts(key: &Block, parts: &[&[u8]]) -> Block {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(key));
    for part in parts {
        mac.update(part);
    }
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&tag);
    out
}

/// AES-CMAC
pub fn aes_cmac(key: &Block, message: &[u8]) -> Block {
    aes_cmac_parts(key, &[message])
}

/// Single-block AES-128 encryption
pub fn aes_ecb(key: &Block, block: &Block) -> Block {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    let mut out = [0u8; 16];
    out.copy_from_slice(&buf);
    out
}

/// Salt generation function
pub fn s1(message: &[u8]) -> Block {
    aes_cmac(&ZERO, message)
}

/// Key derivation function k1
pub fn k1(n: &[u8], salt: &Block, p: &[u8]) -> Block {
    let t = aes_cmac(salt, n);
    aes_cmac(&t, p)
}

/// Network key material derivation: returns (NID, encryption key, privacy key)
pub fn k2(n: &Block, p: &[u8]) -> (u8, Block, Block) {
    let salt = s1(b"smk2");
    let t = aes_cmac(&salt, n);
    let t1 = aes_cmac_parts(&t, &[p, &[0x01]]);
    let t2 = aes_cmac_parts(&t, &[&t1, p, &[0x02]]);
    let t3 = aes_cmac_parts(&t, &[&t2, p, &[0x03]]);
    (t1[15] & 0x7F, t2, t3)
}

/// Network id derivation
pub fn k3(n: &Block) -> [u8; 8] {
    let salt = s1(b"smk3");
    let t = aes_cmac(&salt, n);
    let full = aes_cmac(&t, b"id64\x01");
    let mut out = [0u8; 8];
    out.copy_from_slice(&full[8..]);
    out
}

/// Application key identifier derivation
pub fn k4(n: &Block) -> u8 {
    let salt = s1(b"smk4");
    let t = aes_cmac(&salt, n);
    aes_cmac(&t, b"id6\x01")[15] & 0x3F
}

/// AES-CCM encryption returning ciphertext || MIC
pub fn ccm_encrypt(
    key: &Block,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    mic_size: usize,
) -> Result<Vec<u8>, SecurityError> {
    let nonce = GenericArray::from_slice(nonce);
    let mut buf = plaintext.to_vec();

    match mic_size {
        4 => {
            let cipher = <CcmMic4 as KeyInit>::new(GenericArray::from_slice(key));
            let tag = cipher
                .encrypt_in_place_detached(nonce, &[], &mut buf)
                .map_err(|_| SecurityError::EncryptionFailure)?;
            buf.extend_from_slice(&tag);
        }
        8 => {
            let cipher = <CcmMic8 as KeyInit>::new(GenericArray::from_slice(key));
            let tag = cipher
                .encrypt_in_place_detached(nonce, &[], &mut buf)
                .map_err(|_| SecurityError::EncryptionFailure)?;
            buf.extend_from_slice(&tag);
        }
        _ => return Err(SecurityError::Malformed("mic size must be 4 or 8")),
    }

    Ok(buf)
}

/// AES-CCM decryption of ciphertext || MIC
pub fn ccm_decrypt(
    key: &Block,
    nonce: &[u8; NONCE_SIZE],
    data: &[u8],
    mic_size: usize,
) -> Result<Vec<u8>, SecurityError> {
    if data.len() < mic_size {
        return Err(SecurityError::Malformed("ciphertext shorter than mic"));
    }
    let nonce = GenericArray::from_slice(nonce);
    let (ciphertext, mic) = data.split_at(data.len() - mic_size);
    let mut buf = ciphertext.to_vec();

    let result = match mic_size {
        4 => <CcmMic4 as KeyInit>::new(GenericArray::from_slice(key)).decrypt_in_place_detached(
            nonce,
            &[],
            &mut buf,
            GenericArray::from_slice(mic),
        ),
        8 => <CcmMic8 as KeyInit>::new(GenericArray::from_slice(key)).decrypt_in_place_detached(
            nonce,
            &[],
            &mut buf,
            GenericArray::from_slice(mic),
        ),
        _ => return Err(SecurityError::Malformed("mic size must be 4 or 8")),
    };

    result.map_err(|_| SecurityError::AuthenticationFailed)?;
    Ok(buf)
}

/// Compare two byte strings in constant time.
///
/// Only the length is compared early; equal-length inputs are compared
/// without data-dependent branches.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
