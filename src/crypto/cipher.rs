//! Call-identifier keyed authenticated encryption
//!
//! `ctx = nonce || AES-256-GCM(k, plaintext)` with `k = sha256(nonce XOR call_id)`.
//! A storage node only ever sees `ctx` and `sha256(call_id)`, so it cannot
//! derive `k`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::{JodiError, Result};
use crate::utils::{from_base64, random_bytes, sha256, to_base64, xor};

/// Length of the per-publish random nonce.
pub const NONCE_LEN: usize = 32;

// Each derived key encrypts exactly one message, so a fixed AEAD nonce is sound.
const AEAD_NONCE: [u8; 12] = [0u8; 12];

/// Ciphertext split into its random nonce and AEAD body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ciphertext {
    pub nonce: [u8; NONCE_LEN],
    pub body: Vec<u8>,
}

fn derive_key(nonce: &[u8], call_id: &[u8]) -> [u8; 32] {
    sha256(&[&xor(nonce, call_id)])
}

/// Encrypt `plaintext` under a key derived from `call_id` and a fresh nonce.
pub fn encrypt(call_id: &[u8; 32], plaintext: &[u8]) -> Result<Ciphertext> {
    let nonce = random_bytes::<NONCE_LEN>();
    let key = derive_key(&nonce, call_id);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| JodiError::Crypto(format!("key init failed: {}", e)))?;
    let body = cipher
        .encrypt(Nonce::from_slice(&AEAD_NONCE), plaintext)
        .map_err(|e| JodiError::Crypto(format!("encrypt failed: {}", e)))?;
    Ok(Ciphertext { nonce, body })
}

/// Authenticated decryption; fails with `VerificationFailure` on a wrong key or tampering.
pub fn decrypt(call_id: &[u8; 32], ctx: &Ciphertext) -> Result<Vec<u8>> {
    let key = derive_key(&ctx.nonce, call_id);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| JodiError::Crypto(format!("key init failed: {}", e)))?;
    cipher
        .decrypt(Nonce::from_slice(&AEAD_NONCE), ctx.body.as_slice())
        .map_err(|_| JodiError::VerificationFailure("ciphertext authentication failed".to_string()))
}

impl Ciphertext {
    /// Wire form: `base64(nonce) ":" base64(body)`.
    pub fn encode(&self) -> String {
        format!("{}:{}", to_base64(&self.nonce), to_base64(&self.body))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let (nonce_b64, body_b64) = encoded
            .split_once(':')
            .ok_or_else(|| JodiError::Serialization("ctx must be nonce:ciphertext".to_string()))?;
        let nonce_bytes = from_base64(nonce_b64)?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes.as_slice().try_into().map_err(|_| {
            JodiError::Serialization(format!(
                "ctx nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce_bytes.len()
            ))
        })?;
        Ok(Self {
            nonce,
            body: from_base64(body_b64)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let call_id = sha256(&[b"call id"]);
        let ctx = encrypt(&call_id, b"tok-A").unwrap();
        assert_eq!(decrypt(&call_id, &ctx).unwrap(), b"tok-A");
    }

    #[test]
    fn test_wrong_call_id_fails() {
        let ctx = encrypt(&sha256(&[b"right"]), b"tok-A").unwrap();
        let err = decrypt(&sha256(&[b"wrong"]), &ctx).unwrap_err();
        assert!(matches!(err, JodiError::VerificationFailure(_)));
    }

    #[test]
    fn test_tampered_body_fails() {
        let call_id = sha256(&[b"call id"]);
        let mut ctx = encrypt(&call_id, b"tok-A").unwrap();
        ctx.body[0] ^= 0x01;
        assert!(decrypt(&call_id, &ctx).is_err());
    }

    #[test]
    fn test_fresh_nonce_per_publish() {
        let call_id = sha256(&[b"call id"]);
        let a = encrypt(&call_id, b"tok-A").unwrap();
        let b = encrypt(&call_id, b"tok-A").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.body, b.body);
    }

    #[test]
    fn test_wire_encoding() {
        let call_id = sha256(&[b"call id"]);
        let ctx = encrypt(&call_id, b"tok-A").unwrap();
        let encoded = ctx.encode();
        assert!(encoded.contains(':'));
        assert_eq!(Ciphertext::decode(&encoded).unwrap(), ctx);
        assert!(Ciphertext::decode("no-separator").is_err());
        assert!(Ciphertext::decode("AAAA:AAAA").is_err());
    }
}
