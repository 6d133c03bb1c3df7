//! Encryption at rest for the token record
//!
//! Derives a symmetric key from the local user identity and encrypts the
//! serialized grant with AES-256-GCM. The key is re-derived on every call and
//! never cached or persisted.
//!
//! # Security
//!
//! A machine-identity-derived key with a hard-coded salt protects against
//! casual disk inspection, not a determined local attacker. Deployments that
//! need stronger guarantees set `GMAIL_MCP_TOKEN_KEY` to an externally
//! supplied passphrase, which replaces the username as the derivation input.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Application-specific derivation salt (fixed across installs)
const SECRET_SALT: &[u8] = b"mcp-gmail-server-salt-v1";

/// AES-GCM standard IV size
const IV_LEN: usize = 12;

/// AES-GCM authentication tag size
const TAG_LEN: usize = 16;

/// One encrypted grant as stored on disk
///
/// All fields are hex-encoded binary. A record is either fully valid
/// (decrypts and deserializes) or treated as absent by the token store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Per-record random initialization vector (12 bytes)
    pub iv: String,
    /// Ciphertext without the trailing authentication tag
    pub content: String,
    /// GCM authentication tag (16 bytes)
    pub tag: String,
}

/// Derive the 32-byte symmetric key
///
/// scrypt over the local username (or `GMAIL_MCP_TOKEN_KEY` when set) and the
/// fixed application salt, with the same cost parameters the original token
/// format was written with (N=2^14, r=8, p=1). Deterministic: the same
/// machine/user always yields the same key.
pub fn derive_key() -> AppResult<[u8; 32]> {
    let password = std::env::var("GMAIL_MCP_TOKEN_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var("USER").ok())
        .or_else(|| std::env::var("USERNAME").ok())
        .unwrap_or_else(|| "default-user".to_owned());

    let params = scrypt::Params::new(14, 8, 1, 32)
        .map_err(|e| AppError::Internal(format!("invalid scrypt params: {e}")))?;
    let mut key = [0u8; 32];
    scrypt::scrypt(password.as_bytes(), SECRET_SALT, &params, &mut key)
        .map_err(|e| AppError::Internal(format!("key derivation failed: {e}")))?;
    Ok(key)
}

/// Encrypt a plaintext payload
///
/// Generates a fresh random 12-byte IV per call (never reused) and splits the
/// GCM tag out of the ciphertext so the on-disk record carries it separately.
pub fn encrypt(plaintext: &[u8]) -> AppResult<EncryptedRecord> {
    let key = derive_key()?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| AppError::Internal(format!("cipher init failed: {e}")))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| AppError::Internal("encryption failed".to_owned()))?;
    let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);

    Ok(EncryptedRecord {
        iv: hex::encode(nonce),
        content: hex::encode(ciphertext),
        tag: hex::encode(tag),
    })
}

/// Decrypt a stored record
///
/// # Errors
///
/// Returns `Integrity` if any field is malformed or the authentication tag
/// does not verify (tampered data or wrong key). Never returns partial
/// plaintext on failure.
pub fn decrypt(record: &EncryptedRecord) -> AppResult<Vec<u8>> {
    let iv = decode_field(&record.iv, "iv")?;
    let content = decode_field(&record.content, "content")?;
    let tag = decode_field(&record.tag, "tag")?;
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(AppError::Integrity("record field length mismatch".to_owned()));
    }

    let key = derive_key()?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| AppError::Internal(format!("cipher init failed: {e}")))?;

    let mut sealed = content;
    sealed.extend_from_slice(&tag);
    cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
        .map_err(|_| AppError::Integrity("authentication tag mismatch".to_owned()))
}

/// Decode one hex field of a record
fn decode_field(value: &str, field: &str) -> AppResult<Vec<u8>> {
    hex::decode(value).map_err(|_| AppError::Integrity(format!("malformed {field} encoding")))
}

#[cfg(test)]
mod tests {
    use super::{decrypt, derive_key, encrypt};
    use crate::errors::AppError;

    #[test]
    fn roundtrips_arbitrary_byte_strings() {
        for plaintext in [
            &b""[..],
            &b"hello"[..],
            &b"{\"access_token\":\"ya29.x\"}"[..],
            &[0u8, 255, 1, 254, 127][..],
        ] {
            let record = encrypt(plaintext).expect("encrypt succeeds");
            let decrypted = decrypt(&record).expect("decrypt succeeds");
            assert_eq!(decrypted, plaintext);
        }
    }

    #[test]
    fn key_derivation_is_deterministic() {
        assert_eq!(derive_key().unwrap(), derive_key().unwrap());
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let a = encrypt(b"same payload").unwrap();
        let b = encrypt(b"same payload").unwrap();
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn detects_tampered_ciphertext() {
        let mut record = encrypt(b"sensitive grant").unwrap();
        let mut raw = hex::decode(&record.content).unwrap();
        raw[0] ^= 0x01;
        record.content = hex::encode(raw);

        match decrypt(&record) {
            Err(AppError::Integrity(_)) => {}
            other => panic!("expected integrity failure, got {other:?}"),
        }
    }

    #[test]
    fn detects_tampered_tag() {
        let mut record = encrypt(b"sensitive grant").unwrap();
        let mut raw = hex::decode(&record.tag).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x80;
        record.tag = hex::encode(raw);

        match decrypt(&record) {
            Err(AppError::Integrity(_)) => {}
            other => panic!("expected integrity failure, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_hex_fields() {
        let mut record = encrypt(b"grant").unwrap();
        record.iv = "zz-not-hex".to_owned();
        assert!(matches!(decrypt(&record), Err(AppError::Integrity(_))));
    }
}
