//! Encrypted persistence for the credential grant
//!
//! Owns the on-disk record exclusively. A record is either fully absent
//! (unauthenticated state) or fully valid; anything that fails to decrypt or
//! parse is treated as "never authenticated" so a corrupt token file can
//! never block the retry-authentication path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crypto::{self, EncryptedRecord};
use crate::errors::{AppError, AppResult};

/// Remaining lifetime below which a grant counts as expired
///
/// Refreshing slightly early avoids racing the provider-side cutoff.
const EXPIRY_MARGIN_MS: i64 = 60_000;

/// The credential bundle obtained from the authorization flow
///
/// Field names follow the provider token JSON (`expiry_date` is milliseconds
/// since the Unix epoch). Opaque to this system beyond serialization and the
/// expiry check. Exactly one grant is active per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Bearer token presented on API calls
    pub access_token: String,
    /// Long-lived token used to mint fresh access tokens (offline access)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token expiry, milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    /// Space-separated granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Token type, normally `Bearer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl Grant {
    /// Whether the access token is at (or within a minute of) expiry
    ///
    /// A grant without an expiry date is assumed live; the remote rejects it
    /// if not, and the invalidation path takes over from there.
    pub fn is_expired(&self) -> bool {
        self.expiry_date
            .is_some_and(|at| Utc::now().timestamp_millis() >= at - EXPIRY_MARGIN_MS)
    }
}

/// Store for the encrypted grant record
///
/// Sole owner of the on-disk record. All operations tolerate absence.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a store writing to `path`
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the record file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize, encrypt, and persist the grant, overwriting any prior record
    ///
    /// # Errors
    ///
    /// Returns `Persistence` on I/O failure. Fatal for this save attempt only;
    /// callers keep the in-memory grant and continue.
    pub async fn save(&self, grant: &Grant) -> AppResult<()> {
        let plaintext = serde_json::to_string(grant)
            .map_err(|e| AppError::Internal(format!("grant serialization failed: {e}")))?;
        let record = crypto::encrypt(plaintext.as_bytes())?;
        let body = serde_json::to_string_pretty(&record)
            .map_err(|e| AppError::Internal(format!("record serialization failed: {e}")))?;

        tokio::fs::write(&self.path, body).await.map_err(|e| {
            AppError::Persistence(format!("cannot write {}: {e}", self.path.display()))
        })?;
        info!("tokens saved securely");
        Ok(())
    }

    /// Load and decrypt the stored grant
    ///
    /// A missing file is the normal unauthenticated state, not an error. A
    /// present-but-invalid record (bad JSON, failed decryption, unparseable
    /// plaintext) is logged and also treated as absent.
    pub async fn load(&self) -> Option<Grant> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("cannot read token record: {e}");
                return None;
            }
        };

        let record: EncryptedRecord = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(e) => {
                warn!("token record is not valid JSON, treating as absent: {e}");
                return None;
            }
        };

        let plaintext = match crypto::decrypt(&record) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("token record rejected, treating as absent: {e}");
                return None;
            }
        };

        match serde_json::from_slice(&plaintext) {
            Ok(grant) => Some(grant),
            Err(e) => {
                warn!("decrypted grant is unparseable, treating as absent: {e}");
                None
            }
        }
    }

    /// Remove the stored record; an already-absent file is success
    pub async fn clear(&self) -> AppResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Persistence(format!(
                "cannot remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{Grant, TokenStore};
    use crate::crypto;

    /// Unique record path under the system temp directory
    fn temp_store() -> TokenStore {
        let path = std::env::temp_dir().join(format!(".tokens-{}.json", uuid::Uuid::new_v4()));
        TokenStore::new(path)
    }

    fn sample_grant() -> Grant {
        Grant {
            access_token: "ya29.sample".to_owned(),
            refresh_token: Some("1//refresh".to_owned()),
            expiry_date: Some(1_900_000_000_000),
            scope: Some("https://www.googleapis.com/auth/gmail.readonly".to_owned()),
            token_type: Some("Bearer".to_owned()),
        }
    }

    #[tokio::test]
    async fn load_after_save_returns_equal_grant() {
        let store = temp_store();
        let grant = sample_grant();
        store.save(&grant).await.expect("save succeeds");
        assert_eq!(store.load().await, Some(grant));
        store.clear().await.expect("clear succeeds");
    }

    #[tokio::test]
    async fn load_on_missing_path_is_absent_not_error() {
        let store = TokenStore::new(PathBuf::from("/nonexistent/dir/.tokens.json"));
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn load_on_wrong_ciphertext_is_absent_not_error() {
        let store = temp_store();

        // Well-shaped record whose ciphertext belongs to no stored grant.
        let mut record = crypto::encrypt(b"{\"access_token\":\"x\"}").unwrap();
        let mut raw = hex::decode(&record.content).unwrap();
        raw[0] ^= 0xff;
        record.content = hex::encode(raw);
        tokio::fs::write(store.path(), serde_json::to_string(&record).unwrap())
            .await
            .unwrap();

        assert_eq!(store.load().await, None);
        store.clear().await.expect("clear succeeds");
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let store = temp_store();
        store.save(&sample_grant()).await.expect("save succeeds");
        store.clear().await.expect("first clear succeeds");
        store.clear().await.expect("second clear on absent file succeeds");
        assert_eq!(store.load().await, None);
    }
}
