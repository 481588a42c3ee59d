//! Credential vault: encrypts, persists and loads the remote access token
//! and sync configuration.
//!
//! The token is stored ChaCha20-Poly1305-encrypted under a per-install
//! random key held in the `SecretStore` (OS keychain in a real deployment).
//! Only the vault ever holds the plaintext, in memory, for the process
//! lifetime. Storage corruption degrades the sync feature to disabled; it
//! never propagates out of `load`.

use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use log::warn;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::VaultError;
use crate::model::SyncConfig;
use crate::store::{ConfigStore, SecretStore};

const CONFIG_VERSION: &str = "1";
const NONCE_LEN: usize = 12;

/// Generate a fresh random vault key. `SecretStore` implementations call
/// this on first use.
pub fn generate_vault_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Persisted config record, one document per install.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedConfig {
    encrypted_token: String,
    document_id: Option<String>,
    enabled: bool,
    configured_at: DateTime<Utc>,
    last_sync_time: Option<DateTime<Utc>>,
    last_read_time: Option<DateTime<Utc>>,
    last_known_remote_hash: Option<String>,
    version: String,
}

#[derive(Default)]
struct VaultSession {
    token: Option<String>,
    last_good: Option<SyncConfig>,
}

pub struct CredentialVault {
    config_store: Arc<dyn ConfigStore>,
    secrets: Arc<dyn SecretStore>,
    session: RwLock<VaultSession>,
}

impl CredentialVault {
    pub fn new(config_store: Arc<dyn ConfigStore>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            config_store,
            secrets,
            session: RwLock::new(VaultSession::default()),
        }
    }

    /// Encrypt and persist a new credential, round-trip verifying the
    /// ciphertext before anything is written.
    ///
    /// A credential change resets the sync bookkeeping timestamps; a new
    /// token means the old read/write history no longer applies.
    pub fn set_credential(
        &self,
        plaintext_token: &str,
        document_id: Option<&str>,
    ) -> Result<SyncConfig, VaultError> {
        if plaintext_token.trim().is_empty() {
            return Err(VaultError::Cipher("empty credential".to_string()));
        }
        let token = plaintext_token.trim().to_string();
        let key = self
            .secrets
            .vault_key()
            .map_err(|e| VaultError::SecretStore(e.to_string()))?;

        let encrypted = encrypt(&key, &token)?;
        if decrypt(&key, &encrypted)? != token {
            return Err(VaultError::RoundTrip);
        }

        let document_id = document_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .or_else(|| self.load().document_id);

        let persisted = PersistedConfig {
            encrypted_token: encrypted,
            document_id,
            enabled: true,
            configured_at: Utc::now(),
            last_sync_time: None,
            last_read_time: None,
            last_known_remote_hash: None,
            version: CONFIG_VERSION.to_string(),
        };
        let raw = serde_json::to_string(&persisted)
            .map_err(|e| VaultError::Cipher(e.to_string()))?;
        self.config_store.write(&raw)?;

        let config = to_sync_config(&persisted);
        if let Ok(mut session) = self.session.write() {
            session.token = Some(token);
            session.last_good = Some(config.clone());
        }
        Ok(config)
    }

    /// Load the persisted config, degrading gracefully.
    ///
    /// Unreadable or corrupt storage returns the last known-good config
    /// seen this session, or the empty/disabled config. Never an error.
    pub fn load(&self) -> SyncConfig {
        let raw = match self.config_store.read() {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.fallback_config(),
            Err(e) => {
                warn!("[Sync] Config store unreadable: {}", e);
                return self.fallback_config();
            }
        };

        let persisted: PersistedConfig = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("[Sync] Persisted sync config is corrupt: {}", e);
                return self.fallback_config();
            }
        };

        let key = match self.secrets.vault_key() {
            Ok(key) => key,
            Err(e) => {
                warn!("[Sync] Vault key unavailable: {}", e);
                return self.fallback_config();
            }
        };
        let token = match decrypt(&key, &persisted.encrypted_token) {
            Ok(token) => token,
            Err(e) => {
                warn!("[Sync] Stored credential does not decrypt: {}", e);
                return self.fallback_config();
            }
        };

        let config = to_sync_config(&persisted);
        if let Ok(mut session) = self.session.write() {
            session.token = Some(token);
            session.last_good = Some(config.clone());
        }
        config
    }

    /// Plaintext token for this session, if a credential is configured.
    pub fn credential(&self) -> Option<String> {
        if let Ok(session) = self.session.read() {
            if session.token.is_some() {
                return session.token.clone();
            }
        }
        // Not yet loaded this session; a load both validates and caches.
        self.load();
        self.session
            .read()
            .ok()
            .and_then(|session| session.token.clone())
    }

    /// Re-persist sync bookkeeping (document id, timestamps, remote hash)
    /// around the current credential.
    pub fn save_config(&self, config: &SyncConfig) -> Result<(), VaultError> {
        let token = self
            .credential()
            .ok_or_else(|| VaultError::Cipher("no credential configured".to_string()))?;
        let key = self
            .secrets
            .vault_key()
            .map_err(|e| VaultError::SecretStore(e.to_string()))?;
        let persisted = PersistedConfig {
            encrypted_token: encrypt(&key, &token)?,
            document_id: config.document_id.clone(),
            enabled: config.enabled,
            configured_at: config.configured_at.unwrap_or_else(Utc::now),
            last_sync_time: config.last_sync_time,
            last_read_time: config.last_read_time,
            last_known_remote_hash: config.last_known_remote_hash.clone(),
            version: CONFIG_VERSION.to_string(),
        };
        let raw = serde_json::to_string(&persisted)
            .map_err(|e| VaultError::Cipher(e.to_string()))?;
        self.config_store.write(&raw)?;
        if let Ok(mut session) = self.session.write() {
            session.last_good = Some(to_sync_config(&persisted));
        }
        Ok(())
    }

    /// Explicit disconnect: forget the credential, the vault key and all
    /// sync bookkeeping.
    pub fn disconnect(&self) -> Result<(), VaultError> {
        self.config_store.delete()?;
        if let Err(e) = self.secrets.delete_vault_key() {
            warn!("[Sync] Could not remove vault key: {}", e);
        }
        if let Ok(mut session) = self.session.write() {
            session.token = None;
            session.last_good = None;
        }
        Ok(())
    }

    fn fallback_config(&self) -> SyncConfig {
        self.session
            .read()
            .ok()
            .and_then(|session| session.last_good.clone())
            .unwrap_or_else(SyncConfig::disabled)
    }
}

fn to_sync_config(persisted: &PersistedConfig) -> SyncConfig {
    SyncConfig {
        has_credential: true,
        document_id: persisted.document_id.clone(),
        enabled: persisted.enabled,
        configured_at: Some(persisted.configured_at),
        last_sync_time: persisted.last_sync_time,
        last_read_time: persisted.last_read_time,
        last_known_remote_hash: persisted.last_known_remote_hash.clone(),
    }
}

/// `base64(nonce ‖ ciphertext)` framing.
fn encrypt(key: &[u8; 32], plaintext: &str) -> Result<String, VaultError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| VaultError::Cipher(e.to_string()))?;
    let mut framed = nonce_bytes.to_vec();
    framed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(framed))
}

fn decrypt(key: &[u8; 32], framed: &str) -> Result<String, VaultError> {
    let bytes = BASE64
        .decode(framed)
        .map_err(|_| VaultError::Cipher("invalid credential frame".to_string()))?;
    if bytes.len() <= NONCE_LEN {
        return Err(VaultError::Cipher("credential frame too short".to_string()));
    }
    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| VaultError::Cipher(e.to_string()))?;
    String::from_utf8(plaintext).map_err(|_| VaultError::Cipher("token is not UTF-8".to_string()))
}
