//! Error types for the sync engine.

use thiserror::Error;

/// Retry policy class for remote API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Failures of the credential vault. Fatal to the sync feature only, never
/// to the application; callers degrade to "sync disabled".
#[derive(Debug, Error)]
pub enum VaultError {
    /// Encrypt→decrypt verification of a freshly stored token did not return
    /// the original plaintext; nothing was persisted.
    #[error("credential round-trip verification failed")]
    RoundTrip,

    #[error("credential cipher error: {0}")]
    Cipher(String),

    #[error("secret store error: {0}")]
    SecretStore(String),

    #[error("config store error: {0}")]
    ConfigStore(#[from] StoreError),
}

/// Failures of local persistence collaborators (config store, collection
/// repositories).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("stored data is malformed: {0}")]
    Malformed(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),
}

/// Failures talking to the remote blob-document service.
#[derive(Debug, Error)]
pub enum RemoteStoreError {
    #[error("network error: {0}")]
    Network(String),

    #[error("remote API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The remote body does not parse as a snapshot document. The engine
    /// fails open and merges against "absent remote".
    #[error("malformed remote document: {0}")]
    MalformedDocument(String),
}

impl RemoteStoreError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => RetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
                500..=599 => RetryClass::Retryable,
                _ => RetryClass::Permanent,
            },
            Self::Network(_) => RetryClass::Retryable,
            Self::Auth(_) => RetryClass::ReauthRequired,
            Self::MalformedDocument(_) => RetryClass::Permanent,
        }
    }
}
