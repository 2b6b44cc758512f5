//! Error types for the courier protocol
//!
//! Domain-specific error enums (crypto, transport, store) are unified into
//! the top-level [`CourierError`] via `#[from]` conversions. A failed
//! quick-tag check during routing is deliberately NOT represented here: it
//! is the normal "message not for me" signal and surfaces as
//! [`Decrypted::Miss`](crate::keystore::Decrypted).

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Cryptographic failures inside a keystore.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("ciphertext too short ({len} bytes, need at least {min})")]
    Truncated { len: usize, min: usize },
    #[error("invalid key material")]
    InvalidKey,
}

/// Transport failures, retried by policies on their next tick.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no endpoint listening at {uri}")]
    Unreachable { uri: String },
    #[error("remote call failed: {message}")]
    Remote { message: String },
    #[error("transport is stopped")]
    Stopped,
}

/// Backing-store failures.
///
/// Concrete backends (SQLite, memory) wrap their native errors via
/// [`StoreError::backend`] so the core stays free of driver dependencies.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

// ----------------------------------------------------------------------------
// Top-Level Error
// ----------------------------------------------------------------------------

/// Core error type for the courier protocol.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// Frame shorter than its declared header, or otherwise unparseable.
    #[error("invalid frame: message shorter than required header")]
    InvalidFrame,

    /// `Handle` was asked to decrypt for a channel with no known key.
    #[error("cannot handle message for unknown channel {0:?}")]
    UnknownChannel(String),

    #[error("unknown contact {0:?}")]
    UnknownContact(String),

    #[error("unknown profile {0:?}")]
    UnknownProfile(String),

    /// Quick-tag check failed on a bundle envelope. Hard error: within
    /// per-message routing the same condition is a silent non-match.
    #[error("authentication tag check failed")]
    AuthFailed,

    #[error("policy is already running")]
    AlreadyRunning,

    #[error("invalid character in channel name {0:?}")]
    InvalidChannelName(String),

    #[error("chunk size {0} cannot carry a chunk header")]
    InvalidChunkSize(u32),

    #[error("malformed rpc call: {0}")]
    Rpc(String),

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// ----------------------------------------------------------------------------
// Convenience Constructors
// ----------------------------------------------------------------------------

impl CourierError {
    /// Create a configuration error with a reason.
    pub fn config<T: Into<String>>(reason: T) -> Self {
        CourierError::Config {
            reason: reason.into(),
        }
    }

    /// Create a malformed-rpc error with a message.
    pub fn rpc<T: Into<String>>(message: T) -> Self {
        CourierError::Rpc(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;
