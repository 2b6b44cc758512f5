//! Core types for the courier protocol
//!
//! Records that cross the store, config, or RPC boundaries carry serde
//! derives; field names on the config-visible types keep their wire
//! spelling via `#[serde(rename)]`.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::CryptoError;

// ----------------------------------------------------------------------------
// Public Key
// ----------------------------------------------------------------------------

/// A 32-byte X25519 public key, the destination identity at the keystore
/// seam. Serialized as base64 wherever it crosses a wire or a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64.decode(s).map_err(|_| CryptoError::InvalidKey)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ----------------------------------------------------------------------------
// Directory Records
// ----------------------------------------------------------------------------

/// A named multicast destination. Subscribers hold the private key; the
/// private half is only populated on the node that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub pubkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privkey: Option<String>,
}

/// A named unicast destination (public key only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub pubkey: String,
}

/// A locally-held identity that can be loaded as the node's content key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub enabled: bool,
}

/// A remote endpoint, selected per-policy by its group label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub enabled: bool,
    pub uri: String,
    pub group: String,
}

/// Router fan-out override: messages arriving on `from` are re-enqueued
/// under every channel in `to` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: Vec<String>,
}

// ----------------------------------------------------------------------------
// Queue & Sync Records
// ----------------------------------------------------------------------------

/// One row of the outbound queue. `channel` is empty for unicast traffic;
/// `message` is already wire-framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRow {
    pub channel: String,
    pub message: Vec<u8>,
    pub timestamp: i64,
}

/// One pickup/dropoff unit: a cursor timestamp and an encrypted,
/// length-prefixed list of framed messages. Empty `data` means the remote
/// had nothing newer than the requested cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub time: i64,
    pub data: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Delivered / Submitted Messages
// ----------------------------------------------------------------------------

/// The unit offered on the node's `Out` channel after a successful decrypt,
/// and accepted on the `In` channel for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    /// Channel name, contact name, or `"[content]"` for unicast receives.
    pub name: String,
    pub is_chan: bool,
    /// Optional destination key override on the send path.
    pub pubkey: Option<PublicKey>,
    pub content: Vec<u8>,
    /// Set on records produced by the chunking codec.
    pub chunked: bool,
    /// Set on the stream-header record of a chunked transfer.
    pub stream_header: bool,
}

impl Msg {
    /// A plain unicast message for `name`.
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            is_chan: false,
            pubkey: None,
            content,
            chunked: false,
            stream_header: false,
        }
    }

    /// A channel message for `name`.
    pub fn channel(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            is_chan: true,
            ..Self::new(name, content)
        }
    }
}

// ----------------------------------------------------------------------------
// Time
// ----------------------------------------------------------------------------

/// Nanoseconds since the Unix epoch, the outbox timestamp domain.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
