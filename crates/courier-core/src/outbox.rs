//! Store seam and the bundled in-memory implementation
//!
//! The node fronts all persistence — contacts, channels, profiles, peers,
//! and the outbound message queue — through the sync, object-safe
//! [`Store`] trait. [`MemoryStore`] backs tests and ephemeral nodes;
//! `courier-store` provides the SQLite implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::StoreError;
use crate::types::{now_ns, Contact, OutboxRow, Peer, Profile};

/// Upper bound on rows returned by a single outbox range query; callers
/// drain by re-issuing with the advanced cursor.
pub const PICKUP_BATCH_LIMIT: usize = 250;

// ----------------------------------------------------------------------------
// Store Trait
// ----------------------------------------------------------------------------

/// Persistence consumed by the node. All methods are synchronous; the node
/// calls them from both sync and async contexts and expects them to return
/// promptly.
pub trait Store: Send + Sync {
    // Contacts
    fn add_contact(&self, name: &str, pubkey_b64: &str) -> Result<(), StoreError>;
    fn get_contact(&self, name: &str) -> Result<Option<Contact>, StoreError>;
    fn contacts(&self) -> Result<Vec<Contact>, StoreError>;
    fn delete_contact(&self, name: &str) -> Result<(), StoreError>;

    // Channels: the store holds the private half; public keys are derived
    // by the node.
    fn add_channel(&self, name: &str, privkey_b64: &str) -> Result<(), StoreError>;
    fn channel_privkey(&self, name: &str) -> Result<Option<String>, StoreError>;
    /// All channels as `(name, privkey_b64)` pairs.
    fn channels(&self) -> Result<Vec<(String, String)>, StoreError>;
    fn delete_channel(&self, name: &str) -> Result<(), StoreError>;

    // Profiles
    fn upsert_profile(&self, name: &str, enabled: bool, privkey_b64: &str)
        -> Result<(), StoreError>;
    fn get_profile(&self, name: &str) -> Result<Option<Profile>, StoreError>;
    fn profiles(&self) -> Result<Vec<Profile>, StoreError>;
    fn profile_privkey(&self, name: &str) -> Result<Option<String>, StoreError>;
    fn delete_profile(&self, name: &str) -> Result<(), StoreError>;

    // Peers
    fn add_peer(&self, name: &str, enabled: bool, uri: &str, group: &str)
        -> Result<(), StoreError>;
    fn get_peer(&self, name: &str) -> Result<Option<Peer>, StoreError>;
    /// Peers belonging to `group`; the default group is the empty string.
    fn peers(&self, group: &str) -> Result<Vec<Peer>, StoreError>;
    fn delete_peer(&self, name: &str) -> Result<(), StoreError>;

    // Outbox
    /// Append one wire-framed message. With `dedup`, an identical
    /// `(channel, message)` row is not inserted twice.
    fn outbox_enqueue(
        &self,
        channel: &str,
        message: &[u8],
        timestamp: i64,
        dedup: bool,
    ) -> Result<(), StoreError>;

    /// Append a batch under a single timestamp.
    fn outbox_bulk_enqueue(
        &self,
        channel: &str,
        timestamp: i64,
        messages: &[Vec<u8>],
    ) -> Result<(), StoreError>;

    /// Rows with `timestamp > cursor`, optionally restricted to the given
    /// channels, ascending, capped at [`PICKUP_BATCH_LIMIT`].
    fn outbox_since(&self, cursor: i64, channels: &[String]) -> Result<Vec<OutboxRow>, StoreError>;

    /// Drop rows older than `age_seconds`.
    fn flush_outbox(&self, age_seconds: u64) -> Result<(), StoreError>;
}

// ----------------------------------------------------------------------------
// Memory Store
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    contacts: HashMap<String, String>,
    channels: HashMap<String, String>,
    profiles: HashMap<String, (bool, String)>,
    peers: HashMap<String, Peer>,
    outbox: Vec<OutboxRow>,
}

/// Volatile [`Store`] used by tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Number of queued outbox rows (test observability).
    pub fn outbox_len(&self) -> usize {
        self.lock().outbox.len()
    }

    /// Snapshot of the queued rows (test observability).
    pub fn outbox_rows(&self) -> Vec<OutboxRow> {
        self.lock().outbox.clone()
    }
}

impl Store for MemoryStore {
    fn add_contact(&self, name: &str, pubkey_b64: &str) -> Result<(), StoreError> {
        self.lock()
            .contacts
            .insert(name.to_string(), pubkey_b64.to_string());
        Ok(())
    }

    fn get_contact(&self, name: &str) -> Result<Option<Contact>, StoreError> {
        Ok(self.lock().contacts.get(name).map(|pubkey| Contact {
            name: name.to_string(),
            pubkey: pubkey.clone(),
        }))
    }

    fn contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let mut out: Vec<Contact> = self
            .lock()
            .contacts
            .iter()
            .map(|(name, pubkey)| Contact {
                name: name.clone(),
                pubkey: pubkey.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn delete_contact(&self, name: &str) -> Result<(), StoreError> {
        self.lock().contacts.remove(name);
        Ok(())
    }

    fn add_channel(&self, name: &str, privkey_b64: &str) -> Result<(), StoreError> {
        self.lock()
            .channels
            .insert(name.to_string(), privkey_b64.to_string());
        Ok(())
    }

    fn channel_privkey(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().channels.get(name).cloned())
    }

    fn channels(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut out: Vec<(String, String)> = self
            .lock()
            .channels
            .iter()
            .map(|(name, privkey)| (name.clone(), privkey.clone()))
            .collect();
        out.sort();
        Ok(out)
    }

    fn delete_channel(&self, name: &str) -> Result<(), StoreError> {
        self.lock().channels.remove(name);
        Ok(())
    }

    fn upsert_profile(
        &self,
        name: &str,
        enabled: bool,
        privkey_b64: &str,
    ) -> Result<(), StoreError> {
        self.lock()
            .profiles
            .insert(name.to_string(), (enabled, privkey_b64.to_string()));
        Ok(())
    }

    fn get_profile(&self, name: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self
            .lock()
            .profiles
            .get(name)
            .map(|(enabled, _)| Profile {
                name: name.to_string(),
                enabled: *enabled,
            }))
    }

    fn profiles(&self) -> Result<Vec<Profile>, StoreError> {
        let mut out: Vec<Profile> = self
            .lock()
            .profiles
            .iter()
            .map(|(name, (enabled, _))| Profile {
                name: name.clone(),
                enabled: *enabled,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn profile_privkey(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().profiles.get(name).map(|(_, key)| key.clone()))
    }

    fn delete_profile(&self, name: &str) -> Result<(), StoreError> {
        self.lock().profiles.remove(name);
        Ok(())
    }

    fn add_peer(
        &self,
        name: &str,
        enabled: bool,
        uri: &str,
        group: &str,
    ) -> Result<(), StoreError> {
        self.lock().peers.insert(
            name.to_string(),
            Peer {
                name: name.to_string(),
                enabled,
                uri: uri.to_string(),
                group: group.to_string(),
            },
        );
        Ok(())
    }

    fn get_peer(&self, name: &str) -> Result<Option<Peer>, StoreError> {
        Ok(self.lock().peers.get(name).cloned())
    }

    fn peers(&self, group: &str) -> Result<Vec<Peer>, StoreError> {
        let mut out: Vec<Peer> = self
            .lock()
            .peers
            .values()
            .filter(|p| p.group == group)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn delete_peer(&self, name: &str) -> Result<(), StoreError> {
        self.lock().peers.remove(name);
        Ok(())
    }

    fn outbox_enqueue(
        &self,
        channel: &str,
        message: &[u8],
        timestamp: i64,
        dedup: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if dedup
            && inner
                .outbox
                .iter()
                .any(|row| row.channel == channel && row.message == message)
        {
            return Ok(());
        }
        inner.outbox.push(OutboxRow {
            channel: channel.to_string(),
            message: message.to_vec(),
            timestamp,
        });
        Ok(())
    }

    fn outbox_bulk_enqueue(
        &self,
        channel: &str,
        timestamp: i64,
        messages: &[Vec<u8>],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for message in messages {
            inner.outbox.push(OutboxRow {
                channel: channel.to_string(),
                message: message.clone(),
                timestamp,
            });
        }
        Ok(())
    }

    fn outbox_since(&self, cursor: i64, channels: &[String]) -> Result<Vec<OutboxRow>, StoreError> {
        let inner = self.lock();
        let mut rows: Vec<OutboxRow> = inner
            .outbox
            .iter()
            .filter(|row| row.timestamp > cursor)
            .filter(|row| channels.is_empty() || channels.iter().any(|c| *c == row.channel))
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.timestamp);
        rows.truncate(PICKUP_BATCH_LIMIT);
        Ok(rows)
    }

    fn flush_outbox(&self, age_seconds: u64) -> Result<(), StoreError> {
        let cutoff = now_ns() - (age_seconds as i64).saturating_mul(1_000_000_000);
        self.lock().outbox.retain(|row| row.timestamp >= cutoff);
        Ok(())
    }
}
