//! The pickup/dropoff synchronization protocol
//!
//! A `pickup` serves the caller every outbox row newer than its cursor,
//! bincode-encoded as a length-prefixed list and sealed to the caller's
//! routing key. A `dropoff` opens such a bundle with the local routing key
//! and routes each message. Both sides must agree bit-exactly on the list
//! encoding; it is part of the wire contract.

use tracing::{debug, warn};

use crate::errors::{CourierError, Result};
use crate::frame::MIN_BODY_LEN;
use crate::keystore::{Decrypted, MIN_ENCRYPTED_LEN};
use crate::types::{Bundle, PublicKey};

use super::Node;

/// Channel names in a pickup filter may contain only `[A-Za-z0-9]`.
fn valid_channel_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric())
}

impl Node {
    /// Collect messages newer than `last_time` for a remote node.
    ///
    /// The returned bundle's `time` is the maximum row timestamp observed —
    /// tracked in code rather than trusted from store ordering — or
    /// `last_time` when there was nothing to send. The caller persists it
    /// as its next cursor.
    pub fn pickup(
        &self,
        remote_pub: &PublicKey,
        last_time: i64,
        channels: &[String],
    ) -> Result<Bundle> {
        for name in channels {
            if !valid_channel_name(name) {
                return Err(CourierError::InvalidChannelName(name.clone()));
            }
        }

        let rows = self.store().outbox_since(last_time, channels)?;
        let mut max_time = last_time;
        let mut messages: Vec<Vec<u8>> = Vec::with_capacity(rows.len());
        for row in rows {
            if row.timestamp > max_time {
                max_time = row.timestamp;
            } else {
                debug!(
                    prev = max_time,
                    cur = row.timestamp,
                    "outbox timestamps not increasing"
                );
            }
            messages.push(row.message);
        }

        if messages.is_empty() {
            return Ok(Bundle {
                time: last_time,
                data: Vec::new(),
            });
        }

        let encoded = bincode::serialize(&messages)?;
        let data = self.routing_key().encrypt(&encoded, remote_pub)?;
        Ok(Bundle {
            time: max_time,
            data,
        })
    }

    /// Accept a batch of messages from a remote node and route each one.
    ///
    /// The envelope must open under the local routing key — a tag failure
    /// here is a hard [`CourierError::AuthFailed`]. Per-message routing
    /// errors are logged and swallowed: a remote must not learn which of
    /// the messages it delivered decrypted for us.
    pub fn dropoff(&self, bundle: Bundle) -> Result<()> {
        if bundle.data.len() < MIN_ENCRYPTED_LEN {
            return Err(CourierError::InvalidFrame);
        }
        let clear = match self.routing_key().decrypt(&bundle.data)? {
            Decrypted::Miss => return Err(CourierError::AuthFailed),
            Decrypted::Hit(clear) => clear,
        };
        let messages: Vec<Vec<u8>> = bincode::deserialize(&clear)?;

        let router = self.router();
        for message in &messages {
            if message.len() < MIN_BODY_LEN {
                continue;
            }
            if let Err(err) = router.route(self, message) {
                warn!(%err, "dropoff: routing failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::keystore::{EcdhKeystore, Keystore};
    use crate::outbox::{MemoryStore, Store};
    use crate::router::DefaultRouter;

    fn test_node() -> (Arc<Node>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let node = Node::new(
            Box::new(EcdhKeystore::generate_new()),
            Box::new(EcdhKeystore::generate_new()),
            store.clone(),
            Arc::new(DefaultRouter::new()),
        )
        .unwrap();
        (node, store)
    }

    #[test]
    fn test_pickup_rejects_bad_channel_names() {
        let (node, _) = test_node();
        let remote = EcdhKeystore::generate_new();
        for bad in ["has space", "semi;colon", "dash-ed"] {
            let err = node
                .pickup(&remote.public_key(), 0, &[bad.to_string()])
                .unwrap_err();
            assert!(matches!(err, CourierError::InvalidChannelName(_)));
        }

        // An empty name has no characters to reject.
        let bundle = node
            .pickup(&remote.public_key(), 0, &[String::new()])
            .unwrap();
        assert!(bundle.data.is_empty());
    }

    #[test]
    fn test_pickup_empty_outbox_returns_cursor_unchanged() {
        let (node, _) = test_node();
        let remote = EcdhKeystore::generate_new();
        let bundle = node.pickup(&remote.public_key(), 42, &[]).unwrap();
        assert_eq!(bundle.time, 42);
        assert!(bundle.data.is_empty());
    }

    #[test]
    fn test_pickup_cursor_advances_to_max_timestamp() {
        let (node, store) = test_node();
        let remote = EcdhKeystore::generate_new();
        for (byte, ts) in [(1u8, 10i64), (2, 20), (3, 30)] {
            store
                .outbox_enqueue("", &vec![byte; MIN_BODY_LEN], ts, false)
                .unwrap();
        }

        let bundle = node.pickup(&remote.public_key(), 15, &[]).unwrap();
        assert_eq!(bundle.time, 30);

        // The remote side can open the bundle and finds the two newer rows.
        match remote.decrypt(&bundle.data).unwrap() {
            Decrypted::Hit(clear) => {
                let msgs: Vec<Vec<u8>> = bincode::deserialize(&clear).unwrap();
                assert_eq!(msgs.len(), 2);
                assert_eq!(msgs[0], vec![2u8; MIN_BODY_LEN]);
                assert_eq!(msgs[1], vec![3u8; MIN_BODY_LEN]);
            }
            Decrypted::Miss => panic!("bundle should decrypt for the remote"),
        }
    }

    #[test]
    fn test_dropoff_rejects_short_and_foreign_bundles() {
        let (node, _) = test_node();
        assert!(matches!(
            node.dropoff(Bundle {
                time: 0,
                data: vec![0u8; 8]
            }),
            Err(CourierError::InvalidFrame)
        ));

        // Sealed to someone else's routing key.
        let stranger = EcdhKeystore::generate_new();
        let other = EcdhKeystore::generate_new();
        let sealed = stranger
            .encrypt(b"a perfectly fine payload", &other.public_key())
            .unwrap();
        assert!(matches!(
            node.dropoff(Bundle {
                time: 0,
                data: sealed
            }),
            Err(CourierError::AuthFailed)
        ));
    }

    #[test]
    fn test_dropoff_swallows_routing_errors() {
        let (node, _) = test_node();
        let sender = EcdhKeystore::generate_new();

        // One garbage message (routing fails) and one short one (skipped):
        // dropoff must still succeed.
        let msgs: Vec<Vec<u8>> = vec![vec![0xFF; 64], vec![1u8; 4]];
        let encoded = bincode::serialize(&msgs).unwrap();
        let data = sender.encrypt(&encoded, &node.id()).unwrap();
        node.dropoff(Bundle { time: 0, data }).unwrap();
    }

    #[test]
    fn test_bundle_list_encoding_is_length_prefixed() {
        // The wire contract: a u64 count, then u64-length-prefixed items,
        // all little-endian.
        let msgs: Vec<Vec<u8>> = vec![b"ab".to_vec(), b"xyz".to_vec()];
        let encoded = bincode::serialize(&msgs).unwrap();
        let mut expect = Vec::new();
        expect.extend_from_slice(&2u64.to_le_bytes());
        expect.extend_from_slice(&2u64.to_le_bytes());
        expect.extend_from_slice(b"ab");
        expect.extend_from_slice(&3u64.to_le_bytes());
        expect.extend_from_slice(b"xyz");
        assert_eq!(encoded, expect);
    }
}
