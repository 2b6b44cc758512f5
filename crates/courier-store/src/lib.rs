//! SQLite-backed [`Store`] for courier nodes
//!
//! One [`rusqlite::Connection`] behind a mutex, WAL journaling, and schema
//! initialization before any other operation. The outbox range query binds
//! its channel filter as parameters — channel names are already restricted
//! to `[A-Za-z0-9]` upstream, but they are never spliced into SQL.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use tracing::info;

use courier_core::{Contact, OutboxRow, Peer, Profile, Store, StoreError, PICKUP_BATCH_LIMIT};

mod schema;

/// A [`Store`] holding everything — contacts, channels, profiles, peers,
/// and the outbox — in one SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at `path` and initialize its schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!(path = %path.display(), "opening node database");
        Self::from_connection(Connection::open(path).map_err(StoreError::backend)?)
    }

    /// An in-memory database, for tests and throwaway nodes.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory().map_err(StoreError::backend)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::backend)?;
        schema::init(&conn).map_err(StoreError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection lock poisoned")
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

impl Store for SqliteStore {
    fn add_contact(&self, name: &str, pubkey_b64: &str) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO contacts (name, pubkey) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET pubkey = excluded.pubkey",
                params![name, pubkey_b64],
            )
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn get_contact(&self, name: &str) -> Result<Option<Contact>, StoreError> {
        self.conn()
            .query_row(
                "SELECT pubkey FROM contacts WHERE name = ?1",
                params![name],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(StoreError::backend)
            .map(|pubkey| {
                pubkey.map(|pubkey| Contact {
                    name: name.to_string(),
                    pubkey,
                })
            })
    }

    fn contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT name, pubkey FROM contacts ORDER BY name ASC")
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Contact {
                    name: row.get(0)?,
                    pubkey: row.get(1)?,
                })
            })
            .map_err(StoreError::backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::backend)
    }

    fn delete_contact(&self, name: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM contacts WHERE name = ?1", params![name])
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn add_channel(&self, name: &str, privkey_b64: &str) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO channels (name, privkey) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET privkey = excluded.privkey",
                params![name, privkey_b64],
            )
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn channel_privkey(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.conn()
            .query_row(
                "SELECT privkey FROM channels WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::backend)
    }

    fn channels(&self) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT name, privkey FROM channels ORDER BY name ASC")
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(StoreError::backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::backend)
    }

    fn delete_channel(&self, name: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM channels WHERE name = ?1", params![name])
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn upsert_profile(
        &self,
        name: &str,
        enabled: bool,
        privkey_b64: &str,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO profiles (name, enabled, privkey) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                     enabled = excluded.enabled,
                     privkey = excluded.privkey",
                params![name, enabled, privkey_b64],
            )
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn get_profile(&self, name: &str) -> Result<Option<Profile>, StoreError> {
        self.conn()
            .query_row(
                "SELECT enabled FROM profiles WHERE name = ?1",
                params![name],
                |row| row.get::<_, bool>(0),
            )
            .optional()
            .map_err(StoreError::backend)
            .map(|enabled| {
                enabled.map(|enabled| Profile {
                    name: name.to_string(),
                    enabled,
                })
            })
    }

    fn profiles(&self) -> Result<Vec<Profile>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT name, enabled FROM profiles ORDER BY name ASC")
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Profile {
                    name: row.get(0)?,
                    enabled: row.get(1)?,
                })
            })
            .map_err(StoreError::backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::backend)
    }

    fn profile_privkey(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.conn()
            .query_row(
                "SELECT privkey FROM profiles WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::backend)
    }

    fn delete_profile(&self, name: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM profiles WHERE name = ?1", params![name])
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn add_peer(
        &self,
        name: &str,
        enabled: bool,
        uri: &str,
        group: &str,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO peers (name, enabled, uri, peer_group) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                     enabled = excluded.enabled,
                     uri = excluded.uri,
                     peer_group = excluded.peer_group",
                params![name, enabled, uri, group],
            )
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn get_peer(&self, name: &str) -> Result<Option<Peer>, StoreError> {
        self.conn()
            .query_row(
                "SELECT name, enabled, uri, peer_group FROM peers WHERE name = ?1",
                params![name],
                row_to_peer,
            )
            .optional()
            .map_err(StoreError::backend)
    }

    fn peers(&self, group: &str) -> Result<Vec<Peer>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT name, enabled, uri, peer_group FROM peers
                 WHERE peer_group = ?1 ORDER BY name ASC",
            )
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map(params![group], row_to_peer)
            .map_err(StoreError::backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::backend)
    }

    fn delete_peer(&self, name: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM peers WHERE name = ?1", params![name])
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn outbox_enqueue(
        &self,
        channel: &str,
        message: &[u8],
        timestamp: i64,
        dedup: bool,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        if dedup {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM outbox WHERE channel = ?1 AND msg = ?2)",
                    params![channel, message],
                    |row| row.get(0),
                )
                .map_err(StoreError::backend)?;
            if exists {
                return Ok(());
            }
        }
        conn.execute(
            "INSERT INTO outbox (channel, msg, timestamp) VALUES (?1, ?2, ?3)",
            params![channel, message, timestamp],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }

    fn outbox_bulk_enqueue(
        &self,
        channel: &str,
        timestamp: i64,
        messages: &[Vec<u8>],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(StoreError::backend)?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO outbox (channel, msg, timestamp) VALUES (?1, ?2, ?3)")
                .map_err(StoreError::backend)?;
            for message in messages {
                stmt.execute(params![channel, message, timestamp])
                    .map_err(StoreError::backend)?;
            }
        }
        tx.commit().map_err(StoreError::backend)?;
        Ok(())
    }

    fn outbox_since(&self, cursor: i64, channels: &[String]) -> Result<Vec<OutboxRow>, StoreError> {
        let conn = self.conn();
        let mut sql = String::from(
            "SELECT channel, msg, timestamp FROM outbox WHERE timestamp > ?",
        );
        if !channels.is_empty() {
            sql.push_str(" AND channel IN (");
            sql.push_str(&vec!["?"; channels.len()].join(","));
            sql.push(')');
        }
        sql.push_str(&format!(
            " ORDER BY timestamp ASC LIMIT {PICKUP_BATCH_LIMIT}"
        ));

        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(1 + channels.len());
        params.push(&cursor);
        for channel in channels {
            params.push(channel);
        }

        let mut stmt = conn.prepare(&sql).map_err(StoreError::backend)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok(OutboxRow {
                    channel: row.get(0)?,
                    message: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })
            .map_err(StoreError::backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::backend)
    }

    fn flush_outbox(&self, age_seconds: u64) -> Result<(), StoreError> {
        let cutoff = now_ns() - (age_seconds as i64).saturating_mul(1_000_000_000);
        self.conn()
            .execute("DELETE FROM outbox WHERE timestamp < ?1", params![cutoff])
            .map_err(StoreError::backend)?;
        Ok(())
    }
}

fn row_to_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Peer> {
    Ok(Peer {
        name: row.get(0)?,
        enabled: row.get(1)?,
        uri: row.get(2)?,
        group: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_at_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("node.db")).unwrap();
        store.add_contact("bob", "cHVia2V5").unwrap();
        assert_eq!(store.get_contact("bob").unwrap().unwrap().pubkey, "cHVia2V5");
    }

    #[test]
    fn test_contact_upsert_replaces_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_contact("bob", "old").unwrap();
        store.add_contact("bob", "new").unwrap();
        assert_eq!(store.get_contact("bob").unwrap().unwrap().pubkey, "new");
        assert_eq!(store.contacts().unwrap().len(), 1);
    }

    #[test]
    fn test_outbox_since_orders_filters_and_caps() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.outbox_enqueue("b", b"2", 20, false).unwrap();
        store.outbox_enqueue("a", b"1", 10, false).unwrap();
        store.outbox_enqueue("a", b"3", 30, false).unwrap();

        let rows = store.outbox_since(0, &[]).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );

        let rows = store
            .outbox_since(15, &["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel, "a");

        for i in 0..(PICKUP_BATCH_LIMIT as i64 + 10) {
            store.outbox_enqueue("c", &[i as u8], 100 + i, false).unwrap();
        }
        assert_eq!(store.outbox_since(0, &[]).unwrap().len(), PICKUP_BATCH_LIMIT);
    }

    #[test]
    fn test_channel_filter_binds_hostile_names() {
        // Validation upstream forbids these, but the query must stay safe
        // even if handed them directly.
        let store = SqliteStore::open_in_memory().unwrap();
        store.outbox_enqueue("a", b"1", 10, false).unwrap();
        let rows = store
            .outbox_since(0, &["a\" OR 1=1 --".to_string()])
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_outbox_dedup() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.outbox_enqueue("c", b"same", 1, true).unwrap();
        store.outbox_enqueue("c", b"same", 2, true).unwrap();
        assert_eq!(store.outbox_since(0, &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_bulk_enqueue_single_timestamp() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .outbox_bulk_enqueue("c", 77, &[b"a".to_vec(), b"b".to_vec()])
            .unwrap();
        let rows = store.outbox_since(0, &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.timestamp == 77));
    }

    #[test]
    fn test_flush_outbox() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.outbox_enqueue("c", b"ancient", 1, false).unwrap();
        store.outbox_enqueue("c", b"fresh", now_ns(), false).unwrap();
        store.flush_outbox(300).unwrap();
        let rows = store.outbox_since(0, &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, b"fresh");
    }

    #[test]
    fn test_profiles_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_profile("work", true, "a2V5").unwrap();
        assert!(store.get_profile("work").unwrap().unwrap().enabled);
        assert_eq!(store.profile_privkey("work").unwrap().unwrap(), "a2V5");

        store.upsert_profile("work", false, "a2V5").unwrap();
        assert!(!store.get_profile("work").unwrap().unwrap().enabled);

        store.delete_profile("work").unwrap();
        assert!(store.get_profile("work").unwrap().is_none());
    }

    #[test]
    fn test_peer_groups() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_peer("a", true, "mem://a", "").unwrap();
        store.add_peer("b", false, "mem://b", "relays").unwrap();

        assert_eq!(store.peers("").unwrap().len(), 1);
        let relays = store.peers("relays").unwrap();
        assert_eq!(relays.len(), 1);
        assert!(!relays[0].enabled);
    }
}
