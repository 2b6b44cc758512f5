//! Schema initialization
//!
//! Run before any other operation on a freshly opened connection. All
//! statements are idempotent so reopening an existing database is a no-op.

use rusqlite::Connection;

pub fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS contacts (
            name   TEXT PRIMARY KEY NOT NULL,
            pubkey TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            name    TEXT PRIMARY KEY NOT NULL,
            privkey TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS profiles (
            name    TEXT PRIMARY KEY NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 0,
            privkey TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS peers (
            name       TEXT PRIMARY KEY NOT NULL,
            enabled    INTEGER NOT NULL DEFAULT 1,
            uri        TEXT NOT NULL,
            peer_group TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS outbox (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            channel   TEXT NOT NULL DEFAULT '',
            msg       BLOB NOT NULL,
            timestamp INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_timestamp ON outbox(timestamp);
        CREATE INDEX IF NOT EXISTS idx_outbox_channel ON outbox(channel);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
    }
}
