//! dmcp Storage
//!
//! SQLite persistence for per-channel read cursors

use anyhow::{anyhow, Context, Result};
use dmcp_core::{CursorStore, Snowflake};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub const DEFAULT_ACCOUNT_TAG: &str = "__default__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CursorRecord {
    pub channel_id: Snowflake,
    pub account_tag: String,
    pub last_seen_id: Snowflake,
    pub updated_at: String,
}

pub struct Storage {
    conn: Mutex<Connection>,
    account_tag: String,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_account_tag(db_path, DEFAULT_ACCOUNT_TAG)
    }

    /// Cursors are scoped per bot account so one database can serve several
    /// tokens.
    pub fn with_account_tag<P: AsRef<Path>>(db_path: P, account_tag: &str) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("opening cursor database {}", db_path.display()))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS channel_cursors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id INTEGER NOT NULL,
                account_tag TEXT NOT NULL,
                last_seen_id INTEGER NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_cursors_unique
            ON channel_cursors(channel_id, account_tag);
            ",
        )?;

        let account_tag = match account_tag.trim() {
            "" => DEFAULT_ACCOUNT_TAG.to_string(),
            tag => tag.to_string(),
        };

        Ok(Self {
            conn: Mutex::new(conn),
            account_tag,
        })
    }

    pub fn account_tag(&self) -> &str {
        &self.account_tag
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("cursor database lock poisoned"))
    }

    pub fn load_cursor(&self, channel: Snowflake) -> Result<Option<Snowflake>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT last_seen_id FROM channel_cursors WHERE channel_id = ?1 AND account_tag = ?2 LIMIT 1",
        )?;
        let value: Option<i64> = stmt
            .query_row((to_sql_id(channel)?, &self.account_tag), |row| row.get(0))
            .optional()?;
        value.map(from_sql_id).transpose()
    }

    /// Moves the cursor forward; a lower id than the stored one is ignored.
    pub fn save_cursor(&self, channel: Snowflake, last_seen: Snowflake) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO channel_cursors (channel_id, account_tag, last_seen_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(channel_id, account_tag)
             DO UPDATE SET last_seen_id = excluded.last_seen_id, updated_at = CURRENT_TIMESTAMP
             WHERE excluded.last_seen_id > channel_cursors.last_seen_id",
            (to_sql_id(channel)?, &self.account_tag, to_sql_id(last_seen)?),
        )?;
        if changed == 0 {
            debug!(channel_id = %channel, last_seen = %last_seen, "cursor not advanced");
        }
        Ok(())
    }

    /// Overwrites the cursor unconditionally, including moving it back.
    pub fn set_cursor(&self, channel: Snowflake, last_seen: Snowflake) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO channel_cursors (channel_id, account_tag, last_seen_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(channel_id, account_tag)
             DO UPDATE SET last_seen_id = excluded.last_seen_id, updated_at = CURRENT_TIMESTAMP",
            (to_sql_id(channel)?, &self.account_tag, to_sql_id(last_seen)?),
        )?;
        Ok(())
    }

    /// Returns whether a cursor existed.
    pub fn clear_cursor(&self, channel: Snowflake) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM channel_cursors WHERE channel_id = ?1 AND account_tag = ?2",
            (to_sql_id(channel)?, &self.account_tag),
        )?;
        Ok(removed > 0)
    }

    pub fn list_cursors(&self) -> Result<Vec<CursorRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT channel_id, account_tag, last_seen_id, COALESCE(updated_at, '')
             FROM channel_cursors
             WHERE account_tag = ?1
             ORDER BY channel_id ASC",
        )?;

        let rows = stmt.query_map([&self.account_tag], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (channel_id, account_tag, last_seen_id, updated_at) = row?;
            records.push(CursorRecord {
                channel_id: from_sql_id(channel_id)?,
                account_tag,
                last_seen_id: from_sql_id(last_seen_id)?,
                updated_at,
            });
        }
        Ok(records)
    }
}

impl CursorStore for Storage {
    fn load(&self, channel: Snowflake) -> Result<Option<Snowflake>> {
        self.load_cursor(channel)
    }

    fn save(&self, channel: Snowflake, last_seen: Snowflake) -> Result<()> {
        self.save_cursor(channel, last_seen)
    }
}

// Snowflakes stay below 2^63 for the foreseeable future; SQLite integers are
// signed 64-bit.
fn to_sql_id(id: Snowflake) -> Result<i64> {
    i64::try_from(id.get()).map_err(|_| anyhow!("id {} does not fit in a SQLite integer", id))
}

fn from_sql_id(value: i64) -> Result<Snowflake> {
    u64::try_from(value)
        .map(Snowflake::new)
        .map_err(|_| anyhow!("negative id {} in cursor table", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("dmcp-storage-{}-{}.db", name, ts))
    }

    fn id(value: u64) -> Snowflake {
        Snowflake::new(value)
    }

    #[test]
    fn missing_cursor_loads_as_none() {
        let path = temp_db_path("missing");
        let storage = Storage::new(&path).expect("storage init");
        assert_eq!(storage.load_cursor(id(10)).expect("load"), None);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn save_is_monotonic() {
        let path = temp_db_path("monotonic");
        let storage = Storage::new(&path).expect("storage init");

        storage.save_cursor(id(10), id(1_000)).expect("save");
        storage.save_cursor(id(10), id(900)).expect("save lower");
        assert_eq!(storage.load_cursor(id(10)).expect("load"), Some(id(1_000)));

        storage.save_cursor(id(10), id(1_200)).expect("save higher");
        assert_eq!(storage.load_cursor(id(10)).expect("load"), Some(id(1_200)));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn set_can_rewind_and_clear_removes() {
        let path = temp_db_path("rewind");
        let storage = Storage::new(&path).expect("storage init");

        storage.save_cursor(id(10), id(1_000)).expect("save");
        storage.set_cursor(id(10), id(500)).expect("set");
        assert_eq!(storage.load_cursor(id(10)).expect("load"), Some(id(500)));

        assert!(storage.clear_cursor(id(10)).expect("clear"));
        assert!(!storage.clear_cursor(id(10)).expect("clear again"));
        assert_eq!(storage.load_cursor(id(10)).expect("load"), None);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn cursors_are_scoped_by_account_tag_and_survive_reopen() {
        let path = temp_db_path("scope");
        {
            let a = Storage::with_account_tag(&path, "bot_a").expect("a");
            let b = Storage::with_account_tag(&path, "bot_b").expect("b");
            a.save_cursor(id(10), id(111)).expect("save a");
            b.save_cursor(id(10), id(222)).expect("save b");
            b.save_cursor(id(20), id(333)).expect("save b2");
        }

        let reopened = Storage::with_account_tag(&path, "bot_b").expect("reopen");
        let records = reopened.list_cursors().expect("list");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].channel_id, id(10));
        assert_eq!(records[0].last_seen_id, id(222));
        assert_eq!(records[1].channel_id, id(20));
        assert!(records.iter().all(|r| r.account_tag == "bot_b"));

        let a = Storage::with_account_tag(&path, "bot_a").expect("a again");
        assert_eq!(a.load_cursor(id(10)).expect("load"), Some(id(111)));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn works_through_the_cursor_store_trait() {
        let path = temp_db_path("trait");
        let storage: Box<dyn CursorStore> = Box::new(Storage::new(&path).expect("storage init"));
        storage.save(id(7), id(70)).expect("save");
        storage.save(id(7), id(60)).expect("save lower");
        assert_eq!(storage.load(id(7)).expect("load"), Some(id(70)));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn ids_beyond_sqlite_range_are_rejected() {
        let path = temp_db_path("range");
        let storage = Storage::new(&path).expect("storage init");
        assert!(storage.save_cursor(id(10), id(u64::MAX)).is_err());
        let _ = std::fs::remove_file(path);
    }
}
