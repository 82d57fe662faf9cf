//! Schema migrations for the local reference cache.
//!
//! The schema version lives in SQLite's `user_version` pragma. Entry `i`
//! of [`MIGRATIONS`] moves the schema from version `i` to `i + 1`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

const MIGRATIONS: &[&str] = &[
    // v1: remembered references and unfinished policy links.
    r#"
    CREATE TABLE refs (
        kind INTEGER NOT NULL,            -- RefKind as u8
        owner BLOB NOT NULL,              -- address
        object_id BLOB NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (kind, owner)
    );

    CREATE TABLE pending_links (
        post_id BLOB PRIMARY KEY,
        policy_id BLOB NOT NULL,
        recorded_at INTEGER NOT NULL
    );

    CREATE INDEX idx_pending_links_recorded ON pending_links(recorded_at);
    "#,
    // v2: attribute pending links to the creator who must re-issue them.
    // Rows written by v1 keep a NULL creator.
    r#"
    ALTER TABLE pending_links ADD COLUMN creator BLOB;

    CREATE INDEX idx_pending_links_creator ON pending_links(creator);
    "#,
];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. Idempotent.
///
/// A database written by a newer build is refused rather than guessed at.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let found: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "cache schema v{} is newer than supported v{}",
            found, CURRENT_VERSION
        )));
    }
    if found == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for sql in &MIGRATIONS[found as usize..] {
        tx.execute_batch(sql)?;
    }
    tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(conn: &Connection) -> u32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(version(&conn), CURRENT_VERSION);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(tables, ["pending_links", "refs"]);
    }

    #[test]
    fn test_rerun_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(version(&conn), CURRENT_VERSION);
    }

    #[test]
    fn test_v1_rows_survive_upgrade() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO pending_links (post_id, policy_id, recorded_at) VALUES (x'01', x'02', 7)",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();
        assert_eq!(version(&conn), CURRENT_VERSION);
        let creator: Option<Vec<u8>> = conn
            .query_row("SELECT creator FROM pending_links", [], |row| row.get(0))
            .unwrap();
        assert_eq!(creator, None);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_VERSION + 1)
            .unwrap();
        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
