//! SQLite-backed local reference cache.
//!
//! Remembers the last object of each kind a client created or acquired
//! (so a fresh process can find its credential without scanning the
//! ledger) and records posts whose policy link is still outstanding so a
//! later `repair_pending` can finish them.
//!
//! The cache is advisory. Every remembered id is re-read from the ledger
//! before use; losing the database only costs a rescan.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use tiergate_core::{Address, Clock, ObjectId, SystemClock};

use crate::error::{Result, StoreError};
use crate::migration;

/// What a remembered reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RefKind {
    Policy = 1,
    Post = 2,
    Credential = 3,
}

impl RefKind {
    fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A post whose `LinkPolicy` call has not been confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    pub post: ObjectId,
    pub policy: ObjectId,
    /// The creator who must re-issue the link. `None` for entries recorded
    /// before the cache tracked it.
    pub creator: Option<Address>,
    pub recorded_at: i64,
}

/// Local reference cache.
///
/// Thread-safe via an internal Mutex. Calls are short single-row
/// statements, so they run inline rather than on a blocking pool.
pub struct ReferenceCache {
    conn: Mutex<Connection>,
}

impl ReferenceCache {
    /// Open (and migrate) a cache database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory cache.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("cache mutex poisoned: {}", e)))?;
        f(&conn)
    }

    /// Remember the latest object of `kind` for `owner`, replacing any
    /// previous entry.
    pub fn remember(&self, kind: RefKind, owner: &Address, object: &ObjectId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO refs (kind, owner, object_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(kind, owner) DO UPDATE SET
                    object_id = excluded.object_id,
                    updated_at = excluded.updated_at",
                params![
                    kind.as_u8(),
                    owner.as_bytes().as_slice(),
                    object.as_bytes().as_slice(),
                    SystemClock.now_ms()
                ],
            )?;
            Ok(())
        })
    }

    /// Recall the remembered object of `kind` for `owner`.
    pub fn recall(&self, kind: RefKind, owner: &Address) -> Result<Option<ObjectId>> {
        self.with_conn(|conn| {
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT object_id FROM refs WHERE kind = ?1 AND owner = ?2",
                    params![kind.as_u8(), owner.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            bytes.map(|b| object_id_from_blob(&b)).transpose()
        })
    }

    /// Drop the remembered object of `kind` for `owner`.
    pub fn forget(&self, kind: RefKind, owner: &Address) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM refs WHERE kind = ?1 AND owner = ?2",
                params![kind.as_u8(), owner.as_bytes().as_slice()],
            )?;
            Ok(())
        })
    }

    /// Record that `creator` still needs to link `post` to `policy`.
    pub fn record_pending_link(
        &self,
        post: &ObjectId,
        policy: &ObjectId,
        creator: &Address,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO pending_links (post_id, policy_id, creator, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    post.as_bytes().as_slice(),
                    policy.as_bytes().as_slice(),
                    creator.as_bytes().as_slice(),
                    SystemClock.now_ms()
                ],
            )?;
            Ok(())
        })
    }

    /// Mark a post's link as confirmed. Returns whether an entry existed.
    pub fn clear_pending_link(&self, post: &ObjectId) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM pending_links WHERE post_id = ?1",
                params![post.as_bytes().as_slice()],
            )?;
            Ok(removed > 0)
        })
    }

    /// Outstanding links recorded for `creator`, oldest first.
    ///
    /// Entries without a recorded creator are included; the caller must
    /// check their ownership against the ledger.
    pub fn pending_links(&self, creator: &Address) -> Result<Vec<PendingLink>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT post_id, policy_id, creator, recorded_at FROM pending_links
                 WHERE creator = ?1 OR creator IS NULL
                 ORDER BY recorded_at, post_id",
            )?;
            let rows = stmt
                .query_map(params![creator.as_bytes().as_slice()], |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Option<Vec<u8>>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(post, policy, creator, recorded_at)| {
                    Ok(PendingLink {
                        post: object_id_from_blob(&post)?,
                        policy: object_id_from_blob(&policy)?,
                        creator: creator.map(|b| address_from_blob(&b)).transpose()?,
                        recorded_at,
                    })
                })
                .collect()
        })
    }
}

fn object_id_from_blob(bytes: &[u8]) -> Result<ObjectId> {
    ObjectId::try_from(bytes)
        .map_err(|_| StoreError::InvalidData(format!("object id has {} bytes", bytes.len())))
}

fn address_from_blob(bytes: &[u8]) -> Result<Address> {
    Address::try_from(bytes)
        .map_err(|_| StoreError::InvalidData(format!("address has {} bytes", bytes.len())))
}
