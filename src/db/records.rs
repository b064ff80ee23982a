// src/db/records.rs
// Memory Record Store - durable record of memory text, scope, and lifecycle

use crate::db::DatabasePool;
use crate::error::{EngramError, Result};
use crate::scope::FilterSpec;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, Stream};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Page size for the lazily-produced listing stream.
const QUERY_PAGE_SIZE: usize = 100;

/// Opaque identity of a memory record.
///
/// A dedicated newtype rather than a bare String so origin-scoped deletion
/// (`delete_by_origin`) can never be handed a scope value by accident - the
/// two deletion paths have different blast radii.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a record version.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::IntoStaticStr,
    strum::EnumString,
    strum::Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Active,
    Superseded,
    Deleted,
}

/// A single remembered unit of text with identity, scope, and lifecycle.
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: MemoryId,
    /// Identity chain: the first record's id, carried through supersede.
    pub root_id: MemoryId,
    pub text: String,
    pub scope: FilterSpec,
    pub state: RecordState,
    pub superseded_by: Option<MemoryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or_else(Utc::now)
}

fn corrupt_column(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

/// Parse a MemoryRecord from a row with standard column order:
/// (id, root_id, text, scope, state, superseded_by, created_at, updated_at)
///
/// Corrupt scope or state columns are errors, not defaults: an unparsable
/// scope must never widen into the empty (match-everything) spec.
pub fn parse_record_row(row: &rusqlite::Row) -> rusqlite::Result<MemoryRecord> {
    let scope_json: String = row.get(3)?;
    let state_str: String = row.get(4)?;
    Ok(MemoryRecord {
        id: MemoryId(row.get(0)?),
        root_id: MemoryId(row.get(1)?),
        text: row.get(2)?,
        scope: FilterSpec::from_json(&scope_json).map_err(|e| corrupt_column(3, e))?,
        state: state_str
            .parse::<RecordState>()
            .map_err(|e| corrupt_column(4, e))?,
        superseded_by: row.get::<_, Option<String>>(5)?.map(MemoryId),
        created_at: micros_to_datetime(row.get(6)?),
        updated_at: micros_to_datetime(row.get(7)?),
    })
}

const RECORD_COLUMNS: &str = "id, root_id, text, scope, state, superseded_by, created_at, updated_at";

// ---------------------------------------------------------------------------
// Sync operations over a connection (run on the pool's blocking threads)
// ---------------------------------------------------------------------------

/// Write a new active record with a fresh identity.
pub fn create_record_sync(conn: &Connection, text: &str, scope: &FilterSpec) -> Result<MemoryRecord> {
    let id = MemoryId::generate();
    let now = Utc::now();
    let micros = now.timestamp_micros();
    conn.execute(
        "INSERT INTO memory_records (id, root_id, text, scope, state, created_at, updated_at) \
         VALUES (?1, ?1, ?2, ?3, 'active', ?4, ?4)",
        params![id.as_str(), text, scope.to_json()?, micros],
    )?;
    Ok(MemoryRecord {
        root_id: id.clone(),
        id,
        text: text.to_string(),
        scope: scope.clone(),
        state: RecordState::Active,
        superseded_by: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_record_sync(conn: &Connection, id: &MemoryId) -> Result<Option<MemoryRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM memory_records WHERE id = ?"),
            [id.as_str()],
            parse_record_row,
        )
        .optional()?;
    Ok(record)
}

/// One raw page of active records, most-recent-first. Scope filtering
/// happens in Rust (wildcard-subset semantics are not a SQL equality).
/// The cursor is (created_at, id) of the last row of the previous page.
fn page_active_sync(
    conn: &Connection,
    cursor: Option<(i64, String)>,
    page: usize,
) -> Result<Vec<MemoryRecord>> {
    let mut stmt;
    let rows = match cursor {
        Some((micros, id)) => {
            stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM memory_records \
                 WHERE state = 'active' AND (created_at < ?1 OR (created_at = ?1 AND id < ?2)) \
                 ORDER BY created_at DESC, id DESC LIMIT ?3"
            ))?;
            stmt.query_map(params![micros, id, page as i64], parse_record_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM memory_records \
                 WHERE state = 'active' \
                 ORDER BY created_at DESC, id DESC LIMIT ?1"
            ))?;
            stmt.query_map(params![page as i64], parse_record_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(rows)
}

/// Atomically mark `id` superseded and insert its replacement, carrying the
/// scope and identity chain forward. Fails with NotFound if `id` is not the
/// active record of its chain.
pub fn supersede_sync(conn: &Connection, id: &MemoryId, new_text: &str) -> Result<MemoryRecord> {
    let tx = conn.unchecked_transaction()?;

    let old = conn
        .query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM memory_records WHERE id = ? AND state = 'active'"
            ),
            [id.as_str()],
            parse_record_row,
        )
        .optional()?
        .ok_or_else(|| EngramError::NotFound(format!("no active record with id {id}")))?;

    let new_id = MemoryId::generate();
    let now = Utc::now();
    let micros = now.timestamp_micros();

    // The replacement row must exist before the old row points at it:
    // superseded_by carries an FK and SQLite enforces FKs immediately.
    conn.execute(
        "INSERT INTO memory_records (id, root_id, text, scope, state, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)",
        params![
            new_id.as_str(),
            old.root_id.as_str(),
            new_text,
            old.scope.to_json()?,
            micros
        ],
    )?;
    conn.execute(
        "UPDATE memory_records SET state = 'superseded', superseded_by = ?2, updated_at = ?3 \
         WHERE id = ?1",
        params![id.as_str(), new_id.as_str(), micros],
    )?;

    tx.commit()?;

    Ok(MemoryRecord {
        id: new_id,
        root_id: old.root_id,
        text: new_text.to_string(),
        scope: old.scope,
        state: RecordState::Active,
        superseded_by: None,
        created_at: now,
        updated_at: now,
    })
}

/// Mark a record deleted. Idempotent: deleting an already-deleted or absent
/// record is a no-op, not an error. Returns whether a row transitioned.
pub fn mark_deleted_sync(conn: &Connection, id: &MemoryId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE memory_records SET state = 'deleted', updated_at = ?2 \
         WHERE id = ?1 AND state != 'deleted'",
        params![id.as_str(), Utc::now().timestamp_micros()],
    )?;
    Ok(changed > 0)
}

/// Active records matching `scope` that existed at or before `cutoff`.
/// This is the deleteAll enumeration path: records created after the cutoff
/// survive the wipe by design.
pub fn active_in_scope_at_sync(
    conn: &Connection,
    scope: &FilterSpec,
    cutoff: DateTime<Utc>,
) -> Result<Vec<MemoryRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM memory_records \
         WHERE state = 'active' AND created_at <= ? \
         ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt
        .query_map([cutoff.timestamp_micros()], parse_record_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows.into_iter().filter(|r| r.scope.matches(scope)).collect())
}

/// Ids of superseded/deleted records matching `scope`. These are the rows
/// purge drops, and the ones whose index/graph projections may still linger
/// after an interrupted write.
pub fn non_active_in_scope_sync(conn: &Connection, scope: &FilterSpec) -> Result<Vec<MemoryId>> {
    let mut stmt = conn.prepare(
        "SELECT id, scope FROM memory_records WHERE state IN ('superseded', 'deleted')",
    )?;
    let candidates = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut ids = Vec::new();
    for (id, scope_json) in candidates {
        if FilterSpec::from_json(&scope_json)?.matches(scope) {
            ids.push(MemoryId(id));
        }
    }
    Ok(ids)
}

/// Physically remove superseded/deleted rows matching `scope`.
/// The only path that ever deletes record rows.
pub fn purge_sync(conn: &Connection, scope: &FilterSpec) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT id, scope FROM memory_records WHERE state IN ('superseded', 'deleted')",
    )?;
    let candidates = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut purged = 0;
    for (id, scope_json) in candidates {
        let record_scope = FilterSpec::from_json(&scope_json)?;
        if record_scope.matches(scope) {
            // Clear dangling supersede pointers before removing the row
            conn.execute(
                "UPDATE memory_records SET superseded_by = NULL WHERE superseded_by = ?",
                [&id],
            )?;
            purged += conn.execute("DELETE FROM memory_records WHERE id = ?", [&id])?;
        }
    }
    Ok(purged)
}

// ---------------------------------------------------------------------------
// Async facade over the pool
// ---------------------------------------------------------------------------

/// The Memory Record Store: async access to record persistence.
#[derive(Clone)]
pub struct RecordStore {
    pool: Arc<DatabasePool>,
}

impl RecordStore {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    /// Allocate an identity and write an active record.
    pub async fn create(&self, text: String, scope: FilterSpec) -> Result<MemoryRecord> {
        self.pool
            .run(move |conn| create_record_sync(conn, &text, &scope))
            .await
    }

    pub async fn get(&self, id: &MemoryId) -> Result<Option<MemoryRecord>> {
        let id = id.clone();
        self.pool.run(move |conn| get_record_sync(conn, &id)).await
    }

    /// Active records matching `scope`, most-recent-first, as a lazily
    /// paged stream. Restartable: each call starts a fresh cursor; pages
    /// are fetched on demand, so callers can stop early without paying for
    /// a full listing.
    pub fn query(&self, scope: FilterSpec) -> impl Stream<Item = Result<MemoryRecord>> + use<> {
        struct PageState {
            pool: Arc<DatabasePool>,
            scope: FilterSpec,
            cursor: Option<(i64, String)>,
            buffered: VecDeque<MemoryRecord>,
            exhausted: bool,
        }

        let state = PageState {
            pool: self.pool.clone(),
            scope,
            cursor: None,
            buffered: VecDeque::new(),
            exhausted: false,
        };

        stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(record) = state.buffered.pop_front() {
                    return Ok(Some((record, state)));
                }
                if state.exhausted {
                    return Ok(None);
                }

                let cursor = state.cursor.clone();
                let page = state
                    .pool
                    .run(move |conn| page_active_sync(conn, cursor, QUERY_PAGE_SIZE))
                    .await?;

                if page.len() < QUERY_PAGE_SIZE {
                    state.exhausted = true;
                }
                if let Some(last) = page.last() {
                    state.cursor =
                        Some((last.created_at.timestamp_micros(), last.id.as_str().to_string()));
                }

                state
                    .buffered
                    .extend(page.into_iter().filter(|r| r.scope.matches(&state.scope)));
            }
        })
    }

    /// Convenience: collect the full scoped listing.
    pub async fn query_all(&self, scope: FilterSpec) -> Result<Vec<MemoryRecord>> {
        use futures::TryStreamExt;
        self.query(scope).try_collect().await
    }

    pub async fn supersede(&self, id: &MemoryId, new_text: String) -> Result<MemoryRecord> {
        let id = id.clone();
        self.pool
            .run(move |conn| supersede_sync(conn, &id, &new_text))
            .await
    }

    pub async fn mark_deleted(&self, id: &MemoryId) -> Result<bool> {
        let id = id.clone();
        self.pool
            .run(move |conn| mark_deleted_sync(conn, &id))
            .await
    }

    pub async fn active_in_scope_at(
        &self,
        scope: FilterSpec,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MemoryRecord>> {
        self.pool
            .run(move |conn| active_in_scope_at_sync(conn, &scope, cutoff))
            .await
    }

    pub async fn non_active_in_scope(&self, scope: FilterSpec) -> Result<Vec<MemoryId>> {
        self.pool
            .run(move |conn| non_active_in_scope_sync(conn, &scope))
            .await
    }

    pub async fn purge(&self, scope: FilterSpec) -> Result<usize> {
        self.pool.run(move |conn| purge_sync(conn, &scope)).await
    }
}
