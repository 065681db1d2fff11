use std::collections::HashSet;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use tracing::instrument;

use wasync_core::SessionId;

use crate::database::Database;
use crate::error::StoreError;
use crate::record::{FieldWrite, Record, RecordPatch};

/// SQLite caps bound parameters per statement; id lists are chunked below it.
const ID_CHUNK: usize = 500;

/// Storage facade scoped to one session.
///
/// The physical database is shared by every session; this type binds the
/// `session_id` into every statement so callers only ever address rows by
/// natural id.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
    session_id: SessionId,
}

impl SessionStore {
    pub fn new(db: Database, session_id: SessionId) -> Self {
        Self { db, session_id }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run `f` inside one transaction; nothing is applied if it fails.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&SessionTx<'_>) -> Result<T, StoreError>,
    {
        self.db.with_transaction(|conn| {
            let tx = SessionTx {
                conn,
                session_id: &self.session_id,
            };
            f(&tx)
        })
    }

    /// Create the row, or replace the fields present on `record` if it exists.
    #[instrument(skip(self, record), fields(session_id = %self.session_id, table = R::TABLE, id = record.id()))]
    pub fn upsert<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| upsert_row(conn, &self.session_id, record))
    }

    #[instrument(skip(self), fields(session_id = %self.session_id, table = R::TABLE))]
    pub fn find<R: Record>(&self, id: &str) -> Result<Option<R>, StoreError> {
        self.db.with_conn(|conn| find_row(conn, &self.session_id, id))
    }

    /// Apply a patch and return the updated row.
    /// Fails with [`StoreError::NotFound`] when the row does not exist.
    #[instrument(skip(self, patch), fields(session_id = %self.session_id, table = R::TABLE, writes = patch.len()))]
    pub fn update<R: Record>(&self, id: &str, patch: &RecordPatch) -> Result<R, StoreError> {
        self.db
            .with_conn(|conn| update_row(conn, &self.session_id, id, patch))
    }

    /// Bulk delete by natural id. Absent ids are ignored.
    #[instrument(skip(self, ids), fields(session_id = %self.session_id, table = R::TABLE, ids = ids.len()))]
    pub fn delete_many<R: Record>(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.db
            .with_conn(|conn| delete_ids::<R>(conn, &self.session_id, ids))
    }

    /// Rows for this session ordered by natural id.
    #[instrument(skip(self), fields(session_id = %self.session_id, table = R::TABLE))]
    pub fn list<R: Record>(&self, limit: u32, offset: u32) -> Result<Vec<R>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM {} WHERE session_id = ?1 ORDER BY id ASC LIMIT ?2 OFFSET ?3",
                select_list::<R>(),
                R::TABLE
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params![self.session_id.as_str(), limit, offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(R::from_row(row)?);
            }
            Ok(results)
        })
    }

    pub fn count<R: Record>(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE session_id = ?1", R::TABLE);
            conn.query_row(&sql, [self.session_id.as_str()], |row| row.get(0))
                .map_err(StoreError::from)
        })
    }
}

/// Session-scoped view of an open transaction.
pub struct SessionTx<'a> {
    conn: &'a Connection,
    session_id: &'a SessionId,
}

impl SessionTx<'_> {
    /// Remove every row of this kind for the session.
    pub fn delete_all<R: Record>(&self) -> Result<usize, StoreError> {
        let sql = format!("DELETE FROM {} WHERE session_id = ?1", R::TABLE);
        Ok(self.conn.execute(&sql, [self.session_id.as_str()])?)
    }

    /// Which of `ids` already exist for the session.
    pub fn existing_ids<R: Record>(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let sid = self.session_id.as_str();
        let mut found = HashSet::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                "SELECT id FROM {} WHERE session_id = ?1 AND id IN ({})",
                R::TABLE,
                placeholders(2, chunk.len())
            );
            let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(chunk.len() + 1);
            params.push(&sid);
            params.extend(chunk.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params.as_slice())?;
            while let Some(row) = rows.next()? {
                found.insert(row.get::<_, String>(0)?);
            }
        }
        Ok(found)
    }

    /// Plain inserts; a natural id that already exists is a conflict.
    pub fn insert_many<R: Record>(&self, records: &[R]) -> Result<usize, StoreError> {
        let sql = format!(
            "INSERT INTO {} (session_id, id, {}) VALUES ({})",
            R::TABLE,
            R::COLUMNS.join(", "),
            placeholders(1, R::COLUMNS.len() + 2)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut inserted = 0;
        for record in records {
            inserted += stmt.execute(rusqlite::params_from_iter(bind_row(
                self.session_id,
                record,
            )?))?;
        }
        Ok(inserted)
    }
}

fn upsert_row<R: Record>(
    conn: &Connection,
    session_id: &SessionId,
    record: &R,
) -> Result<(), StoreError> {
    let assignments = R::COLUMNS
        .iter()
        .map(|c| format!("{c} = COALESCE(excluded.{c}, {c})"))
        .collect::<Vec<_>>()
        .join(", ");
    let conflict_action = if assignments.is_empty() {
        "NOTHING".to_string()
    } else {
        format!("UPDATE SET {assignments}")
    };
    let sql = format!(
        "INSERT INTO {table} (session_id, id, {cols}) VALUES ({params})
         ON CONFLICT (session_id, id) DO {conflict_action}",
        table = R::TABLE,
        cols = R::COLUMNS.join(", "),
        params = placeholders(1, R::COLUMNS.len() + 2),
    );
    conn.execute(&sql, rusqlite::params_from_iter(bind_row(session_id, record)?))?;
    Ok(())
}

fn find_row<R: Record>(
    conn: &Connection,
    session_id: &SessionId,
    id: &str,
) -> Result<Option<R>, StoreError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE session_id = ?1 AND id = ?2",
        select_list::<R>(),
        R::TABLE
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([session_id.as_str(), id])?;
    match rows.next()? {
        Some(row) => R::from_row(row).map(Some),
        None => Ok(None),
    }
}

fn update_row<R: Record>(
    conn: &Connection,
    session_id: &SessionId,
    id: &str,
    patch: &RecordPatch,
) -> Result<R, StoreError> {
    if patch.is_empty() {
        return find_row(conn, session_id, id)?
            .ok_or_else(|| StoreError::NotFound(format!("{} {id}", R::TABLE)));
    }

    let mut assignments = Vec::with_capacity(patch.len());
    let mut params: Vec<SqlValue> = Vec::with_capacity(patch.len() + 2);
    for (column, write) in patch.writes() {
        if !R::COLUMNS.contains(column) {
            return Err(StoreError::Database(format!(
                "unknown column {column} for {}",
                R::TABLE
            )));
        }
        let n = params.len() + 1;
        match write {
            FieldWrite::Set(value) => {
                assignments.push(format!("{column} = ?{n}"));
                params.push(value.clone());
            }
            FieldWrite::Increment(delta) => {
                assignments.push(format!("{column} = COALESCE({column}, 0) + ?{n}"));
                params.push(SqlValue::Integer(*delta));
            }
        }
    }
    let sid = params.len() + 1;
    params.push(SqlValue::Text(session_id.as_str().to_string()));
    params.push(SqlValue::Text(id.to_string()));

    let sql = format!(
        "UPDATE {} SET {} WHERE session_id = ?{sid} AND id = ?{} RETURNING {}",
        R::TABLE,
        assignments.join(", "),
        sid + 1,
        select_list::<R>()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
    match rows.next()? {
        Some(row) => R::from_row(row),
        None => Err(StoreError::NotFound(format!("{} {id}", R::TABLE))),
    }
}

fn delete_ids<R: Record>(
    conn: &Connection,
    session_id: &SessionId,
    ids: &[String],
) -> Result<usize, StoreError> {
    let sid = session_id.as_str();
    let mut deleted = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let sql = format!(
            "DELETE FROM {} WHERE session_id = ?1 AND id IN ({})",
            R::TABLE,
            placeholders(2, chunk.len())
        );
        let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(chunk.len() + 1);
        params.push(&sid);
        params.extend(chunk.iter().map(|id| id as &dyn rusqlite::types::ToSql));
        deleted += conn.execute(&sql, params.as_slice())?;
    }
    Ok(deleted)
}

fn bind_row<R: Record>(session_id: &SessionId, record: &R) -> Result<Vec<SqlValue>, StoreError> {
    let mut values = Vec::with_capacity(R::COLUMNS.len() + 2);
    values.push(SqlValue::Text(session_id.as_str().to_string()));
    values.push(SqlValue::Text(record.id().to_string()));
    let columns = record.values()?;
    if columns.len() != R::COLUMNS.len() {
        return Err(StoreError::Serialization(format!(
            "{} expects {} values, got {}",
            R::TABLE,
            R::COLUMNS.len(),
            columns.len()
        )));
    }
    values.extend(columns);
    Ok(values)
}

fn select_list<R: Record>() -> String {
    std::iter::once("id")
        .chain(R::COLUMNS.iter().copied())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `?start, ?start+1, ...` for `count` parameters.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
