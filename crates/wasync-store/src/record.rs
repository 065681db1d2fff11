pub use rusqlite::types::Value as SqlValue;
use serde::Serialize;

use crate::error::StoreError;

/// A reconciled row kind stored in its own table.
///
/// Tables share one layout: hidden surrogate `pk`, `session_id`, natural `id`,
/// then the entity columns listed in [`Record::COLUMNS`].
pub trait Record: Clone + Send + Sync + Serialize + 'static {
    const TABLE: &'static str;
    /// Entity columns after `id`, in binding order.
    const COLUMNS: &'static [&'static str];

    /// Natural id, unique per session.
    fn id(&self) -> &str;

    /// Column values in [`Record::COLUMNS`] order.
    fn values(&self) -> Result<Vec<SqlValue>, StoreError>;

    /// Build a record from a row selected as `id, COLUMNS...`.
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError>;
}

/// How a single column changes during a partial update.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldWrite {
    Set(SqlValue),
    /// Add to the stored value, treating NULL as zero.
    Increment(i64),
}

/// Field-level mutation applied to an existing row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordPatch {
    writes: Vec<(&'static str, FieldWrite)>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: &'static str, write: FieldWrite) {
        self.writes.retain(|(c, _)| *c != column);
        self.writes.push((column, write));
    }

    pub fn set(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.push(column, FieldWrite::Set(value.into()));
        self
    }

    /// Set a column only when a value is present; absent fields stay untouched.
    pub fn set_opt<T: Into<SqlValue>>(mut self, column: &'static str, value: Option<T>) -> Self {
        if let Some(v) = value {
            self.push(column, FieldWrite::Set(v.into()));
        }
        self
    }

    pub fn with(mut self, column: &'static str, write: Option<FieldWrite>) -> Self {
        if let Some(w) = write {
            self.push(column, w);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[(&'static str, FieldWrite)] {
        &self.writes
    }

    pub fn get(&self, column: &str) -> Option<&FieldWrite> {
        self.writes.iter().find(|(c, _)| *c == column).map(|(_, w)| w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_opt_skips_absent_values() {
        let patch = RecordPatch::new()
            .set_opt("name", Some("Ana".to_string()))
            .set_opt::<String>("notify", None);
        assert_eq!(patch.len(), 1);
        assert_eq!(
            patch.get("name"),
            Some(&FieldWrite::Set(SqlValue::Text("Ana".into())))
        );
        assert!(patch.get("notify").is_none());
    }

    #[test]
    fn later_write_replaces_earlier_for_same_column() {
        let patch = RecordPatch::new()
            .set("unread_count", 3i64)
            .with("unread_count", Some(FieldWrite::Increment(2)));
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("unread_count"), Some(&FieldWrite::Increment(2)));
    }
}
