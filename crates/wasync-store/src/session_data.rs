use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::record::Record;
use crate::row_helpers;

/// Session-level metadata keyed by name (`creds`, sync keys, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionDataRow {
    pub id: String,
    pub data: Value,
}

impl Record for SessionDataRow {
    const TABLE: &'static str = "session_data";
    const COLUMNS: &'static [&'static str] = &["data"];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<SqlValue>, StoreError> {
        Ok(vec![serde_json::to_string(&self.data)?.into()])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        const T: &str = SessionDataRow::TABLE;
        let raw: String = row_helpers::get(row, 1, T, "data")?;
        Ok(Self {
            id: row_helpers::get(row, 0, T, "id")?,
            data: row_helpers::parse_json(&raw, T, "data")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::record::RecordPatch;
    use crate::session_store::SessionStore;
    use serde_json::json;
    use wasync_core::SessionId;

    #[test]
    fn data_is_replaced_by_patch() {
        let store = SessionStore::new(Database::in_memory().unwrap(), SessionId::from_raw("s1"));
        store
            .upsert(&SessionDataRow { id: "creds".into(), data: json!({"me": "a"}) })
            .unwrap();
        let patch = RecordPatch::new().set("data", json!({"me": "b"}).to_string());
        let row: SessionDataRow = store.update("creds", &patch).unwrap();
        assert_eq!(row.data, json!({"me": "b"}));
    }
}
