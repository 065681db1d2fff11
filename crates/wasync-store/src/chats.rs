use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::record::Record;
use crate::row_helpers::{self, base64_bytes};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRow {
    pub id: String,
    pub name: Option<String>,
    pub unread_count: Option<i64>,
    pub last_message_timestamp: Option<i64>,
    pub archived: Option<bool>,
    pub pinned: Option<i64>,
    pub mute_end_time: Option<i64>,
    pub read_only: Option<bool>,
    #[serde(default, with = "base64_bytes")]
    pub contact_primary_identity_key: Option<Vec<u8>>,
    #[serde(default, with = "base64_bytes")]
    pub tc_token: Option<Vec<u8>>,
}

impl Record for ChatRow {
    const TABLE: &'static str = "chats";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "unread_count",
        "last_message_timestamp",
        "archived",
        "pinned",
        "mute_end_time",
        "read_only",
        "contact_primary_identity_key",
        "tc_token",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<SqlValue>, StoreError> {
        Ok(vec![
            self.name.clone().into(),
            self.unread_count.into(),
            self.last_message_timestamp.into(),
            self.archived.into(),
            self.pinned.into(),
            self.mute_end_time.into(),
            self.read_only.into(),
            self.contact_primary_identity_key.clone().into(),
            self.tc_token.clone().into(),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        const T: &str = ChatRow::TABLE;
        Ok(Self {
            id: row_helpers::get(row, 0, T, "id")?,
            name: row_helpers::get_opt(row, 1, T, "name")?,
            unread_count: row_helpers::get_opt(row, 2, T, "unread_count")?,
            last_message_timestamp: row_helpers::get_opt(row, 3, T, "last_message_timestamp")?,
            archived: row_helpers::get_opt(row, 4, T, "archived")?,
            pinned: row_helpers::get_opt(row, 5, T, "pinned")?,
            mute_end_time: row_helpers::get_opt(row, 6, T, "mute_end_time")?,
            read_only: row_helpers::get_opt(row, 7, T, "read_only")?,
            contact_primary_identity_key: row_helpers::get_opt(
                row,
                8,
                T,
                "contact_primary_identity_key",
            )?,
            tc_token: row_helpers::get_opt(row, 9, T, "tc_token")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::record::{FieldWrite, RecordPatch};
    use crate::session_store::SessionStore;
    use wasync_core::SessionId;

    fn store() -> SessionStore {
        SessionStore::new(Database::in_memory().unwrap(), SessionId::from_raw("s1"))
    }

    #[test]
    fn binary_columns_stored_as_blobs() {
        let store = store();
        let chat = ChatRow {
            id: "c1".into(),
            tc_token: Some(vec![1, 2, 3]),
            contact_primary_identity_key: Some(vec![0xff]),
            ..Default::default()
        };
        store.upsert(&chat).unwrap();

        let kind: String = store
            .database()
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT typeof(tc_token) FROM chats WHERE id = 'c1'",
                    [],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(kind, "blob");

        let back: ChatRow = store.find("c1").unwrap().unwrap();
        assert_eq!(back, chat);
    }

    #[test]
    fn increment_treats_null_as_zero() {
        let store = store();
        store
            .upsert(&ChatRow { id: "c1".into(), ..Default::default() })
            .unwrap();
        let patch = RecordPatch::new().with("unread_count", Some(FieldWrite::Increment(3)));
        let row: ChatRow = store.update("c1", &patch).unwrap();
        assert_eq!(row.unread_count, Some(3));
        let row: ChatRow = store.update("c1", &patch).unwrap();
        assert_eq!(row.unread_count, Some(6));
    }

    #[test]
    fn serializes_camel_case_with_base64_blobs() {
        let chat = ChatRow {
            id: "c1".into(),
            unread_count: Some(2),
            tc_token: Some(b"hi".to_vec()),
            ..Default::default()
        };
        let json = serde_json::to_value(&chat).unwrap();
        assert_eq!(json["unreadCount"], 2);
        assert_eq!(json["tcToken"], "aGk=");
        assert!(json.get("pk").is_none());
    }
}
