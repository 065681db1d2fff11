use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::error::StoreError;
use crate::record::Record;
use crate::row_helpers;
use crate::session_store::SessionStore;

/// Natural id of a message: unique per chat, not per session.
pub fn natural_id(remote_jid: &str, message_id: &str) -> String {
    format!("{remote_jid}|{message_id}")
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: String,
    pub remote_jid: String,
    pub message_id: String,
    pub from_me: Option<bool>,
    pub participant: Option<String>,
    pub message_timestamp: Option<i64>,
    pub push_name: Option<String>,
    pub status: Option<i64>,
    pub starred: Option<bool>,
    /// Message content tree as delivered by the protocol.
    pub content: Option<Value>,
}

impl Record for MessageRow {
    const TABLE: &'static str = "messages";
    const COLUMNS: &'static [&'static str] = &[
        "remote_jid",
        "message_id",
        "from_me",
        "participant",
        "message_timestamp",
        "push_name",
        "status",
        "starred",
        "content",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<SqlValue>, StoreError> {
        Ok(vec![
            self.remote_jid.clone().into(),
            self.message_id.clone().into(),
            self.from_me.into(),
            self.participant.clone().into(),
            self.message_timestamp.into(),
            self.push_name.clone().into(),
            self.status.into(),
            self.starred.into(),
            row_helpers::json_text(self.content.as_ref())?.into(),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        const T: &str = MessageRow::TABLE;
        Ok(Self {
            id: row_helpers::get(row, 0, T, "id")?,
            remote_jid: row_helpers::get(row, 1, T, "remote_jid")?,
            message_id: row_helpers::get(row, 2, T, "message_id")?,
            from_me: row_helpers::get_opt(row, 3, T, "from_me")?,
            participant: row_helpers::get_opt(row, 4, T, "participant")?,
            message_timestamp: row_helpers::get_opt(row, 5, T, "message_timestamp")?,
            push_name: row_helpers::get_opt(row, 6, T, "push_name")?,
            status: row_helpers::get_opt(row, 7, T, "status")?,
            starred: row_helpers::get_opt(row, 8, T, "starred")?,
            content: row_helpers::get_json_opt(row, 9, T, "content")?,
        })
    }
}

impl SessionStore {
    /// Remove every message of one chat for this session.
    #[instrument(skip(self), fields(session_id = %self.session_id()))]
    pub fn delete_chat_messages(&self, remote_jid: &str) -> Result<usize, StoreError> {
        self.database().with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM messages WHERE session_id = ?1 AND remote_jid = ?2",
                [self.session_id().as_str(), remote_jid],
            )?;
            Ok(deleted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use serde_json::json;
    use wasync_core::SessionId;

    fn message(jid: &str, id: &str) -> MessageRow {
        MessageRow {
            id: natural_id(jid, id),
            remote_jid: jid.into(),
            message_id: id.into(),
            content: Some(json!({"conversation": "hello"})),
            ..Default::default()
        }
    }

    #[test]
    fn same_message_id_in_two_chats_are_distinct_rows() {
        let store = SessionStore::new(Database::in_memory().unwrap(), SessionId::from_raw("s1"));
        store.upsert(&message("a@s.whatsapp.net", "M1")).unwrap();
        store.upsert(&message("b@s.whatsapp.net", "M1")).unwrap();
        assert_eq!(store.count::<MessageRow>().unwrap(), 2);

        let row: MessageRow = store.find("a@s.whatsapp.net|M1").unwrap().unwrap();
        assert_eq!(row.content, Some(json!({"conversation": "hello"})));
    }

    #[test]
    fn delete_chat_messages_is_scoped_to_chat_and_session() {
        let db = Database::in_memory().unwrap();
        let s1 = SessionStore::new(db.clone(), SessionId::from_raw("s1"));
        let s2 = SessionStore::new(db, SessionId::from_raw("s2"));

        s1.upsert(&message("a@s.whatsapp.net", "M1")).unwrap();
        s1.upsert(&message("a@s.whatsapp.net", "M2")).unwrap();
        s1.upsert(&message("b@s.whatsapp.net", "M3")).unwrap();
        s2.upsert(&message("a@s.whatsapp.net", "M1")).unwrap();

        assert_eq!(s1.delete_chat_messages("a@s.whatsapp.net").unwrap(), 2);
        assert_eq!(s1.count::<MessageRow>().unwrap(), 1);
        assert_eq!(s2.count::<MessageRow>().unwrap(), 1);
    }
}
