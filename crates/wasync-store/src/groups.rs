use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};

use wasync_core::payloads::GroupParticipant;

use crate::error::StoreError;
use crate::record::Record;
use crate::row_helpers;

/// Group metadata. Participants are kept as a JSON array column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRow {
    pub id: String,
    pub subject: Option<String>,
    pub owner: Option<String>,
    pub description: Option<String>,
    pub creation: Option<i64>,
    pub restrict_settings: Option<bool>,
    pub announce: Option<bool>,
    pub size: Option<i64>,
    pub participants: Option<Vec<GroupParticipant>>,
}

impl Record for GroupRow {
    const TABLE: &'static str = "group_metadata";
    const COLUMNS: &'static [&'static str] = &[
        "subject",
        "owner",
        "description",
        "creation",
        "restrict_settings",
        "announce",
        "size",
        "participants",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<SqlValue>, StoreError> {
        Ok(vec![
            self.subject.clone().into(),
            self.owner.clone().into(),
            self.description.clone().into(),
            self.creation.into(),
            self.restrict_settings.into(),
            self.announce.into(),
            self.size.into(),
            row_helpers::json_text(self.participants.as_ref())?.into(),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        const T: &str = GroupRow::TABLE;
        Ok(Self {
            id: row_helpers::get(row, 0, T, "id")?,
            subject: row_helpers::get_opt(row, 1, T, "subject")?,
            owner: row_helpers::get_opt(row, 2, T, "owner")?,
            description: row_helpers::get_opt(row, 3, T, "description")?,
            creation: row_helpers::get_opt(row, 4, T, "creation")?,
            restrict_settings: row_helpers::get_opt(row, 5, T, "restrict_settings")?,
            announce: row_helpers::get_opt(row, 6, T, "announce")?,
            size: row_helpers::get_opt(row, 7, T, "size")?,
            participants: row_helpers::get_json_opt(row, 8, T, "participants")?,
        })
    }
}
