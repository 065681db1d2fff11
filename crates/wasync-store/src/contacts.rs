use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::record::Record;
use crate::row_helpers;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRow {
    pub id: String,
    pub name: Option<String>,
    pub notify: Option<String>,
    pub verified_name: Option<String>,
    pub img_url: Option<String>,
    pub status: Option<String>,
}

impl Record for ContactRow {
    const TABLE: &'static str = "contacts";
    const COLUMNS: &'static [&'static str] = &["name", "notify", "verified_name", "img_url", "status"];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<SqlValue>, StoreError> {
        Ok(vec![
            self.name.clone().into(),
            self.notify.clone().into(),
            self.verified_name.clone().into(),
            self.img_url.clone().into(),
            self.status.clone().into(),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        const T: &str = ContactRow::TABLE;
        Ok(Self {
            id: row_helpers::get(row, 0, T, "id")?,
            name: row_helpers::get_opt(row, 1, T, "name")?,
            notify: row_helpers::get_opt(row, 2, T, "notify")?,
            verified_name: row_helpers::get_opt(row, 3, T, "verified_name")?,
            img_url: row_helpers::get_opt(row, 4, T, "img_url")?,
            status: row_helpers::get_opt(row, 5, T, "status")?,
        })
    }
}
