use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Read a nullable JSON text column into a typed value.
pub fn get_json_opt<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    match get_opt::<String>(row, idx, table, column)? {
        Some(raw) => parse_json(&raw, table, column).map(Some),
        None => Ok(None),
    }
}

/// Parse a JSON string column, returning CorruptRow on parse failure.
pub fn parse_json<T: DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Encode an optional value as JSON text for a nullable column.
pub fn json_text<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>, StoreError> {
    value.map(serde_json::to_string).transpose().map_err(StoreError::from)
}

/// Serde adapter rendering optional raw bytes as base64 text in JSON output.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Blob {
        #[serde(with = "base64_bytes")]
        token: Option<Vec<u8>>,
    }

    #[test]
    fn parse_json_success() {
        let value: serde_json::Value = parse_json(r#"{"key": "value"}"#, "messages", "content").unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<serde_json::Value, _> = parse_json("not valid json", "messages", "content");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "messages", column: "content", .. })
        ));
    }

    #[test]
    fn json_text_none_stays_null() {
        assert_eq!(json_text::<Vec<u8>>(None).unwrap(), None);
        assert_eq!(json_text(Some(&vec![1, 2])).unwrap().as_deref(), Some("[1,2]"));
    }

    #[test]
    fn bytes_render_as_base64() {
        let blob = Blob { token: Some(vec![0xde, 0xad, 0xbe, 0xef]) };
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["token"], "3q2+7w==");
        let back: Blob = serde_json::from_value(json).unwrap();
        assert_eq!(back, blob);

        let empty = serde_json::to_value(Blob { token: None }).unwrap();
        assert!(empty["token"].is_null());
    }
}
