use serde_json::Value;

use wasync_core::payloads::SessionDataPayload;
use wasync_core::EntityKind;
use wasync_store::{RecordPatch, SessionDataRow};

use super::EntitySpec;
use crate::transform::{self, TransformError};

pub struct SessionData;

impl EntitySpec for SessionData {
    const KIND: EntityKind = EntityKind::Session;
    type Row = SessionDataRow;
    type Payload = SessionDataPayload;
    type Update = SessionDataPayload;

    fn to_row(item: &SessionDataPayload) -> Result<SessionDataRow, TransformError> {
        Ok(SessionDataRow {
            id: transform::required("id", &item.id)?.to_string(),
            data: item.data.clone(),
        })
    }

    fn update_id(update: &SessionDataPayload) -> Result<String, TransformError> {
        transform::required("id", &update.id).map(str::to_string)
    }

    /// Objects are merged key by key, incoming keys winning. Any other value
    /// replaces the stored one.
    fn to_patch(update: &SessionDataPayload, existing: &SessionDataRow) -> Result<RecordPatch, TransformError> {
        let merged = match (&existing.data, &update.data) {
            (_, Value::Null) => return Ok(RecordPatch::new()),
            (Value::Object(stored), Value::Object(incoming)) => {
                let mut out = stored.clone();
                for (key, value) in incoming {
                    out.insert(key.clone(), value.clone());
                }
                Value::Object(out)
            }
            (_, other) => other.clone(),
        };
        Ok(RecordPatch::new().set("data", merged.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wasync_store::{FieldWrite, SqlValue};

    fn existing(data: Value) -> SessionDataRow {
        SessionDataRow {
            id: "creds".into(),
            data,
        }
    }

    fn written(patch: &RecordPatch) -> Value {
        match patch.get("data") {
            Some(FieldWrite::Set(SqlValue::Text(text))) => serde_json::from_str(text).unwrap(),
            other => panic!("unexpected write {other:?}"),
        }
    }

    #[test]
    fn objects_are_shallow_merged() {
        let update = SessionDataPayload {
            id: "creds".into(),
            data: json!({"me": "b", "registered": true}),
        };
        let patch = SessionData::to_patch(&update, &existing(json!({"me": "a", "keep": 1}))).unwrap();
        assert_eq!(written(&patch), json!({"me": "b", "keep": 1, "registered": true}));
    }

    #[test]
    fn non_objects_replace() {
        let update = SessionDataPayload {
            id: "creds".into(),
            data: json!([1, 2]),
        };
        let patch = SessionData::to_patch(&update, &existing(json!({"me": "a"}))).unwrap();
        assert_eq!(written(&patch), json!([1, 2]));
    }

    #[test]
    fn null_update_writes_nothing() {
        let update = SessionDataPayload {
            id: "creds".into(),
            data: Value::Null,
        };
        assert!(SessionData::to_patch(&update, &existing(json!({}))).unwrap().is_empty());
    }
}
