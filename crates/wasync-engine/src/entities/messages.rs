use wasync_core::payloads::{MessageFields, MessageKey, MessagePayload, MessageUpdate};
use wasync_core::EntityKind;
use wasync_store::messages::natural_id;
use wasync_store::{MessageRow, RecordPatch};

use super::EntitySpec;
use crate::transform::{self, TransformError};

pub struct Messages;

impl Messages {
    pub fn key_id(key: &MessageKey) -> Result<String, TransformError> {
        Ok(natural_id(
            transform::required("key.remoteJid", &key.remote_jid)?,
            transform::required("key.id", &key.id)?,
        ))
    }
}

struct Normalized {
    message_timestamp: Option<i64>,
    status: Option<i64>,
}

fn normalize(fields: &MessageFields) -> Result<Normalized, TransformError> {
    Ok(Normalized {
        message_timestamp: transform::timestamp("messageTimestamp", fields.message_timestamp.as_ref())?,
        status: transform::message_status(fields.status.as_ref())?,
    })
}

impl EntitySpec for Messages {
    const KIND: EntityKind = EntityKind::Message;
    type Row = MessageRow;
    type Payload = MessagePayload;
    type Update = MessageUpdate;

    fn to_row(message: &MessagePayload) -> Result<MessageRow, TransformError> {
        let normalized = normalize(&message.fields)?;
        Ok(MessageRow {
            id: Self::key_id(&message.key)?,
            remote_jid: message.key.remote_jid.clone(),
            message_id: message.key.id.clone(),
            from_me: message.key.from_me,
            participant: message.key.participant.clone(),
            message_timestamp: normalized.message_timestamp,
            push_name: message.fields.push_name.clone(),
            status: normalized.status,
            starred: message.fields.starred,
            content: message.fields.message.clone(),
        })
    }

    fn update_id(update: &MessageUpdate) -> Result<String, TransformError> {
        Self::key_id(&update.key)
    }

    fn to_patch(update: &MessageUpdate, _existing: &MessageRow) -> Result<RecordPatch, TransformError> {
        let fields = &update.update;
        let normalized = normalize(fields)?;
        let content = fields
            .message
            .as_ref()
            .filter(|v| !v.is_null())
            .map(|v| v.to_string());
        Ok(RecordPatch::new()
            .set_opt("message_timestamp", normalized.message_timestamp)
            .set_opt("push_name", fields.push_name.clone())
            .set_opt("status", normalized.status)
            .set_opt("starred", fields.starred)
            .set_opt("content", content))
    }
}
