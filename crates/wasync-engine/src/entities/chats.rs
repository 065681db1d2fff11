use wasync_core::payloads::ChatPayload;
use wasync_core::EntityKind;
use wasync_store::{ChatRow, RecordPatch};

use super::EntitySpec;
use crate::merge::CounterMerge;
use crate::transform::{self, TransformError};

pub struct Chats;

impl EntitySpec for Chats {
    const KIND: EntityKind = EntityKind::Chat;
    type Row = ChatRow;
    type Payload = ChatPayload;
    type Update = ChatPayload;

    fn to_row(chat: &ChatPayload) -> Result<ChatRow, TransformError> {
        Ok(ChatRow {
            id: transform::required("id", &chat.id)?.to_string(),
            name: chat.name.clone(),
            unread_count: transform::integer("unreadCount", chat.unread_count.as_ref())?,
            last_message_timestamp: transform::timestamp(
                "conversationTimestamp",
                chat.conversation_timestamp.as_ref(),
            )?,
            archived: chat.archived,
            pinned: transform::timestamp("pinned", chat.pinned.as_ref())?,
            mute_end_time: transform::timestamp("muteEndTime", chat.mute_end_time.as_ref())?,
            read_only: chat.read_only,
            contact_primary_identity_key: transform::bytes(
                "contactPrimaryIdentityKey",
                chat.contact_primary_identity_key.as_ref(),
            )?,
            tc_token: transform::bytes("tcToken", chat.tc_token.as_ref())?,
        })
    }

    fn update_id(update: &ChatPayload) -> Result<String, TransformError> {
        transform::required("id", &update.id).map(str::to_string)
    }

    fn to_patch(update: &ChatPayload, _existing: &ChatRow) -> Result<RecordPatch, TransformError> {
        let row = Self::to_row(update)?;
        Ok(RecordPatch::new()
            .set_opt("name", row.name)
            .with(
                "unread_count",
                row.unread_count
                    .map(|n| CounterMerge::AddPositiveReplaceOtherwise.write(n)),
            )
            .set_opt("last_message_timestamp", row.last_message_timestamp)
            .set_opt("archived", row.archived)
            .set_opt("pinned", row.pinned)
            .set_opt("mute_end_time", row.mute_end_time)
            .set_opt("read_only", row.read_only)
            .set_opt("contact_primary_identity_key", row.contact_primary_identity_key)
            .set_opt("tc_token", row.tc_token))
    }
}
