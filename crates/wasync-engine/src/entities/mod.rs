//! Per-entity mapping from protocol payloads to stored rows.

mod chats;
mod contacts;
mod groups;
mod messages;
mod session;

pub use chats::Chats;
pub use contacts::Contacts;
pub use groups::{apply_participant_action, Groups};
pub use messages::Messages;
pub use session::SessionData;

use wasync_core::EntityKind;
use wasync_store::{Record, RecordPatch};

use crate::transform::TransformError;

/// Binds an entity kind to its payload shapes and row type.
pub trait EntitySpec: Send + Sync + 'static {
    const KIND: EntityKind;

    type Row: Record;
    /// Full entity as carried by `set` and `upsert` events.
    type Payload: Send + Sync + 'static;
    /// Partial entity as carried by `update` events.
    type Update: Send + Sync + 'static;

    fn to_row(payload: &Self::Payload) -> Result<Self::Row, TransformError>;

    /// Natural id addressed by an update.
    fn update_id(update: &Self::Update) -> Result<String, TransformError>;

    /// Field writes for an update. Absent fields are left untouched.
    fn to_patch(update: &Self::Update, existing: &Self::Row) -> Result<RecordPatch, TransformError>;
}
