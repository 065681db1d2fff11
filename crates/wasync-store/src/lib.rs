pub mod chats;
pub mod contacts;
pub mod database;
pub mod error;
pub mod groups;
pub mod messages;
pub mod record;
pub mod row_helpers;
pub mod schema;
pub mod session_data;
pub mod session_store;

pub use chats::ChatRow;
pub use contacts::ContactRow;
pub use database::Database;
pub use error::StoreError;
pub use groups::GroupRow;
pub use messages::MessageRow;
pub use record::{FieldWrite, Record, RecordPatch, SqlValue};
pub use session_data::SessionDataRow;
pub use session_store::{SessionStore, SessionTx};
