pub mod events;
pub mod ids;
pub mod payloads;
pub mod source;

pub use events::{EntityKind, Operation, ProtocolEvent};
pub use ids::SessionId;
pub use source::EventSource;
