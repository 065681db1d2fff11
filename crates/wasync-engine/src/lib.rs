//! Event-driven reconciliation of protocol entities into per-session storage.

pub mod config;
pub mod emitter;
pub mod engine;
pub mod entities;
pub mod error;
pub mod handler;
pub mod merge;
pub mod registry;
pub mod sinks;
pub mod transform;

pub use config::{ConfigError, EngineConfig, UpsertPolicy};
pub use emitter::{Emitter, Envelope, EnvelopeError};
pub use engine::SyncEngine;
pub use entities::EntitySpec;
pub use error::{EngineError, HandlerError};
pub use handler::EntityHandler;
pub use merge::CounterMerge;
pub use registry::{HandlerRegistry, SessionHandlers};
pub use sinks::{ChannelSink, LogSink, NotificationSink, SinkError, WebhookSink};
pub use transform::TransformError;
