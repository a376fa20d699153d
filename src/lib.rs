//! LLM Dispatch - validated, logged chat turns against a local inference server
//!
//! Every turn is checked against a reloadable schema, sent to an
//! `OpenAI`-compatible endpoint, and recorded in SQLite under its
//! conversation so the transcript can be rebuilt later.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod payload;
pub mod schema;
pub mod transcript;
pub mod transport;

pub use config::DispatchConfig;
pub use db::{Conversation, Database, DbError, DispatchRecord};
pub use dispatch::{DispatchError, DispatchHandle, Dispatcher, RecordStore};
pub use payload::PayloadBuilder;
pub use schema::{SchemaSource, SchemaValidator, ValidationError};
pub use transcript::{reconstruct, Message, Transcript};
pub use transport::{Endpoint, HttpTransport, LoggingTransport, Transport, TransportError};
