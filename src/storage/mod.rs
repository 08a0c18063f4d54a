//! Persistence layer: call and callback-task records plus structured
//! transcripts, backed by SQLite.

pub mod models;
pub mod store;
pub mod transcript;

pub use models::{Call, CallStatus, CallbackTask, CustomerType, Language, TaskPriority, TaskStatus};
pub use store::{CallStore, CallUpdate, NewCall, NewCallbackTask, StoreError};
pub use transcript::{TranscriptDocument, TranscriptTurn};
