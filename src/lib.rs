//! Voxline - Bilingual AI Voice Receptionist
//!
//! Answers inbound phone calls through a cloud telephony provider,
//! converses with callers in English or Spanish via an STT -> LLM ->
//! TTS pipeline with tool calling, creates prioritized callback tasks,
//! and notifies staff over SMS and email.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use voxline::agent::{Orchestrator, SessionConfig};
//! use voxline::agent::openai::OpenAiProvider;
//! use voxline::speech::stt::DeepgramStt;
//! use voxline::speech::tts::DeepgramTts;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = voxline::Config::from_env();
//!     let mut orchestrator = Orchestrator::new(
//!         Arc::new(DeepgramStt::from_config(&config)),
//!         Arc::new(OpenAiProvider::from_config(&config)),
//!         Arc::new(DeepgramTts::from_config(&config)),
//!         None,
//!         SessionConfig::default(),
//!     );
//!     orchestrator.start_session("call-123", "+15551234567", "en")?;
//!     let greeting = orchestrator.generate_greeting().await?;
//!     println!("greeting: {} bytes", greeting.audio_bytes.len());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod notifications;
pub mod server;
pub mod speech;
pub mod storage;
pub mod telephony;

// Re-export commonly used types for convenience
pub use agent::{Orchestrator, OrchestratorError, SessionConfig};
pub use config::Config;
pub use notifications::{NotificationResult, NotificationService};
pub use server::AppState;
pub use storage::{Call, CallStore, CallbackTask, TaskPriority};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
