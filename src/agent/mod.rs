//! Conversation agent: LLM contract and provider, bilingual prompts,
//! call-flow state machine, tool dispatcher, and the per-call session
//! orchestrator.

pub mod llm;
pub mod openai;
pub mod orchestrator;
pub mod prompts;
pub mod state_machine;
pub mod tools;

pub use llm::{LlmError, LlmProvider, LlmResponse, Message, MessageRole, ToolCall, ToolDefinition};
pub use orchestrator::{Orchestrator, OrchestratorError, SessionConfig, SessionSummary};
pub use state_machine::{CallState, InvalidTransition, StateMachine};
pub use tools::{HandlerResult, HandlerStatus, ToolDispatcher, ToolInvocation};
