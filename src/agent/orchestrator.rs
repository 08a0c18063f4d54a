//! Per-call session orchestrator
//!
//! Drives one call end to end: each turn runs audio -> transcription ->
//! LLM reasoning (with tool calls) -> speech synthesis -> audio out,
//! while the call-flow state machine enforces ordering. Transient
//! provider failures are retried with a fixed delay; exhaustion aborts
//! the turn with a typed failure.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agent::llm::{
    FinishReason, LlmProvider, LlmResponse, Message, ToolCall, ToolDefinition,
};
use crate::agent::prompts;
use crate::agent::state_machine::{CallState, StateMachine};
use crate::agent::tools::{all_tool_schemas, HandlerResult, ToolDispatcher};
use crate::speech::stt::SttProvider;
use crate::speech::tts::{AudioFormat, AudioResult, TtsProvider};
use crate::storage::Language;

/// High-level orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Listening,
    Processing,
    Speaking,
    Error,
    Ended,
}

/// Orchestrator error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("session already active")]
    SessionAlreadyActive,
    #[error("session not started")]
    SessionNotStarted,
    #[error("session exceeded maximum duration")]
    SessionTimeout,
    #[error("STT failed: {0}")]
    SttFailure(String),
    #[error("LLM failed: {0}")]
    LlmFailure(String),
    #[error("TTS failed: {0}")]
    TtsFailure(String),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
}

/// Per-session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum session duration in seconds
    pub max_duration_seconds: f64,
    /// Target end-to-end turn latency; observational only
    pub target_latency_ms: f64,
    /// Retries for transient provider failures
    pub max_retry_attempts: u32,
    /// Fixed delay between retries in seconds
    pub retry_delay_seconds: f64,
    pub default_voice_en: String,
    pub default_voice_es: String,
    pub audio_format: AudioFormat,
    /// Interpolated into the fallback greeting
    pub business_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_seconds: 300.0,
            target_latency_ms: 2000.0,
            max_retry_attempts: 3,
            retry_delay_seconds: 0.5,
            default_voice_en: crate::speech::tts::DEFAULT_VOICE_EN.to_string(),
            default_voice_es: crate::speech::tts::DEFAULT_VOICE_ES.to_string(),
            audio_format: AudioFormat::Mp3,
            business_name: "our office".to_string(),
        }
    }
}

/// Wall time spent in each phase of a turn, in milliseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyMetrics {
    pub stt_ms: f64,
    pub llm_ms: f64,
    pub tts_ms: f64,
    pub tool_ms: f64,
    pub total_ms: f64,
}

impl LatencyMetrics {
    pub fn reset(&mut self) {
        *self = LatencyMetrics::default();
    }
}

/// One caller-speech -> assistant-speech cycle
#[derive(Debug, Clone, Default)]
pub struct ConversationTurn {
    pub user_text: String,
    pub assistant_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<HandlerResult>,
    pub timestamp: Option<DateTime<Utc>>,
    pub latency: LatencyMetrics,
}

/// Result of ending a session
#[derive(Debug, Clone)]
pub enum SessionSummary {
    Ended {
        session_id: String,
        call_id: String,
        duration_seconds: f64,
        turns_count: usize,
        final_state: CallState,
        language: String,
    },
    NoActiveSession,
}

/// Point-in-time session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: String,
    pub call_id: String,
    pub duration_seconds: f64,
    pub turns_count: usize,
    pub average_turn_latency_ms: f64,
    pub state: OrchestratorState,
    pub call_state: Option<CallState>,
    pub language: String,
    pub llm_tokens_used: u64,
}

/// The per-call conversation orchestrator.
///
/// One instance serves exactly one call; turns run one at a time.
pub struct Orchestrator {
    stt: Arc<dyn SttProvider>,
    llm: Arc<dyn LlmProvider>,
    tts: Arc<dyn TtsProvider>,
    dispatcher: Option<ToolDispatcher>,
    config: SessionConfig,

    session_id: String,
    call_id: String,
    state: OrchestratorState,
    machine: Option<StateMachine>,
    session_start: Option<Instant>,

    messages: Vec<Message>,
    turns: Vec<ConversationTurn>,
    metrics: LatencyMetrics,
    tools: Vec<ToolDefinition>,
}

impl Orchestrator {
    pub fn new(
        stt: Arc<dyn SttProvider>,
        llm: Arc<dyn LlmProvider>,
        tts: Arc<dyn TtsProvider>,
        dispatcher: Option<ToolDispatcher>,
        config: SessionConfig,
    ) -> Self {
        Self {
            stt,
            llm,
            tts,
            dispatcher,
            config,
            session_id: String::new(),
            call_id: String::new(),
            state: OrchestratorState::Idle,
            machine: None,
            session_start: None,
            messages: Vec::new(),
            turns: Vec::new(),
            metrics: LatencyMetrics::default(),
            tools: all_tool_schemas(),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn call_state(&self) -> Option<CallState> {
        self.machine.as_ref().map(|m| m.current())
    }

    pub fn language(&self) -> &str {
        self.machine.as_ref().map(|m| m.language()).unwrap_or("en")
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &LatencyMetrics {
        &self.metrics
    }

    pub fn conversation_history(&self) -> &[Message] {
        &self.messages
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Start a new session. Must be called exactly once per instance.
    pub fn start_session(
        &mut self,
        call_id: &str,
        from_number: &str,
        initial_language: &str,
    ) -> Result<(), OrchestratorError> {
        if self.state != OrchestratorState::Idle {
            return Err(OrchestratorError::SessionAlreadyActive);
        }
        if initial_language != "en" && initial_language != "es" {
            return Err(OrchestratorError::UnsupportedLanguage(
                initial_language.to_string(),
            ));
        }

        self.session_id = Uuid::new_v4().to_string();
        self.call_id = call_id.to_string();
        self.session_start = Some(Instant::now());
        self.state = OrchestratorState::Listening;

        let mut machine = StateMachine::new(call_id);
        machine.set_language(initial_language);
        if !from_number.is_empty() {
            machine
                .context_mut()
                .insert("from_number".to_string(), Value::String(from_number.to_string()));
        }

        let additional = if from_number.is_empty() {
            String::new()
        } else {
            format!("Caller phone: {from_number}")
        };
        let system = prompts::system_prompt(
            initial_language,
            call_id,
            machine.current().as_str(),
            &additional,
        );
        self.messages = vec![Message::system(system)];
        self.turns.clear();
        self.machine = Some(machine);

        tracing::info!(
            session_id = %self.session_id,
            call_id,
            language = initial_language,
            "started session"
        );
        Ok(())
    }

    /// End the session and return its summary. Idempotent: a second
    /// call reports no active session.
    pub fn end_session(&mut self) -> SessionSummary {
        if self.state == OrchestratorState::Idle || self.state == OrchestratorState::Ended {
            return SessionSummary::NoActiveSession;
        }

        let duration = self
            .session_start
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        if let Some(machine) = &mut self.machine {
            if !machine.is_terminal() && machine.can_transition_to(CallState::End) {
                let _ = machine.transition_to(CallState::End);
            }
        }

        let summary = SessionSummary::Ended {
            session_id: self.session_id.clone(),
            call_id: self.call_id.clone(),
            duration_seconds: duration,
            turns_count: self.turns.len(),
            final_state: self
                .machine
                .as_ref()
                .map(|m| m.current())
                .unwrap_or(CallState::End),
            language: self.language().to_string(),
        };

        self.state = OrchestratorState::Ended;
        tracing::info!(
            session_id = %self.session_id,
            duration_seconds = duration,
            turns = self.turns.len(),
            "ended session"
        );
        summary
    }

    /// Set the session language ("en" or "es")
    pub fn set_language(&mut self, language: &str) -> Result<(), OrchestratorError> {
        if language != "en" && language != "es" {
            return Err(OrchestratorError::UnsupportedLanguage(language.to_string()));
        }
        if let Some(machine) = &mut self.machine {
            machine.set_language(language);
        }
        tracing::info!(session_id = %self.session_id, language, "session language set");
        Ok(())
    }

    fn session_timed_out(&self) -> bool {
        self.session_start
            .map(|s| s.elapsed().as_secs_f64() > self.config.max_duration_seconds)
            .unwrap_or(false)
    }

    /// Process one audio turn through the full pipeline.
    ///
    /// Returns the synthesized reply, or `None` when the session has
    /// ended or the assistant produced no speech.
    pub async fn process_audio(
        &mut self,
        audio: &[u8],
        audio_sink: Option<mpsc::Sender<Vec<u8>>>,
    ) -> Result<Option<AudioResult>, OrchestratorError> {
        if self.session_timed_out() {
            tracing::warn!(session_id = %self.session_id, "session timed out");
            self.handle_timeout();
            return Err(OrchestratorError::SessionTimeout);
        }
        if self.state == OrchestratorState::Ended {
            return Ok(None);
        }

        let turn_start = Instant::now();
        self.metrics.reset();
        let mut turn = ConversationTurn {
            timestamp: Some(Utc::now()),
            ..Default::default()
        };

        // 1. STT
        self.state = OrchestratorState::Listening;
        let transcript = self.transcribe_with_retry(audio).await?;
        turn.user_text = transcript.text.clone();
        tracing::debug!(
            text = %transcript.text,
            confidence = transcript.confidence,
            "transcribed caller audio"
        );
        self.messages.push(Message::user(transcript.text));

        // 2. LLM
        self.state = OrchestratorState::Processing;
        let mut response = self.complete_with_retry().await?;

        // 3. Tool calls
        if response.has_tool_calls() {
            turn.tool_calls = response.tool_calls.clone();
            response = self.handle_tool_calls(response, &mut turn).await;
        }

        let assistant_text = response.content.clone().unwrap_or_default();
        turn.assistant_text = assistant_text.clone();
        self.messages.push(Message::assistant(assistant_text.clone()));

        // 4. State machine update from tool names and content
        self.update_state_machine(&response, &turn.tool_calls);

        // 5. TTS and delivery
        if !assistant_text.is_empty() && self.state != OrchestratorState::Ended {
            self.state = OrchestratorState::Speaking;
            let audio_result = self.synthesize_with_retry(&assistant_text).await?;

            if let Some(sink) = audio_sink {
                if sink.send(audio_result.audio_bytes.clone()).await.is_err() {
                    tracing::warn!(session_id = %self.session_id, "audio sink closed");
                }
            }

            self.metrics.total_ms = turn_start.elapsed().as_secs_f64() * 1000.0;
            turn.latency = self.metrics;
            if turn.latency.total_ms > self.config.target_latency_ms {
                tracing::debug!(
                    total_ms = turn.latency.total_ms,
                    target_ms = self.config.target_latency_ms,
                    "turn exceeded target latency"
                );
            }
            self.turns.push(turn);

            if self.machine.as_ref().is_some_and(|m| m.is_terminal()) {
                self.state = OrchestratorState::Ended;
            }
            Ok(Some(audio_result))
        } else {
            self.metrics.total_ms = turn_start.elapsed().as_secs_f64() * 1000.0;
            turn.latency = self.metrics;
            self.turns.push(turn);
            if self.machine.as_ref().is_some_and(|m| m.is_terminal()) {
                self.state = OrchestratorState::Ended;
            }
            Ok(None)
        }
    }

    /// Synthesize the initial greeting, bypassing STT and the LLM
    pub async fn generate_greeting(&mut self) -> Result<AudioResult, OrchestratorError> {
        let Some(machine) = &mut self.machine else {
            return Err(OrchestratorError::SessionNotStarted);
        };

        if machine.can_transition_to(CallState::Greet) {
            let _ = machine.transition_to(CallState::Greet);
        }

        let mut greeting = machine.current_prompt().to_string();
        if greeting.is_empty() {
            greeting = prompts::fallback_greeting(machine.language(), &self.config.business_name);
        }

        self.messages.push(Message::assistant(greeting.clone()));
        self.synthesize_with_retry(&greeting).await
    }

    async fn transcribe_with_retry(
        &mut self,
        audio: &[u8],
    ) -> Result<crate::speech::stt::TranscriptResult, OrchestratorError> {
        let started = Instant::now();
        let language = self.language().to_string();
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_retry_attempts {
            match self.stt.transcribe(audio, &language).await {
                Ok(result) => {
                    self.metrics.stt_ms = started.elapsed().as_secs_f64() * 1000.0;
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "STT attempt failed");
                    let transient = e.is_transient();
                    last_error = e.to_string();
                    if !transient {
                        break;
                    }
                    if attempt < self.config.max_retry_attempts {
                        tokio::time::sleep(std::time::Duration::from_secs_f64(
                            self.config.retry_delay_seconds,
                        ))
                        .await;
                    }
                }
            }
        }

        tracing::error!(
            attempts = self.config.max_retry_attempts,
            "STT failed after retries"
        );
        Err(OrchestratorError::SttFailure(last_error))
    }

    async fn complete_with_retry(&mut self) -> Result<LlmResponse, OrchestratorError> {
        let started = Instant::now();
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_retry_attempts {
            self.refresh_system_prompt();
            let tools = self.dispatcher.is_some().then_some(self.tools.as_slice());
            match self.llm.complete(&self.messages, tools).await {
                Ok(response) => {
                    self.metrics.llm_ms = started.elapsed().as_secs_f64() * 1000.0;
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "LLM attempt failed");
                    let transient = e.is_transient();
                    last_error = e.to_string();
                    if !transient {
                        break;
                    }
                    if attempt < self.config.max_retry_attempts {
                        tokio::time::sleep(std::time::Duration::from_secs_f64(
                            self.config.retry_delay_seconds,
                        ))
                        .await;
                    }
                }
            }
        }

        tracing::error!(
            attempts = self.config.max_retry_attempts,
            "LLM failed after retries"
        );
        Err(OrchestratorError::LlmFailure(last_error))
    }

    async fn synthesize_with_retry(&mut self, text: &str) -> Result<AudioResult, OrchestratorError> {
        let started = Instant::now();
        let (voice, language) = if self.language() == "es" {
            (self.config.default_voice_es.clone(), Language::Es)
        } else {
            (self.config.default_voice_en.clone(), Language::En)
        };
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_retry_attempts {
            match self
                .tts
                .synthesize(text, language, &voice, self.config.audio_format)
                .await
            {
                Ok(result) => {
                    self.metrics.tts_ms = started.elapsed().as_secs_f64() * 1000.0;
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "TTS attempt failed");
                    let transient = e.is_transient();
                    last_error = e.to_string();
                    if !transient {
                        break;
                    }
                    if attempt < self.config.max_retry_attempts {
                        tokio::time::sleep(std::time::Duration::from_secs_f64(
                            self.config.retry_delay_seconds,
                        ))
                        .await;
                    }
                }
            }
        }

        tracing::error!(
            attempts = self.config.max_retry_attempts,
            "TTS failed after retries"
        );
        Err(OrchestratorError::TtsFailure(last_error))
    }

    /// Execute tool calls, append tool messages, and fetch one
    /// follow-up completion. A failing follow-up degrades to a
    /// localized apology instead of looping further.
    async fn handle_tool_calls(
        &mut self,
        response: LlmResponse,
        turn: &mut ConversationTurn,
    ) -> LlmResponse {
        let Some(dispatcher) = &self.dispatcher else {
            tracing::warn!("tool calls received but no dispatcher configured");
            return response;
        };

        let started = Instant::now();
        self.messages.push(Message::assistant_with_tools(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in &response.tool_calls {
            tracing::info!(tool = %call.name, "executing tool call");
            let result = dispatcher.execute(&call.name, &call.arguments).await;
            self.messages.push(Message::tool_result(
                call.id.clone(),
                call.name.clone(),
                result.to_llm_response(),
            ));
            turn.tool_results.push(result);
        }
        self.metrics.tool_ms = started.elapsed().as_secs_f64() * 1000.0;

        let tools = Some(self.tools.as_slice());
        match self.llm.complete(&self.messages, tools).await {
            Ok(follow_up) => follow_up,
            Err(e) => {
                tracing::error!(error = %e, "follow-up completion after tools failed");
                LlmResponse {
                    content: Some(
                        prompts::PIPELINE_ERROR
                            .for_language(self.language())
                            .to_string(),
                    ),
                    finish_reason: Some(FinishReason::Error),
                    ..Default::default()
                }
            }
        }
    }

    /// Rebuild the system prompt from the current machine context
    fn refresh_system_prompt(&mut self) {
        let Some(machine) = &self.machine else { return };
        if self.messages.is_empty() {
            return;
        }

        let mut context_parts = Vec::new();
        if let Some(number) = machine.context().get("from_number").and_then(|v| v.as_str()) {
            context_parts.push(format!("Caller phone: {number}"));
        }
        if let Some(name) = machine.context().get("customer_name").and_then(|v| v.as_str()) {
            context_parts.push(format!("Customer name: {name}"));
        }
        if let Some(intent) = machine.context().get("intent").and_then(|v| v.as_str()) {
            context_parts.push(format!("Intent: {intent}"));
        }

        let prompt = prompts::system_prompt(
            machine.language(),
            &self.call_id,
            machine.current().as_str(),
            &context_parts.join("\n"),
        );
        if self.messages[0].role == crate::agent::llm::MessageRole::System {
            self.messages[0] = Message::system(prompt);
        }
    }

    /// Advance the state machine from tool names and content heuristics
    fn update_state_machine(&mut self, response: &LlmResponse, tool_calls: &[ToolCall]) {
        let Some(machine) = &mut self.machine else { return };

        for call in tool_calls {
            match call.name.as_str() {
                "create_callback_task" => {
                    Self::try_transition(machine, CallState::CreateCallbackTask);
                }
                "transfer_call" => {
                    Self::try_transition(machine, CallState::TransferOrWrapup);
                }
                "update_call_record" => {
                    if let Some(language) = call.arguments.get("language").and_then(|v| v.as_str())
                    {
                        machine.set_language(language);
                    }
                    if let Some(customer_type) =
                        call.arguments.get("customer_type").and_then(|v| v.as_str())
                    {
                        machine.context_mut().insert(
                            "customer_type".to_string(),
                            Value::String(customer_type.to_string()),
                        );
                    }
                    if let Some(intent) = call.arguments.get("intent").and_then(|v| v.as_str()) {
                        machine
                            .context_mut()
                            .insert("intent".to_string(), Value::String(intent.to_string()));
                    }
                }
                _ => {}
            }
        }

        // Auto-progress through the opening states
        match machine.current() {
            CallState::Init => {
                Self::try_transition(machine, CallState::Greet);
            }
            CallState::Greet => {
                Self::try_transition(machine, CallState::LanguageSelect);
            }
            _ => {}
        }

        // Farewell phrases close the call when END is reachable
        let content = response.content.as_deref().unwrap_or("").to_lowercase();
        if ["goodbye", "have a great day", "que tenga"]
            .iter()
            .any(|phrase| content.contains(phrase))
        {
            Self::try_transition(machine, CallState::End);
        }
    }

    fn try_transition(machine: &mut StateMachine, target: CallState) -> bool {
        if machine.can_transition_to(target) {
            // legality just checked
            let _ = machine.transition_to(target);
            tracing::debug!(state = target.as_str(), "state transition");
            true
        } else {
            false
        }
    }

    fn handle_timeout(&mut self) {
        if let Some(machine) = &mut self.machine {
            if machine.can_transition_to(CallState::Timeout) {
                let _ = machine.transition_to(CallState::Timeout);
            } else if machine.can_transition_to(CallState::End) {
                let _ = machine.transition_to(CallState::End);
            }
        }
        self.state = OrchestratorState::Ended;
        tracing::warn!(
            session_id = %self.session_id,
            max_duration = self.config.max_duration_seconds,
            "session ended by timeout"
        );
    }

    /// Plain-text transcript with speaker labels
    pub fn transcript_text(&self) -> String {
        let mut lines = Vec::new();
        for turn in &self.turns {
            if !turn.user_text.is_empty() {
                lines.push(format!("User: {}", turn.user_text));
            }
            if !turn.assistant_text.is_empty() {
                lines.push(format!("Assistant: {}", turn.assistant_text));
            }
        }
        lines.join("\n")
    }

    /// Session statistics snapshot
    pub fn session_stats(&self) -> SessionStats {
        let duration = self
            .session_start
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let average_turn_latency_ms = if self.turns.is_empty() {
            0.0
        } else {
            self.turns.iter().map(|t| t.latency.total_ms).sum::<f64>() / self.turns.len() as f64
        };
        SessionStats {
            session_id: self.session_id.clone(),
            call_id: self.call_id.clone(),
            duration_seconds: duration,
            turns_count: self.turns.len(),
            average_turn_latency_ms,
            state: self.state,
            call_state: self.call_state(),
            language: self.language().to_string(),
            llm_tokens_used: self.llm.total_tokens_used(),
        }
    }
}
