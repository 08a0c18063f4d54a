//! Per-call session registry
//!
//! The process serves many concurrent calls; each call owns one
//! orchestrator instance. The registry creates sessions, serializes
//! turns within a call (one turn at a time per call, parallel across
//! calls), persists transcript turns as they happen, and tears
//! sessions down.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::agent::llm::LlmProvider;
use crate::agent::orchestrator::{
    Orchestrator, OrchestratorError, SessionConfig, SessionSummary,
};
use crate::agent::tools::ToolDispatcher;
use crate::notifications::NotificationService;
use crate::speech::stt::SttProvider;
use crate::speech::tts::{AudioResult, TtsProvider};
use crate::storage::{CallStore, CallUpdate};
use crate::telephony::adapter::TelephonyAdapter;

/// Session-registry errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session for call {0}")]
    NotFound(String),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// One audio turn's outcome as seen by the transport layer
#[derive(Debug)]
pub struct TurnOutput {
    pub audio: Option<AudioResult>,
    pub assistant_text: String,
    pub call_state: Option<crate::agent::state_machine::CallState>,
}

/// Registry of live call sessions.
///
/// Sessions are keyed by call id. Each orchestrator sits behind its
/// own mutex so a call's turns run strictly one after another while
/// different calls proceed in parallel.
pub struct SessionRegistry {
    stt: Arc<dyn SttProvider>,
    llm: Arc<dyn LlmProvider>,
    tts: Arc<dyn TtsProvider>,
    store: CallStore,
    notifications: Arc<NotificationService>,
    telephony: Option<Arc<dyn TelephonyAdapter>>,
    session_config: SessionConfig,
    sessions: Mutex<HashMap<String, Arc<Mutex<Orchestrator>>>>,
}

impl SessionRegistry {
    pub fn new(
        stt: Arc<dyn SttProvider>,
        llm: Arc<dyn LlmProvider>,
        tts: Arc<dyn TtsProvider>,
        store: CallStore,
        notifications: Arc<NotificationService>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            stt,
            llm,
            tts,
            store,
            notifications,
            telephony: None,
            session_config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a telephony adapter so sessions can transfer calls
    pub fn with_telephony(mut self, telephony: Arc<dyn TelephonyAdapter>) -> Self {
        self.telephony = Some(telephony);
        self
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Start a session for a call and synthesize its greeting.
    ///
    /// Fails with `SessionAlreadyActive` when the call already has one.
    pub async fn start_session(
        &self,
        call_id: &str,
        from_number: &str,
        language: &str,
    ) -> Result<AudioResult, SessionError> {
        {
            let sessions = self.sessions.lock().await;
            if sessions.contains_key(call_id) {
                return Err(OrchestratorError::SessionAlreadyActive.into());
            }
        }

        let mut dispatcher = ToolDispatcher::new(self.store.clone())
            .with_notifications(self.notifications.clone());
        if let Some(telephony) = &self.telephony {
            dispatcher = dispatcher.with_telephony(telephony.clone());
        }
        let mut orchestrator = Orchestrator::new(
            self.stt.clone(),
            self.llm.clone(),
            self.tts.clone(),
            Some(dispatcher),
            self.session_config.clone(),
        );
        orchestrator.start_session(call_id, from_number, language)?;
        let greeting = orchestrator.generate_greeting().await?;

        self.sessions
            .lock()
            .await
            .insert(call_id.to_string(), Arc::new(Mutex::new(orchestrator)));
        tracing::info!(call_id, language, "session registered");
        Ok(greeting)
    }

    async fn session(&self, call_id: &str) -> Result<Arc<Mutex<Orchestrator>>, SessionError> {
        self.sessions
            .lock()
            .await
            .get(call_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(call_id.to_string()))
    }

    /// Run one audio turn for a call and persist the exchanged turns
    /// into the call's transcript.
    pub async fn process_turn(
        &self,
        call_id: &str,
        audio: &[u8],
    ) -> Result<TurnOutput, SessionError> {
        let session = self.session(call_id).await?;
        let mut orchestrator = session.lock().await;

        let result = orchestrator.process_audio(audio, None).await;

        // A timed-out session is dead weight in the registry
        if matches!(result, Err(OrchestratorError::SessionTimeout)) {
            drop(orchestrator);
            self.sessions.lock().await.remove(call_id);
            return Err(OrchestratorError::SessionTimeout.into());
        }
        let audio_out = result?;

        let (assistant_text, user_text, duration_ms) = orchestrator
            .turns()
            .last()
            .map(|t| {
                (
                    t.assistant_text.clone(),
                    t.user_text.clone(),
                    t.latency.total_ms as u64,
                )
            })
            .unwrap_or_default();
        let call_state = orchestrator.call_state();
        drop(orchestrator);

        // Transcript writes are best-effort; a storage hiccup must not
        // break the live call
        if !user_text.is_empty() {
            if let Err(e) = self
                .store
                .append_transcript_turn(call_id, "caller", &user_text, None, None)
                .await
            {
                tracing::warn!(call_id, error = %e, "failed to persist caller turn");
            }
        }
        if !assistant_text.is_empty() {
            if let Err(e) = self
                .store
                .append_transcript_turn(call_id, "agent", &assistant_text, None, Some(duration_ms))
                .await
            {
                tracing::warn!(call_id, error = %e, "failed to persist agent turn");
            }
        }

        Ok(TurnOutput {
            audio: audio_out,
            assistant_text,
            call_state,
        })
    }

    /// Change a live session's language (driven by the DTMF
    /// language-select webhook)
    pub async fn set_language(&self, call_id: &str, language: &str) -> Result<(), SessionError> {
        let session = self.session(call_id).await?;
        let mut orchestrator = session.lock().await;
        orchestrator.set_language(language)?;
        Ok(())
    }

    /// End and deregister a session, persisting its summary text
    pub async fn end_session(&self, call_id: &str) -> Result<SessionSummary, SessionError> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(call_id)
                .ok_or_else(|| SessionError::NotFound(call_id.to_string()))?
        };
        let mut orchestrator = session.lock().await;
        let summary = orchestrator.end_session();

        let transcript_text = orchestrator.transcript_text();
        if !transcript_text.is_empty() {
            if let Err(e) = self
                .store
                .update_call(
                    call_id,
                    CallUpdate {
                        summary: Some(transcript_text),
                        ..Default::default()
                    },
                )
                .await
            {
                tracing::warn!(call_id, error = %e, "failed to persist session summary");
            }
        }

        tracing::info!(call_id, "session deregistered");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{LlmChunk, LlmError, LlmResponse, Message, ToolDefinition};
    use crate::speech::stt::{SttError, TranscriptChunk, TranscriptResult};
    use crate::speech::tts::{AudioFormat, TtsError, Voice};
    use crate::storage::{Language, TranscriptDocument};
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    struct EchoStt;

    #[async_trait]
    impl SttProvider for EchoStt {
        async fn transcribe(
            &self,
            audio: &[u8],
            language: &str,
        ) -> Result<TranscriptResult, SttError> {
            Ok(TranscriptResult {
                text: String::from_utf8_lossy(audio).into_owned(),
                confidence: 0.9,
                language: language.to_string(),
                duration_seconds: 1.0,
            })
        }

        async fn transcribe_stream(
            &self,
            _audio: BoxStream<'static, Vec<u8>>,
            _language: &str,
        ) -> Result<BoxStream<'static, Result<TranscriptChunk, SttError>>, SttError> {
            Err(SttError::Provider("not used".to_string()))
        }
    }

    struct ConstLlm;

    #[async_trait]
    impl LlmProvider for ConstLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
        ) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: Some("Understood.".to_string()),
                ..Default::default()
            })
        }

        async fn stream_complete(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
        ) -> Result<BoxStream<'static, Result<LlmChunk, LlmError>>, LlmError> {
            Err(LlmError::Provider("not used".to_string()))
        }
    }

    struct ByteTts;

    #[async_trait]
    impl TtsProvider for ByteTts {
        async fn synthesize(
            &self,
            text: &str,
            _language: Language,
            _voice_id: &str,
            format: AudioFormat,
        ) -> Result<AudioResult, TtsError> {
            Ok(AudioResult {
                audio_bytes: text.as_bytes().to_vec(),
                format,
                duration_seconds: 0.5,
                sample_rate: 24_000,
            })
        }

        async fn available_voices(&self, _language: Language) -> Result<Vec<Voice>, TtsError> {
            Ok(Vec::new())
        }
    }

    fn registry(store: CallStore) -> SessionRegistry {
        let config = crate::config::Config::default();
        SessionRegistry::new(
            Arc::new(EchoStt),
            Arc::new(ConstLlm),
            Arc::new(ByteTts),
            store,
            Arc::new(NotificationService::from_config(&config)),
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_start_turn_end_lifecycle() {
        let store = CallStore::open_in_memory().unwrap();
        store
            .insert_call(Some("CA_S1"), "+15551234567", Some(Language::En))
            .await
            .unwrap();
        let registry = registry(store.clone());

        let greeting = registry
            .start_session("CA_S1", "+15551234567", "en")
            .await
            .unwrap();
        assert!(!greeting.audio_bytes.is_empty());
        assert_eq!(registry.active_sessions().await, 1);

        let output = registry.process_turn("CA_S1", b"hello there").await.unwrap();
        assert_eq!(output.assistant_text, "Understood.");
        assert!(output.audio.is_some());

        // caller and agent turns landed in the stored transcript
        let call = store.get_call("CA_S1").await.unwrap().unwrap();
        let doc = TranscriptDocument::from_json(call.transcript.as_deref().unwrap()).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.turns[0].speaker, "caller");
        assert_eq!(doc.turns[0].text, "hello there");
        assert_eq!(doc.turns[1].speaker, "agent");

        let summary = registry.end_session("CA_S1").await.unwrap();
        assert!(matches!(summary, SessionSummary::Ended { .. }));
        assert_eq!(registry.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_double_start_conflicts() {
        let store = CallStore::open_in_memory().unwrap();
        store
            .insert_call(Some("CA_S2"), "+15551234567", None)
            .await
            .unwrap();
        let registry = registry(store);

        registry.start_session("CA_S2", "", "en").await.unwrap();
        let err = registry.start_session("CA_S2", "", "en").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Orchestrator(OrchestratorError::SessionAlreadyActive)
        ));
    }

    #[tokio::test]
    async fn test_unknown_call_turns_are_not_found() {
        let registry = registry(CallStore::open_in_memory().unwrap());
        let err = registry.process_turn("CA_NONE", b"audio").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        let err = registry.end_session("CA_NONE").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_language_switches_session() {
        let store = CallStore::open_in_memory().unwrap();
        store
            .insert_call(Some("CA_S3"), "+15551234567", None)
            .await
            .unwrap();
        let registry = registry(store);

        registry.start_session("CA_S3", "", "en").await.unwrap();
        registry.set_language("CA_S3", "es").await.unwrap();
        let err = registry.set_language("CA_S3", "fr").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Orchestrator(OrchestratorError::UnsupportedLanguage(_))
        ));
    }
}
