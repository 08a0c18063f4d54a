//! Shared test doubles: scripted speech/LLM providers, a recording
//! email provider, and a local stub for the SMS REST endpoint.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::Path;
use axum::routing::post;
use axum::{Json, Router};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use voxline::agent::llm::{
    LlmChunk, LlmError, LlmProvider, LlmResponse, Message, ToolDefinition,
};
use voxline::notifications::{EmailProvider, NotificationResult};
use voxline::speech::stt::{SttError, SttProvider, TranscriptChunk, TranscriptResult};
use voxline::speech::tts::{AudioFormat, AudioResult, TtsError, TtsProvider, Voice};
use voxline::storage::Language;

/// STT that fails `failures` times with a transient error, then
/// returns the scripted text.
pub struct ScriptedStt {
    pub text: String,
    pub failures: AtomicU32,
    pub attempts: AtomicU32,
}

impl ScriptedStt {
    pub fn ok(text: &str) -> Self {
        Self {
            text: text.to_string(),
            failures: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn failing_first(text: &str, failures: u32) -> Self {
        Self {
            text: text.to_string(),
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SttProvider for ScriptedStt {
    async fn transcribe(&self, _audio: &[u8], language: &str) -> Result<TranscriptResult, SttError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(SttError::Provider("injected failure".to_string()));
        }
        Ok(TranscriptResult {
            text: self.text.clone(),
            confidence: 0.93,
            language: language.to_string(),
            duration_seconds: 1.2,
        })
    }

    async fn transcribe_stream(
        &self,
        _audio: BoxStream<'static, Vec<u8>>,
        _language: &str,
    ) -> Result<BoxStream<'static, Result<TranscriptChunk, SttError>>, SttError> {
        let text = self.text.clone();
        Ok(futures::stream::once(async move {
            Ok(TranscriptChunk {
                partial_text: text,
                is_final: true,
            })
        })
        .boxed())
    }
}

/// LLM that replays a fixed sequence of responses
pub struct ScriptedLlm {
    replies: Mutex<Vec<LlmResponse>>,
}

impl ScriptedLlm {
    pub fn new(mut replies: Vec<LlmResponse>) -> Self {
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
        }
    }

    pub fn reply(text: &str) -> LlmResponse {
        LlmResponse {
            content: Some(text.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Self::reply("Is there anything else I can help with?")))
    }

    async fn stream_complete(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<BoxStream<'static, Result<LlmChunk, LlmError>>, LlmError> {
        Err(LlmError::Provider("streaming not scripted".to_string()))
    }
}

/// TTS that echoes the text back as bytes
pub struct EchoTts;

#[async_trait]
impl TtsProvider for EchoTts {
    async fn synthesize(
        &self,
        text: &str,
        _language: Language,
        _voice_id: &str,
        format: AudioFormat,
    ) -> Result<AudioResult, TtsError> {
        if text.trim().is_empty() {
            return Err(TtsError::InvalidText);
        }
        Ok(AudioResult {
            audio_bytes: text.as_bytes().to_vec(),
            format,
            duration_seconds: 1.0,
            sample_rate: 24_000,
        })
    }

    async fn available_voices(&self, _language: Language) -> Result<Vec<Voice>, TtsError> {
        Ok(Vec::new())
    }
}

/// A sent email captured by the recording provider
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
}

/// Email provider that records sends (or fails on demand)
pub struct RecordingEmailProvider {
    pub sent: Mutex<Vec<SentEmail>>,
    pub fail: bool,
}

impl RecordingEmailProvider {
    pub fn working() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn sent_emails(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for RecordingEmailProvider {
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
    ) -> NotificationResult {
        if self.fail {
            return NotificationResult::failure("mock-email", "injected email failure");
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to_email.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
            text_body: text_body.map(String::from),
        });
        NotificationResult::success("mock-email", Some("msg-1".to_string()))
    }
}

/// Messages received by the stub SMS endpoint, as raw form bodies
pub type SmsLog = Arc<Mutex<Vec<String>>>;

/// Spawn a local HTTP stub that accepts the telephony provider's
/// message-send calls and records their bodies. Returns the base URL
/// to point the notification service at.
pub async fn spawn_sms_stub() -> (String, SmsLog) {
    let log: SmsLog = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();

    let app = Router::new().route(
        "/Accounts/{sid}/Messages.json",
        post(move |Path(_sid): Path<String>, body: String| {
            let log = log_clone.clone();
            async move {
                // store the decoded form for readable assertions
                let decoded: Vec<String> = url::form_urlencoded::parse(body.as_bytes())
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                log.lock().unwrap().push(decoded.join("\n"));
                Json(serde_json::json!({"sid": "SM_stub", "status": "queued"}))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), log)
}
