//! Speech-to-text provider contract and Deepgram reference impl
//!
//! The trait keeps vendor specifics out of the orchestrator: adapters
//! map their SDK/HTTP failures onto `SttError` before returning.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;

use crate::config::Config;

/// Languages accepted for transcription (ISO 639-1)
pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "es"];

/// Default confidence threshold. Results below it are surfaced with
/// their score; the core does not filter them.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Result of a batch transcription
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    pub text: String,
    /// Confidence score in [0, 1]
    pub confidence: f64,
    pub language: String,
    pub duration_seconds: f64,
}

/// Chunk from streaming transcription
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptChunk {
    pub partial_text: String,
    /// The last chunk of an utterance is final
    pub is_final: bool,
}

/// STT error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("audio data is empty")]
    EmptyAudio,
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("transcription timed out")]
    Timeout,
    #[error("STT rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("invalid audio: {0}")]
    InvalidAudio(String),
    #[error("STT provider error: {0}")]
    Provider(String),
}

impl SttError {
    /// Transient errors are retried by the orchestrator; client-input
    /// errors are surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SttError::Timeout | SttError::RateLimited(_) | SttError::Provider(_)
        )
    }
}

/// Pluggable speech-to-text contract
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Transcribe a complete audio buffer
    async fn transcribe(&self, audio: &[u8], language: &str)
        -> Result<TranscriptResult, SttError>;

    /// Transcribe a stream of audio chunks. Implementations must emit
    /// a chunk with `is_final = true` as the last element.
    async fn transcribe_stream(
        &self,
        audio: BoxStream<'static, Vec<u8>>,
        language: &str,
    ) -> Result<BoxStream<'static, Result<TranscriptChunk, SttError>>, SttError>;
}

fn check_language(language: &str) -> Result<(), SttError> {
    if SUPPORTED_LANGUAGES.contains(&language) {
        Ok(())
    } else {
        Err(SttError::UnsupportedLanguage(language.to_string()))
    }
}

// ---- Deepgram reference implementation ----

const DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deepgram batch-transcription adapter
pub struct DeepgramStt {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    pub confidence_threshold: f64,
}

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    #[serde(default)]
    metadata: DeepgramMetadata,
    #[serde(default)]
    results: DeepgramResults,
}

#[derive(Debug, Default, Deserialize)]
struct DeepgramMetadata {
    #[serde(default)]
    duration: f64,
}

#[derive(Debug, Default, Deserialize)]
struct DeepgramResults {
    #[serde(default)]
    channels: Vec<DeepgramChannel>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    #[serde(default)]
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

impl DeepgramStt {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: DEEPGRAM_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: "nova-2".to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.deepgram_api_key.clone())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> SttError {
        match status.as_u16() {
            429 => SttError::RateLimited(format!("{status}: {body}")),
            400 | 415 => SttError::InvalidAudio(format!("{status}: {body}")),
            _ => SttError::Provider(format!("{status}: {body}")),
        }
    }
}

#[async_trait]
impl SttProvider for DeepgramStt {
    async fn transcribe(
        &self,
        audio: &[u8],
        language: &str,
    ) -> Result<TranscriptResult, SttError> {
        if audio.is_empty() {
            return Err(SttError::EmptyAudio);
        }
        check_language(language)?;

        let url = format!(
            "{}/listen?model={}&language={}&smart_format=true",
            self.base_url, self.model, language
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SttError::Timeout
                } else {
                    SttError::Provider(format!("request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body));
        }

        let parsed: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| SttError::Provider(format!("invalid response: {e}")))?;

        let alternative = parsed
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .ok_or_else(|| SttError::Provider("no transcription alternatives".to_string()))?;

        if alternative.confidence < self.confidence_threshold {
            tracing::debug!(
                confidence = alternative.confidence,
                threshold = self.confidence_threshold,
                "transcription confidence below threshold"
            );
        }

        Ok(TranscriptResult {
            text: alternative.transcript.clone(),
            confidence: alternative.confidence,
            language: language.to_string(),
            duration_seconds: parsed.metadata.duration,
        })
    }

    async fn transcribe_stream(
        &self,
        mut audio: BoxStream<'static, Vec<u8>>,
        language: &str,
    ) -> Result<BoxStream<'static, Result<TranscriptChunk, SttError>>, SttError> {
        check_language(language)?;

        // Batch fallback: drain the stream, transcribe once, emit a
        // single final chunk. Low-latency interim results would need
        // the provider's websocket API.
        let mut buffer = Vec::new();
        while let Some(chunk) = audio.next().await {
            buffer.extend_from_slice(&chunk);
        }
        let result = self.transcribe(&buffer, language).await;
        let chunk = result.map(|r| TranscriptChunk {
            partial_text: r.text,
            is_final: true,
        });
        Ok(futures::stream::once(async move { chunk }).boxed())
    }
}
