//! Text-to-speech provider contract and Deepgram reference impl
//!
//! Synthesis results are cached in a bounded LRU keyed by
//! `(text, voice, format)`; repeated prompts (greetings, state
//! prompts) hit the cache instead of the provider.

use async_trait::async_trait;
use lru::LruCache;
use once_cell::sync::Lazy;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::Config;
use crate::storage::Language;

/// Default output sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Default bound on cached synthesis results
pub const DEFAULT_MAX_CACHE_SIZE: usize = 100;

/// Supported output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Mp3,
    Wav,
    Pcm,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm => "pcm",
        }
    }

    /// Provider-side encoding name
    fn deepgram_encoding(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "linear16",
            AudioFormat::Pcm => "linear16",
        }
    }
}

/// Voice gender classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceGender {
    Male,
    Female,
    Neutral,
}

/// A selectable TTS voice
#[derive(Debug, Clone)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub language: Language,
    pub gender: VoiceGender,
}

/// Result of one synthesis call
#[derive(Debug, Clone)]
pub struct AudioResult {
    pub audio_bytes: Vec<u8>,
    pub format: AudioFormat,
    pub duration_seconds: f64,
    pub sample_rate: u32,
}

/// TTS error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("text is empty or whitespace only")]
    InvalidText,
    #[error("synthesis timed out")]
    Timeout,
    #[error("TTS rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("TTS provider error: {0}")]
    Provider(String),
}

impl TtsError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TtsError::Timeout | TtsError::RateLimited(_) | TtsError::Provider(_)
        )
    }
}

/// Pluggable text-to-speech contract
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize speech. Unknown voice ids silently fall back to the
    /// language's default voice.
    async fn synthesize(
        &self,
        text: &str,
        language: Language,
        voice_id: &str,
        format: AudioFormat,
    ) -> Result<AudioResult, TtsError>;

    /// Voices available for a language
    async fn available_voices(&self, language: Language) -> Result<Vec<Voice>, TtsError>;
}

// ---- Deepgram reference implementation ----

const DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default English voice id
pub const DEFAULT_VOICE_EN: &str = "aura-2-thalia-en";
/// Default Spanish voice id
pub const DEFAULT_VOICE_ES: &str = "aura-2-estrella-es";

/// Known voices per language. Kept static: the provider's catalog is
/// stable and the orchestrator only needs id lookup and fallback.
static VOICE_CATALOG: Lazy<Vec<Voice>> = Lazy::new(|| {
    vec![
        Voice {
            id: DEFAULT_VOICE_EN.to_string(),
            name: "Thalia".to_string(),
            language: Language::En,
            gender: VoiceGender::Female,
        },
        Voice {
            id: "aura-2-orion-en".to_string(),
            name: "Orion".to_string(),
            language: Language::En,
            gender: VoiceGender::Male,
        },
        Voice {
            id: DEFAULT_VOICE_ES.to_string(),
            name: "Estrella".to_string(),
            language: Language::Es,
            gender: VoiceGender::Female,
        },
        Voice {
            id: "aura-2-javier-es".to_string(),
            name: "Javier".to_string(),
            language: Language::Es,
            gender: VoiceGender::Male,
        },
    ]
});

fn default_voice_for(language: Language) -> &'static str {
    match language {
        Language::En => DEFAULT_VOICE_EN,
        Language::Es => DEFAULT_VOICE_ES,
    }
}

type CacheKey = (String, String, AudioFormat);

/// Deepgram speech-synthesis adapter with an LRU result cache
pub struct DeepgramTts {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    cache: Mutex<LruCache<CacheKey, AudioResult>>,
}

impl DeepgramTts {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_cache_size(api_key, DEFAULT_MAX_CACHE_SIZE)
    }

    pub fn with_cache_size(api_key: impl Into<String>, max_cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_cache_size.max(1)).unwrap_or(
            NonZeroUsize::new(DEFAULT_MAX_CACHE_SIZE).expect("nonzero default"),
        );
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: DEEPGRAM_BASE_URL.to_string(),
            api_key: api_key.into(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.deepgram_api_key.clone())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Resolve a requested voice id, falling back to the language
    /// default when the id is unknown.
    fn resolve_voice(voice_id: &str, language: Language) -> String {
        let known = VOICE_CATALOG.iter().any(|v| v.id == voice_id);
        if known {
            voice_id.to_string()
        } else {
            tracing::debug!(voice_id, "unknown voice id, using language default");
            default_voice_for(language).to_string()
        }
    }

    fn cache_get(&self, key: &CacheKey) -> Option<AudioResult> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn cache_put(&self, key: CacheKey, value: AudioResult) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, value);
        }
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> TtsError {
        match status.as_u16() {
            429 => TtsError::RateLimited(format!("{status}: {body}")),
            _ => TtsError::Provider(format!("{status}: {body}")),
        }
    }

    /// Rough duration estimate from payload size; used when the
    /// provider does not return one.
    fn estimate_duration(bytes: usize, format: AudioFormat, sample_rate: u32) -> f64 {
        match format {
            // ~16 kB/s at 128 kbps
            AudioFormat::Mp3 => bytes as f64 / 16_000.0,
            // 16-bit mono linear PCM
            AudioFormat::Wav | AudioFormat::Pcm => bytes as f64 / (sample_rate as f64 * 2.0),
        }
    }
}

#[async_trait]
impl TtsProvider for DeepgramTts {
    async fn synthesize(
        &self,
        text: &str,
        language: Language,
        voice_id: &str,
        format: AudioFormat,
    ) -> Result<AudioResult, TtsError> {
        if text.trim().is_empty() {
            return Err(TtsError::InvalidText);
        }

        let voice = Self::resolve_voice(voice_id, language);
        let key = (text.to_string(), voice.clone(), format);
        if let Some(hit) = self.cache_get(&key) {
            tracing::debug!(voice = %voice, "TTS cache hit");
            return Ok(hit);
        }

        let url = format!(
            "{}/speak?model={}&encoding={}&sample_rate={}",
            self.base_url,
            voice,
            format.deepgram_encoding(),
            DEFAULT_SAMPLE_RATE
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TtsError::Timeout
                } else {
                    TtsError::Provider(format!("request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body));
        }

        let audio_bytes = response
            .bytes()
            .await
            .map_err(|e| TtsError::Provider(format!("failed to read audio: {e}")))?
            .to_vec();

        let result = AudioResult {
            duration_seconds: Self::estimate_duration(audio_bytes.len(), format, DEFAULT_SAMPLE_RATE),
            audio_bytes,
            format,
            sample_rate: DEFAULT_SAMPLE_RATE,
        };
        self.cache_put(key, result.clone());
        Ok(result)
    }

    async fn available_voices(&self, language: Language) -> Result<Vec<Voice>, TtsError> {
        Ok(VOICE_CATALOG
            .iter()
            .filter(|v| v.language == language)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let tts = DeepgramTts::new("key");
        let err = tts
            .synthesize("   ", Language::En, DEFAULT_VOICE_EN, AudioFormat::Mp3)
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::InvalidText));
    }

    #[test]
    fn test_unknown_voice_falls_back_to_default() {
        assert_eq!(
            DeepgramTts::resolve_voice("no-such-voice", Language::Es),
            DEFAULT_VOICE_ES
        );
        assert_eq!(
            DeepgramTts::resolve_voice(DEFAULT_VOICE_EN, Language::En),
            DEFAULT_VOICE_EN
        );
    }

    #[tokio::test]
    async fn test_voice_catalog_filtered_by_language() {
        let tts = DeepgramTts::new("key");
        let en = tts.available_voices(Language::En).await.unwrap();
        assert!(en.iter().all(|v| v.language == Language::En));
        assert!(en.iter().any(|v| v.id == DEFAULT_VOICE_EN));

        let es = tts.available_voices(Language::Es).await.unwrap();
        assert!(es.iter().any(|v| v.id == DEFAULT_VOICE_ES));
    }

    #[test]
    fn test_cache_round_trip_and_eviction() {
        let tts = DeepgramTts::with_cache_size("key", 2);
        let sample = || AudioResult {
            audio_bytes: vec![1, 2, 3],
            format: AudioFormat::Mp3,
            duration_seconds: 0.1,
            sample_rate: DEFAULT_SAMPLE_RATE,
        };
        let key = |text: &str| (text.to_string(), DEFAULT_VOICE_EN.to_string(), AudioFormat::Mp3);

        tts.cache_put(key("a"), sample());
        tts.cache_put(key("b"), sample());
        assert!(tts.cache_get(&key("a")).is_some());
        // capacity 2: inserting a third entry evicts the LRU ("b")
        tts.cache_put(key("c"), sample());
        assert!(tts.cache_get(&key("b")).is_none());
        assert!(tts.cache_get(&key("a")).is_some());
        assert!(tts.cache_get(&key("c")).is_some());
    }

    #[test]
    fn test_duration_estimate_pcm() {
        // one second of 24 kHz 16-bit mono
        let bytes = (DEFAULT_SAMPLE_RATE * 2) as usize;
        let dur = DeepgramTts::estimate_duration(bytes, AudioFormat::Pcm, DEFAULT_SAMPLE_RATE);
        assert!((dur - 1.0).abs() < 1e-9);
    }
}
