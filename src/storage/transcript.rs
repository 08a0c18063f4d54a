//! Structured transcript documents stored on call records
//!
//! A transcript is a versioned JSON document of speaker turns with
//! recomputed aggregate metadata. Documents are size-capped: once the
//! serialized form exceeds the cap, the oldest turns are evicted first.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into every document
pub const TRANSCRIPT_VERSION: &str = "1.0";

/// Maximum serialized transcript size in bytes (~100 KB)
pub const MAX_TRANSCRIPT_SIZE: usize = 100_000;

/// A single utterance by one speaker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptTurn {
    /// "agent", "caller", or "system"
    pub speaker: String,
    pub text: String,
    /// ISO-8601 UTC timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TranscriptTurn {
    pub fn new(
        speaker: impl Into<String>,
        text: impl Into<String>,
        confidence: Option<f64>,
        duration_ms: Option<u64>,
    ) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            timestamp: now_iso(),
            confidence,
            duration_ms,
        }
    }
}

/// Aggregate metadata recomputed on every append
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TranscriptMetadata {
    pub total_turns: usize,
    pub total_duration_ms: u64,
    pub avg_confidence: f64,
}

/// The full transcript document persisted on `calls.transcript`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptDocument {
    pub version: String,
    pub language: Option<String>,
    pub started_at: String,
    pub turns: Vec<TranscriptTurn>,
    pub metadata: TranscriptMetadata,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl TranscriptDocument {
    pub fn new(language: Option<String>) -> Self {
        let mut doc = Self {
            version: TRANSCRIPT_VERSION.to_string(),
            language,
            started_at: now_iso(),
            turns: Vec::new(),
            metadata: TranscriptMetadata::default(),
        };
        doc.recompute_metadata();
        doc
    }

    /// Append a turn, recompute metadata, and evict the oldest turns if
    /// the serialized document would exceed the size cap.
    pub fn add_turn(
        &mut self,
        speaker: impl Into<String>,
        text: impl Into<String>,
        confidence: Option<f64>,
        duration_ms: Option<u64>,
    ) {
        self.turns
            .push(TranscriptTurn::new(speaker, text, confidence, duration_ms));
        self.recompute_metadata();
        self.enforce_size_cap();
    }

    fn recompute_metadata(&mut self) {
        let total_duration_ms = self.turns.iter().filter_map(|t| t.duration_ms).sum();
        let confidences: Vec<f64> = self.turns.iter().filter_map(|t| t.confidence).collect();
        let avg_confidence = if confidences.is_empty() {
            0.0
        } else {
            let avg = confidences.iter().sum::<f64>() / confidences.len() as f64;
            // Round to 4 decimal places so the stored value is stable
            (avg * 10_000.0).round() / 10_000.0
        };

        self.metadata = TranscriptMetadata {
            total_turns: self.turns.len(),
            total_duration_ms,
            avg_confidence,
        };
    }

    fn enforce_size_cap(&mut self) {
        let mut size = self.to_json().len();
        if size <= MAX_TRANSCRIPT_SIZE {
            return;
        }
        tracing::warn!(size, max = MAX_TRANSCRIPT_SIZE, "transcript exceeds size cap, evicting oldest turns");
        while size > MAX_TRANSCRIPT_SIZE && self.turns.len() > 1 {
            self.turns.remove(0);
            self.recompute_metadata();
            size = self.to_json().len();
        }
    }

    pub fn to_json(&self) -> String {
        // Serialization of this document cannot fail: all fields are
        // plain strings and numbers
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Plain-text rendering with capitalized speaker labels
    pub fn full_text(&self) -> String {
        self.turns
            .iter()
            .map(|t| {
                let mut speaker = t.speaker.clone();
                if let Some(first) = speaker.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                format!("{}: {}", speaker, t.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
