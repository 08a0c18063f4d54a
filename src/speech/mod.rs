//! Speech provider abstractions: speech-to-text and text-to-speech
//! contracts with Deepgram reference implementations.

pub mod stt;
pub mod tts;

pub use stt::{SttError, SttProvider, TranscriptChunk, TranscriptResult};
pub use tts::{AudioFormat, AudioResult, TtsError, TtsProvider, Voice, VoiceGender};
