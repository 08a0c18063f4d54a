//! Telephony integration: provider adapter contract, dialogue-control
//! XML vocabulary, and the inbound webhook layer.

pub mod adapter;
pub mod twiml;
pub mod webhooks;

pub use adapter::{CallInfo, TelephonyAdapter, TelephonyCallStatus, TelephonyError, TwilioAdapter};
pub use twiml::{Verb, VoiceResponse};
