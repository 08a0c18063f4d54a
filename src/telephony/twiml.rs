//! Dialogue-control XML vocabulary
//!
//! The telephony provider is driven by a small fixed set of verbs
//! (Say, Play, Gather, Dial, Record, Redirect, Hangup). The vocabulary
//! is modeled as an enum and rendered with a hand-written writer; a
//! templating engine would be overkill for seven verbs.

/// Voice languages accepted by the provider's `Say` verb
pub const LANG_EN_US: &str = "en-US";
pub const LANG_ES_MX: &str = "es-MX";

/// Attributes for the `Gather` verb
#[derive(Debug, Clone, Default)]
pub struct GatherAttrs {
    pub num_digits: Option<u32>,
    pub action: Option<String>,
    pub input: Option<String>,
    pub timeout: Option<u32>,
    pub speech_timeout: Option<String>,
    pub hints: Option<String>,
    pub language: Option<String>,
}

/// Attributes for the `Dial` verb
#[derive(Debug, Clone, Default)]
pub struct DialAttrs {
    pub timeout: Option<u32>,
    pub caller_id: Option<String>,
    pub record: Option<bool>,
    pub action: Option<String>,
    pub ring_tone: Option<String>,
}

/// The dialed `Number` noun nested inside `Dial`
#[derive(Debug, Clone, Default)]
pub struct DialNumber {
    pub number: String,
    pub status_callback: Option<String>,
    pub status_callback_events: Option<String>,
}

/// One dialogue-control verb
#[derive(Debug, Clone)]
pub enum Verb {
    /// One-shot TTS
    Say { text: String, language: String },
    /// Play a hosted audio file
    Play { url: String, loop_count: Option<u32> },
    /// Collect DTMF/speech input; nested Says are the prompt
    Gather { attrs: GatherAttrs, says: Vec<Verb> },
    /// Transfer/bridge to another number
    Dial { attrs: DialAttrs, number: DialNumber },
    /// Record the caller
    Record {
        action: Option<String>,
        max_length: Option<u32>,
        play_beep: Option<bool>,
        transcribe: Option<bool>,
    },
    /// Continue the flow at another URL
    Redirect { url: String },
    /// Terminate the call
    Hangup,
}

impl Verb {
    pub fn say_en(text: impl Into<String>) -> Self {
        Verb::Say {
            text: text.into(),
            language: LANG_EN_US.to_string(),
        }
    }

    pub fn say_es(text: impl Into<String>) -> Self {
        Verb::Say {
            text: text.into(),
            language: LANG_ES_MX.to_string(),
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Verb::Say { text, language } => {
                out.push_str(&format!(
                    "<Say language=\"{}\">{}</Say>",
                    escape_xml(language),
                    escape_xml(text)
                ));
            }
            Verb::Play { url, loop_count } => {
                out.push_str("<Play");
                if let Some(n) = loop_count {
                    out.push_str(&format!(" loop=\"{n}\""));
                }
                out.push_str(&format!(">{}</Play>", escape_xml(url)));
            }
            Verb::Gather { attrs, says } => {
                out.push_str("<Gather");
                push_attr(out, "input", attrs.input.as_deref());
                if let Some(n) = attrs.num_digits {
                    out.push_str(&format!(" numDigits=\"{n}\""));
                }
                push_attr(out, "action", attrs.action.as_deref());
                if let Some(t) = attrs.timeout {
                    out.push_str(&format!(" timeout=\"{t}\""));
                }
                push_attr(out, "speechTimeout", attrs.speech_timeout.as_deref());
                push_attr(out, "hints", attrs.hints.as_deref());
                push_attr(out, "language", attrs.language.as_deref());
                out.push('>');
                for say in says {
                    say.render(out);
                }
                out.push_str("</Gather>");
            }
            Verb::Dial { attrs, number } => {
                out.push_str("<Dial");
                if let Some(t) = attrs.timeout {
                    out.push_str(&format!(" timeout=\"{t}\""));
                }
                push_attr(out, "callerId", attrs.caller_id.as_deref());
                if let Some(record) = attrs.record {
                    out.push_str(&format!(" record=\"{record}\""));
                }
                push_attr(out, "action", attrs.action.as_deref());
                push_attr(out, "ringTone", attrs.ring_tone.as_deref());
                out.push_str("><Number");
                push_attr(out, "statusCallback", number.status_callback.as_deref());
                push_attr(
                    out,
                    "statusCallbackEvent",
                    number.status_callback_events.as_deref(),
                );
                out.push_str(&format!(">{}</Number></Dial>", escape_xml(&number.number)));
            }
            Verb::Record {
                action,
                max_length,
                play_beep,
                transcribe,
            } => {
                out.push_str("<Record");
                push_attr(out, "action", action.as_deref());
                if let Some(n) = max_length {
                    out.push_str(&format!(" maxLength=\"{n}\""));
                }
                if let Some(b) = play_beep {
                    out.push_str(&format!(" playBeep=\"{b}\""));
                }
                if let Some(b) = transcribe {
                    out.push_str(&format!(" transcribe=\"{b}\""));
                }
                out.push_str("/>");
            }
            Verb::Redirect { url } => {
                out.push_str(&format!("<Redirect>{}</Redirect>", escape_xml(url)));
            }
            Verb::Hangup => out.push_str("<Hangup/>"),
        }
    }
}

/// A full dialogue-control response document
#[derive(Debug, Clone, Default)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, verb: Verb) -> Self {
        self.verbs.push(verb);
        self
    }

    pub fn say_en(self, text: impl Into<String>) -> Self {
        self.push(Verb::say_en(text))
    }

    pub fn say_es(self, text: impl Into<String>) -> Self {
        self.push(Verb::say_es(text))
    }

    pub fn hangup(self) -> Self {
        self.push(Verb::Hangup)
    }

    /// Render the complete XML document
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>");
        for verb in &self.verbs {
            verb.render(&mut out);
        }
        out.push_str("</Response>");
        out
    }
}

fn push_attr(out: &mut String, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        out.push_str(&format!(" {}=\"{}\"", name, escape_xml(value)));
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// The bilingual greeting returned by the inbound-voice webhook: both
/// language prompts inside a one-digit Gather posting to the
/// language-select endpoint.
pub fn bilingual_greeting(english: &str, spanish: &str, gather_action_url: &str) -> VoiceResponse {
    VoiceResponse::new().push(Verb::Gather {
        attrs: GatherAttrs {
            num_digits: Some(1),
            action: Some(gather_action_url.to_string()),
            input: Some("dtmf".to_string()),
            timeout: Some(5),
            ..Default::default()
        },
        says: vec![Verb::say_en(english), Verb::say_es(spanish)],
    })
}
