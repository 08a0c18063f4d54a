//! Call-flow state machine
//!
//! Enforces the call flow INIT -> GREET -> LANGUAGE_SELECT ->
//! CLASSIFY_CUSTOMER_TYPE -> INTENT_DISCOVERY -> INFO_COLLECTION ->
//! CONFIRMATION -> CREATE_CALLBACK_TASK -> TRANSFER_OR_WRAPUP -> END.
//! Every state declares its legal transitions, a timeout with a target
//! state, and bilingual prompts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// States of the call flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Init,
    Greet,
    LanguageSelect,
    ClassifyCustomerType,
    IntentDiscovery,
    InfoCollection,
    Confirmation,
    CreateCallbackTask,
    TransferOrWrapup,
    End,
    Error,
    Timeout,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Init => "init",
            CallState::Greet => "greet",
            CallState::LanguageSelect => "language_select",
            CallState::ClassifyCustomerType => "classify_customer_type",
            CallState::IntentDiscovery => "intent_discovery",
            CallState::InfoCollection => "info_collection",
            CallState::Confirmation => "confirmation",
            CallState::CreateCallbackTask => "create_callback_task",
            CallState::TransferOrWrapup => "transfer_or_wrapup",
            CallState::End => "end",
            CallState::Error => "error",
            CallState::Timeout => "timeout",
        }
    }

    /// Legal transition targets from this state. Everything not listed
    /// is invalid (timeout arcs are handled separately and may bypass
    /// this list).
    pub fn valid_transitions(&self) -> &'static [CallState] {
        use CallState::*;
        match self {
            Init => &[Greet, Error],
            Greet => &[LanguageSelect, Error],
            LanguageSelect => &[ClassifyCustomerType, Greet, Error],
            ClassifyCustomerType => &[IntentDiscovery, LanguageSelect, Error],
            IntentDiscovery => &[
                InfoCollection,
                Confirmation,
                TransferOrWrapup,
                ClassifyCustomerType,
                Error,
            ],
            InfoCollection => &[Confirmation, IntentDiscovery, Error],
            Confirmation => &[CreateCallbackTask, TransferOrWrapup, InfoCollection, Error],
            CreateCallbackTask => &[TransferOrWrapup, End, Error],
            TransferOrWrapup => &[End, Error],
            End => &[],
            Error => &[TransferOrWrapup, End],
            Timeout => &[End, Error],
        }
    }

    /// Per-state timeout in seconds
    pub fn timeout_seconds(&self) -> f64 {
        use CallState::*;
        match self {
            Init => 5.0,
            Greet => 10.0,
            LanguageSelect => 15.0,
            ClassifyCustomerType => 20.0,
            IntentDiscovery | InfoCollection => 60.0,
            Confirmation => 30.0,
            CreateCallbackTask => 10.0,
            TransferOrWrapup => 30.0,
            End => 0.0,
            Error | Timeout => 10.0,
        }
    }

    /// Target state when the per-state timeout fires. Timeout
    /// transitions are privileged and may bypass the allow-list.
    pub fn timeout_target(&self) -> CallState {
        use CallState::*;
        match self {
            Init => Greet,
            Greet => LanguageSelect,
            // Defaults the caller to English on no input
            LanguageSelect => ClassifyCustomerType,
            ClassifyCustomerType => IntentDiscovery,
            IntentDiscovery | InfoCollection => Timeout,
            Confirmation => CreateCallbackTask,
            CreateCallbackTask => End,
            TransferOrWrapup => End,
            End => End,
            Error | Timeout => End,
        }
    }

    /// Bilingual prompt for this state. Both languages are defined for
    /// every state; silent states use empty strings.
    pub fn prompt(&self, language: &str) -> &'static str {
        use CallState::*;
        let (en, es): (&'static str, &'static str) = match self {
            Init => ("", ""),
            Greet => (
                "Hello! Thank you for calling. I'm an AI assistant and I'll help connect you with the right person.",
                "Hola! Gracias por llamar. Soy un asistente de inteligencia artificial y le ayudare a conectarse con la persona adecuada.",
            ),
            LanguageSelect => (
                "Would you like to continue in English or Spanish? Para espanol, diga 'espanol'.",
                "Desea continuar en espanol o ingles? For English, say 'English'.",
            ),
            ClassifyCustomerType => (
                "Are you an existing customer, or is this your first time calling us?",
                "Es usted un cliente existente, o es la primera vez que nos llama?",
            ),
            IntentDiscovery => (
                "How can I help you today? Please tell me what you're calling about.",
                "Como puedo ayudarle hoy? Por favor digame el motivo de su llamada.",
            ),
            InfoCollection => (
                "I'd like to collect some information so we can assist you better.",
                "Me gustaria recopilar alguna informacion para poder asistirle mejor.",
            ),
            Confirmation => (
                "Let me confirm the information I have. Is this correct?",
                "Permitame confirmar la informacion que tengo. Es correcto?",
            ),
            CreateCallbackTask => (
                "I'm creating a callback request. Someone will call you back shortly.",
                "Estoy creando una solicitud de devolucion de llamada. Alguien le llamara pronto.",
            ),
            TransferOrWrapup => (
                "I'm transferring you now. Please hold.",
                "Le estoy transfiriendo ahora. Por favor espere.",
            ),
            End => (
                "Thank you for calling. Have a great day!",
                "Gracias por llamar. Que tenga un buen dia!",
            ),
            Error => (
                "I apologize, but I encountered an issue. Let me connect you with someone who can help.",
                "Disculpe, pero encontre un problema. Permitame conectarle con alguien que pueda ayudarle.",
            ),
            Timeout => (
                "I haven't heard from you. If you need more time, please let me know.",
                "No le he escuchado. Si necesita mas tiempo, por favor hagamelo saber.",
            ),
        };
        if language == "es" {
            es
        } else {
            en
        }
    }
}

/// Illegal state-machine move
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid transition from {} to {}", .from.as_str(), .to.as_str())]
pub struct InvalidTransition {
    pub from: CallState,
    pub to: CallState,
}

/// Per-call state machine. Created at call start, discarded at end.
#[derive(Debug, Clone)]
pub struct StateMachine {
    call_id: String,
    current: CallState,
    language: String,
    history: Vec<(CallState, CallState)>,
    context: HashMap<String, Value>,
}

impl StateMachine {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self::with_initial_state(call_id, CallState::Init)
    }

    pub fn with_initial_state(call_id: impl Into<String>, initial: CallState) -> Self {
        Self {
            call_id: call_id.into(),
            current: initial,
            language: "en".to_string(),
            history: Vec::new(),
            context: HashMap::new(),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn current(&self) -> CallState {
        self.current
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Set the session language; only "en" and "es" are accepted
    pub fn set_language(&mut self, language: &str) -> bool {
        if language == "en" || language == "es" {
            self.language = language.to_string();
            true
        } else {
            false
        }
    }

    pub fn history(&self) -> &[(CallState, CallState)] {
        &self.history
    }

    pub fn context(&self) -> &HashMap<String, Value> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.context
    }

    pub fn can_transition_to(&self, target: CallState) -> bool {
        self.current.valid_transitions().contains(&target)
    }

    pub fn valid_transitions(&self) -> &'static [CallState] {
        self.current.valid_transitions()
    }

    /// Move to a new state, recording the arc. Illegal targets fail
    /// without mutating the current state.
    pub fn transition_to(&mut self, target: CallState) -> Result<(), InvalidTransition> {
        if !self.can_transition_to(target) {
            return Err(InvalidTransition {
                from: self.current,
                to: target,
            });
        }
        self.history.push((self.current, target));
        self.current = target;
        Ok(())
    }

    /// Handle a timeout in the current state. Timeout arcs are
    /// privileged: the transition is forced even when the allow-list
    /// does not contain the target.
    pub fn handle_timeout(&mut self) -> CallState {
        let target = self.current.timeout_target();
        self.history.push((self.current, target));
        self.current = target;
        target
    }

    /// Prompt for the current state in the session language
    pub fn current_prompt(&self) -> &'static str {
        self.current.prompt(&self.language)
    }

    pub fn current_timeout(&self) -> f64 {
        self.current.timeout_seconds()
    }

    /// A state with no legal transitions is terminal
    pub fn is_terminal(&self) -> bool {
        self.current.valid_transitions().is_empty()
    }

    pub fn reset(&mut self) {
        self.current = CallState::Init;
        self.language = "en".to_string();
        self.history.clear();
        self.context.clear();
    }

    /// Snapshot for persistence or diagnostics
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "call_id": self.call_id,
            "current_state": self.current,
            "language": self.language,
            "history": self.history,
            "context": self.context,
        })
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let call_id = value.get("call_id")?.as_str()?.to_string();
        let current: CallState = serde_json::from_value(value.get("current_state")?.clone()).ok()?;
        let language = value
            .get("language")
            .and_then(|v| v.as_str())
            .unwrap_or("en")
            .to_string();
        let history: Vec<(CallState, CallState)> = value
            .get("history")
            .and_then(|h| serde_json::from_value(h.clone()).ok())
            .unwrap_or_default();
        let context: HashMap<String, Value> = value
            .get("context")
            .and_then(|c| serde_json::from_value(c.clone()).ok())
            .unwrap_or_default();
        Some(Self {
            call_id,
            current,
            language,
            history,
            context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = StateMachine::new("call-1");
        assert_eq!(sm.current(), CallState::Init);
        assert_eq!(sm.language(), "en");
        assert!(sm.history().is_empty());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut sm = StateMachine::new("call-1");
        assert!(!sm.can_transition_to(CallState::End));
        let err = sm.transition_to(CallState::End).unwrap_err();
        assert_eq!(err.from, CallState::Init);
        assert_eq!(err.to, CallState::End);
        // current unchanged, history empty
        assert_eq!(sm.current(), CallState::Init);
        assert!(sm.history().is_empty());
    }

    #[test]
    fn test_full_happy_path() {
        let mut sm = StateMachine::new("call-1");
        let path = [
            CallState::Greet,
            CallState::LanguageSelect,
            CallState::ClassifyCustomerType,
            CallState::IntentDiscovery,
            CallState::InfoCollection,
            CallState::Confirmation,
            CallState::CreateCallbackTask,
            CallState::TransferOrWrapup,
            CallState::End,
        ];
        for state in path {
            sm.transition_to(state).unwrap();
        }
        assert!(sm.is_terminal());
        assert_eq!(sm.history().len(), path.len());
        // every recorded arc was legal at the time
        for (from, to) in sm.history() {
            assert!(
                from.valid_transitions().contains(to),
                "illegal arc {} -> {} recorded",
                from.as_str(),
                to.as_str()
            );
        }
    }

    #[test]
    fn test_timeout_is_privileged() {
        let mut sm = StateMachine::with_initial_state("call-1", CallState::IntentDiscovery);
        // TIMEOUT is not in the allow-list but the timeout path forces it
        assert!(!sm.can_transition_to(CallState::Timeout));
        let target = sm.handle_timeout();
        assert_eq!(target, CallState::Timeout);
        assert_eq!(sm.current(), CallState::Timeout);
        assert_eq!(sm.history().last(), Some(&(CallState::IntentDiscovery, CallState::Timeout)));
    }

    #[test]
    fn test_timeout_targets() {
        assert_eq!(CallState::Init.timeout_target(), CallState::Greet);
        assert_eq!(CallState::LanguageSelect.timeout_target(), CallState::ClassifyCustomerType);
        assert_eq!(CallState::Confirmation.timeout_target(), CallState::CreateCallbackTask);
        assert_eq!(CallState::Error.timeout_target(), CallState::End);
    }

    #[test]
    fn test_language_gate() {
        let mut sm = StateMachine::new("call-1");
        assert!(sm.set_language("es"));
        assert_eq!(sm.language(), "es");
        assert!(!sm.set_language("fr"));
        assert_eq!(sm.language(), "es");
    }

    #[test]
    fn test_bilingual_prompts_present() {
        let states = [
            CallState::Greet,
            CallState::LanguageSelect,
            CallState::ClassifyCustomerType,
            CallState::IntentDiscovery,
            CallState::InfoCollection,
            CallState::Confirmation,
            CallState::CreateCallbackTask,
            CallState::TransferOrWrapup,
            CallState::End,
            CallState::Error,
            CallState::Timeout,
        ];
        for state in states {
            assert!(!state.prompt("en").is_empty(), "{} missing en prompt", state.as_str());
            assert!(!state.prompt("es").is_empty(), "{} missing es prompt", state.as_str());
        }
        // INIT is the one silent state
        assert!(CallState::Init.prompt("en").is_empty());
    }

    #[test]
    fn test_prompt_selected_by_language() {
        let mut sm = StateMachine::with_initial_state("call-1", CallState::End);
        assert!(sm.current_prompt().contains("Have a great day"));
        sm.set_language("es");
        assert!(sm.current_prompt().contains("Que tenga un buen dia"));
    }

    #[test]
    fn test_json_round_trip() {
        let mut sm = StateMachine::new("call-7");
        sm.set_language("es");
        sm.transition_to(CallState::Greet).unwrap();
        sm.context_mut()
            .insert("from_number".to_string(), serde_json::json!("+15551234567"));

        let restored = StateMachine::from_json(&sm.to_json()).unwrap();
        assert_eq!(restored.call_id(), "call-7");
        assert_eq!(restored.current(), CallState::Greet);
        assert_eq!(restored.language(), "es");
        assert_eq!(restored.history(), sm.history());
        assert_eq!(
            restored.context().get("from_number"),
            Some(&serde_json::json!("+15551234567"))
        );
    }

    #[test]
    fn test_error_state_recovery_paths() {
        let mut sm = StateMachine::with_initial_state("call-1", CallState::Error);
        assert!(sm.can_transition_to(CallState::TransferOrWrapup));
        assert!(sm.can_transition_to(CallState::End));
        assert!(!sm.can_transition_to(CallState::Greet));
    }
}
