//! End-to-end orchestrator tests with scripted providers and a real
//! SQLite-backed tool dispatcher.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{spawn_sms_stub, EchoTts, RecordingEmailProvider, ScriptedLlm, ScriptedStt};
use voxline::agent::llm::{LlmResponse, ToolCall};
use voxline::agent::orchestrator::{Orchestrator, OrchestratorError, SessionConfig};
use voxline::agent::state_machine::{CallState, StateMachine};
use voxline::agent::tools::{HandlerStatus, ToolDispatcher};
use voxline::config::Config;
use voxline::notifications::NotificationService;
use voxline::storage::{CallStore, Language, TaskPriority};

fn notification_config() -> Config {
    Config {
        staff_phone: "+15550001111".to_string(),
        staff_email: "staff@example.com".to_string(),
        twilio_account_sid: "AC_test".to_string(),
        twilio_auth_token: "token".to_string(),
        twilio_phone_number: "+15552223333".to_string(),
        transcript_base_url: "https://app.insurance-office.com/transcripts".to_string(),
        ..Config::default()
    }
}

#[tokio::test]
async fn happy_callback_flow_creates_task_and_notifies() {
    let store = CallStore::open_in_memory().unwrap();
    store
        .insert_call(Some("call-urgent-001"), "+15551234567", Some(Language::En))
        .await
        .unwrap();

    let (sms_base, sms_log) = spawn_sms_stub().await;
    let email = RecordingEmailProvider::working();
    let notifications = Arc::new(
        NotificationService::new(&notification_config(), email.clone())
            .with_sms_api_base(sms_base),
    );
    let dispatcher =
        ToolDispatcher::new(store.clone()).with_notifications(notifications.clone());

    let tool_call = ToolCall {
        id: "tc_1".to_string(),
        name: "create_callback_task".to_string(),
        arguments: serde_json::json!({
            "call_id": "call-urgent-001",
            "priority": "urgent",
            "name": "John Smith",
            "callback_number": "+15551234567",
            "best_time_window": "ASAP",
            "notes": "Car accident this morning",
        }),
    };
    let llm = ScriptedLlm::new(vec![
        ScriptedLlm::reply("Hello! How can I help you today?"),
        ScriptedLlm::reply("I'm sorry to hear that. Are you an existing customer?"),
        ScriptedLlm::reply("Thank you. What's the best number to reach you?"),
        ScriptedLlm::reply("And when is the best time to call you back?"),
        LlmResponse {
            content: None,
            tool_calls: vec![tool_call],
            ..Default::default()
        },
        ScriptedLlm::reply("I've created an urgent callback. Someone will call you back shortly."),
    ]);

    let mut orchestrator = Orchestrator::new(
        Arc::new(ScriptedStt::ok("I was in a car accident this morning")),
        Arc::new(llm),
        Arc::new(EchoTts),
        Some(dispatcher),
        SessionConfig::default(),
    );
    orchestrator
        .start_session("call-urgent-001", "+15551234567", "en")
        .unwrap();

    for _ in 0..5 {
        let audio = orchestrator.process_audio(b"pcm-frame", None).await.unwrap();
        assert!(audio.is_some());
    }

    // the callback task is persisted with the tool's arguments
    let task = store
        .get_task_for_call("call-urgent-001")
        .await
        .unwrap()
        .expect("callback task created");
    assert_eq!(task.priority, TaskPriority::Urgent);
    assert_eq!(task.name.as_deref(), Some("John Smith"));
    assert_eq!(task.callback_number, "+15551234567");
    assert_eq!(task.best_time_window.as_deref(), Some("ASAP"));
    assert_eq!(task.notes.as_deref(), Some("Car accident this morning"));

    // SMS and email both fired
    let sms_bodies = sms_log.lock().unwrap().clone();
    assert_eq!(sms_bodies.len(), 1);
    assert!(sms_bodies[0].contains("New urgent callback:"));
    assert!(sms_bodies[0].contains("John Smith"));
    assert!(sms_bodies[0].contains("+15551234567"));

    let emails = email.sent_emails();
    assert_eq!(emails.len(), 1);
    assert!(emails[0].subject.contains("[URGENT]"));
    assert!(emails[0].subject.contains("John Smith"));
    assert!(emails[0]
        .html_body
        .contains("https://app.insurance-office.com/transcripts/call-urgent-001"));

    // the fifth turn recorded the tool call and its successful result
    let turns = orchestrator.turns();
    assert_eq!(turns.len(), 5);
    let tool_turn = &turns[4];
    assert_eq!(tool_turn.tool_calls.len(), 1);
    assert_eq!(tool_turn.tool_calls[0].name, "create_callback_task");
    assert_eq!(tool_turn.tool_results.len(), 1);
    assert_eq!(tool_turn.tool_results[0].status, HandlerStatus::Success);
    assert!(tool_turn.tool_results[0].data.contains_key("task_id"));
    assert!(tool_turn.latency.tool_ms >= 0.0);
    assert!(tool_turn
        .assistant_text
        .contains("urgent callback"));
}

#[tokio::test]
async fn stt_retry_recovers_before_exhaustion() {
    let stt = Arc::new(ScriptedStt::failing_first("hello there", 2));
    let config = SessionConfig {
        max_retry_attempts: 3,
        retry_delay_seconds: 0.01,
        ..SessionConfig::default()
    };
    let mut orchestrator = Orchestrator::new(
        stt.clone(),
        Arc::new(ScriptedLlm::new(vec![ScriptedLlm::reply("Hi!")])),
        Arc::new(EchoTts),
        None,
        config,
    );
    orchestrator.start_session("call-retry", "", "en").unwrap();

    let audio = orchestrator.process_audio(b"pcm", None).await.unwrap();
    assert!(audio.is_some());
    // two failures then a success, one turn appended
    assert_eq!(stt.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(orchestrator.turns().len(), 1);
    assert_eq!(orchestrator.turns()[0].user_text, "hello there");
}

#[tokio::test]
async fn stt_exhaustion_aborts_turn_without_history() {
    let stt = Arc::new(ScriptedStt::failing_first("never heard", 99));
    let config = SessionConfig {
        max_retry_attempts: 3,
        retry_delay_seconds: 0.01,
        ..SessionConfig::default()
    };
    let mut orchestrator = Orchestrator::new(
        stt.clone(),
        Arc::new(ScriptedLlm::new(vec![])),
        Arc::new(EchoTts),
        None,
        config,
    );
    orchestrator.start_session("call-fail", "", "en").unwrap();

    let err = orchestrator.process_audio(b"pcm", None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::SttFailure(_)));
    assert_eq!(stt.attempts.load(Ordering::SeqCst), 3);
    assert!(orchestrator.turns().is_empty());
}

#[tokio::test]
async fn invalid_transition_is_rejected_without_mutation() {
    let mut machine = StateMachine::new("call-sm");
    assert!(!machine.can_transition_to(CallState::End));
    let err = machine.transition_to(CallState::End).unwrap_err();
    assert_eq!(err.from, CallState::Init);
    assert_eq!(err.to, CallState::End);
    assert_eq!(machine.current(), CallState::Init);
    assert!(machine.history().is_empty());
}

#[tokio::test]
async fn state_history_is_always_a_legal_path() {
    let store = CallStore::open_in_memory().unwrap();
    let dispatcher = ToolDispatcher::new(store);
    let mut orchestrator = Orchestrator::new(
        Arc::new(ScriptedStt::ok("hello")),
        Arc::new(ScriptedLlm::new(vec![
            ScriptedLlm::reply("Welcome!"),
            ScriptedLlm::reply("How can I help?"),
            ScriptedLlm::reply("Understood."),
        ])),
        Arc::new(EchoTts),
        Some(dispatcher),
        SessionConfig::default(),
    );
    orchestrator.start_session("call-path", "", "en").unwrap();

    for _ in 0..3 {
        orchestrator.process_audio(b"pcm", None).await.unwrap();
    }

    // every recorded arc must be in the allow-list
    let machine_state = orchestrator.call_state().unwrap();
    assert!(matches!(
        machine_state,
        CallState::LanguageSelect | CallState::Greet
    ));
}

#[tokio::test]
async fn session_summary_reports_final_shape() {
    let mut orchestrator = Orchestrator::new(
        Arc::new(ScriptedStt::ok("hola")),
        Arc::new(ScriptedLlm::new(vec![ScriptedLlm::reply("Hola!")])),
        Arc::new(EchoTts),
        None,
        SessionConfig::default(),
    );
    orchestrator.start_session("call-sum", "+15559998888", "es").unwrap();
    orchestrator.process_audio(b"pcm", None).await.unwrap();

    let summary = orchestrator.end_session();
    match summary {
        voxline::agent::SessionSummary::Ended {
            call_id,
            turns_count,
            language,
            ..
        } => {
            assert_eq!(call_id, "call-sum");
            assert_eq!(turns_count, 1);
            assert_eq!(language, "es");
        }
        voxline::agent::SessionSummary::NoActiveSession => panic!("expected a summary"),
    }

    // idempotent second end
    assert!(matches!(
        orchestrator.end_session(),
        voxline::agent::SessionSummary::NoActiveSession
    ));
}

#[tokio::test]
async fn tool_failure_feeds_error_back_and_call_continues() {
    let store = CallStore::open_in_memory().unwrap();
    let dispatcher = ToolDispatcher::new(store);

    let bad_tool_call = ToolCall {
        id: "tc_bad".to_string(),
        name: "create_callback_task".to_string(),
        arguments: serde_json::json!({
            "call_id": "no-such-call",
            "callback_number": "+15551234567",
        }),
    };
    let llm = ScriptedLlm::new(vec![
        LlmResponse {
            content: None,
            tool_calls: vec![bad_tool_call],
            ..Default::default()
        },
        ScriptedLlm::reply("I couldn't create that just yet, let me take your details again."),
    ]);

    let mut orchestrator = Orchestrator::new(
        Arc::new(ScriptedStt::ok("please call me back")),
        Arc::new(llm),
        Arc::new(EchoTts),
        Some(dispatcher),
        SessionConfig::default(),
    );
    orchestrator.start_session("call-toolfail", "", "en").unwrap();

    let audio = orchestrator.process_audio(b"pcm", None).await.unwrap();
    assert!(audio.is_some());

    let turn = &orchestrator.turns()[0];
    assert_eq!(turn.tool_results.len(), 1);
    assert_eq!(turn.tool_results[0].status, HandlerStatus::Failure);
    // the failure was surfaced to the model as a tool message
    assert!(orchestrator.conversation_history().iter().any(|m| {
        m.content
            .as_deref()
            .is_some_and(|c| c.contains("Call not found: no-such-call"))
    }));
}
