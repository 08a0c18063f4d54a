//! Integration tests for the notification fanout: priority routing,
//! SMS rate limiting, and channel failure independence.

mod common;

use chrono::Utc;
use std::sync::Arc;

use common::{spawn_sms_stub, RecordingEmailProvider};
use voxline::config::Config;
use voxline::notifications::NotificationService;
use voxline::storage::{Call, CallStatus, CallbackTask, Language, TaskPriority, TaskStatus};

fn task(call_id: &str, priority: TaskPriority, name: Option<&str>) -> CallbackTask {
    CallbackTask {
        id: format!("task-{call_id}"),
        call_id: call_id.to_string(),
        priority,
        name: name.map(String::from),
        callback_number: "+15551234567".to_string(),
        best_time_window: Some("ASAP".to_string()),
        notes: Some("Car accident this morning".to_string()),
        assignee: None,
        status: TaskStatus::Pending,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn call(id: &str, language: Language) -> Call {
    Call {
        id: id.to_string(),
        from_number: "+15551234567".to_string(),
        language: Some(language),
        customer_type: None,
        intent: None,
        status: CallStatus::End,
        summary: None,
        transcript: None,
        costs: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn config_with(sms_rate_limit: usize) -> Config {
    Config {
        staff_phone: "+15550001111".to_string(),
        staff_email: "staff@example.com".to_string(),
        twilio_account_sid: "AC_test".to_string(),
        twilio_auth_token: "token".to_string(),
        twilio_phone_number: "+15552223333".to_string(),
        sms_rate_limit,
        transcript_base_url: "https://app.insurance-office.com/transcripts".to_string(),
        ..Config::default()
    }
}

#[tokio::test]
async fn urgent_callback_sends_sms_and_email() {
    let (sms_base, sms_log) = spawn_sms_stub().await;
    let email = RecordingEmailProvider::working();
    let service =
        NotificationService::new(&config_with(10), email.clone()).with_sms_api_base(sms_base);

    let task = task("call-urgent-001", TaskPriority::Urgent, Some("John Smith"));
    let call = call("call-urgent-001", Language::En);
    let results = service.notify_callback_created(&task, Some(&call)).await;

    assert!(results.sms.success, "sms failed: {:?}", results.sms.error);
    assert!(results.email.success, "email failed: {:?}", results.email.error);

    let sms_bodies = sms_log.lock().unwrap().clone();
    assert_eq!(sms_bodies.len(), 1);
    assert!(sms_bodies[0].contains("New urgent callback:"));
    assert!(sms_bodies[0].contains("John Smith"));
    assert!(sms_bodies[0].contains("+15551234567"));
    // no intent on the call record falls back to the generic line
    assert!(sms_bodies[0].contains("Callback requested"));

    let emails = email.sent_emails();
    assert_eq!(emails.len(), 1);
    assert!(emails[0].subject.contains("[URGENT]"));
    assert!(emails[0].subject.contains("John Smith"));
    assert!(emails[0]
        .html_body
        .contains("https://app.insurance-office.com/transcripts/call-urgent-001"));
}

#[tokio::test]
async fn high_priority_also_sends_sms() {
    let (sms_base, sms_log) = spawn_sms_stub().await;
    let email = RecordingEmailProvider::working();
    let service =
        NotificationService::new(&config_with(10), email.clone()).with_sms_api_base(sms_base);

    let results = service
        .notify_callback_created(&task("call-high", TaskPriority::High, None), None)
        .await;

    assert!(results.sms.success);
    assert!(results.email.success);
    assert_eq!(sms_log.lock().unwrap().len(), 1);
    assert!(email.sent_emails()[0].subject.contains("[HIGH]"));
}

#[tokio::test]
async fn spanish_normal_priority_skips_sms_and_labels_language() {
    let (sms_base, sms_log) = spawn_sms_stub().await;
    let email = RecordingEmailProvider::working();
    let service =
        NotificationService::new(&config_with(10), email.clone()).with_sms_api_base(sms_base);

    let task = task("call-es-001", TaskPriority::Normal, Some("Maria Lopez"));
    let call = call("call-es-001", Language::Es);
    let results = service.notify_callback_created(&task, Some(&call)).await;

    // the SMS slot is a synthetic skip, not a provider call
    assert!(results.sms.success);
    assert_eq!(results.sms.provider, "none");
    assert!(sms_log.lock().unwrap().is_empty());

    assert!(results.email.success);
    let emails = email.sent_emails();
    assert!(emails[0].html_body.contains("Spanish"));
    assert!(emails[0].subject.contains("[NORMAL]"));
}

#[tokio::test]
async fn sms_rate_limit_of_three_allows_exactly_three() {
    let (sms_base, sms_log) = spawn_sms_stub().await;
    let email = RecordingEmailProvider::working();
    let service =
        NotificationService::new(&config_with(3), email.clone()).with_sms_api_base(sms_base);

    let mut sms_ok = 0;
    let mut sms_failed = 0;
    for i in 0..5 {
        let call_id = format!("call-{i}");
        let results = service
            .notify_callback_created(&task(&call_id, TaskPriority::Urgent, None), None)
            .await;
        if results.sms.success {
            sms_ok += 1;
        } else {
            sms_failed += 1;
            assert!(
                results.sms.error.as_deref().unwrap_or("").contains("Rate limit"),
                "unexpected error: {:?}",
                results.sms.error
            );
        }
        assert!(results.email.success, "email should be unaffected by SMS limit");
    }

    assert_eq!(sms_ok, 3);
    assert_eq!(sms_failed, 2);
    // the provider was only reached for the three allowed sends
    assert_eq!(sms_log.lock().unwrap().len(), 3);
    assert_eq!(email.sent_emails().len(), 5);
}

#[tokio::test]
async fn email_failure_leaves_sms_successful() {
    let (sms_base, _sms_log) = spawn_sms_stub().await;
    let email = RecordingEmailProvider::failing();
    let service =
        NotificationService::new(&config_with(10), email).with_sms_api_base(sms_base);

    let results = service
        .notify_callback_created(&task("call-x", TaskPriority::Urgent, None), None)
        .await;

    assert!(results.sms.success);
    assert!(!results.email.success);
    assert!(results.email.error.unwrap().contains("injected email failure"));
}

#[tokio::test]
async fn sms_failure_leaves_email_successful() {
    // unreachable SMS endpoint: connection refused
    let email = RecordingEmailProvider::working();
    let service = NotificationService::new(&config_with(10), email.clone())
        .with_sms_api_base("http://127.0.0.1:1");

    let results = service
        .notify_callback_created(&task("call-y", TaskPriority::Urgent, None), None)
        .await;

    assert!(!results.sms.success);
    assert!(results.email.success);
    assert_eq!(email.sent_emails().len(), 1);
}

#[tokio::test]
async fn missing_staff_email_reports_not_configured() {
    let (sms_base, _log) = spawn_sms_stub().await;
    let mut config = config_with(10);
    config.staff_email.clear();
    let email = RecordingEmailProvider::working();
    let service = NotificationService::new(&config, email).with_sms_api_base(sms_base);

    let results = service
        .notify_callback_created(&task("call-z", TaskPriority::Low, None), None)
        .await;

    assert!(!results.email.success);
    assert_eq!(results.email.provider, "none");
    assert!(results.email.error.unwrap().contains("not configured"));
}

#[tokio::test]
async fn bypass_rate_limit_skips_the_window_check() {
    let (sms_base, sms_log) = spawn_sms_stub().await;
    let email = RecordingEmailProvider::working();
    let service = NotificationService::new(&config_with(0), email).with_sms_api_base(sms_base);

    let blocked = service.send_sms("+15550001111", "hello", false).await;
    assert!(!blocked.success);

    let bypassed = service.send_sms("+15550001111", "hello", true).await;
    assert!(bypassed.success, "bypass send failed: {:?}", bypassed.error);
    assert_eq!(sms_log.lock().unwrap().len(), 1);
}
