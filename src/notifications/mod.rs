//! Staff notifications for callback tasks
//!
//! On callback creation the service fans out to SMS and email under
//! priority rules: URGENT/HIGH tasks get both channels, NORMAL/LOW get
//! email only. SMS sends are bounded by a sliding one-hour rate limit.
//! The two channels fail independently; each result is reported
//! separately.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::{Config, EmailProviderKind};
use crate::storage::{Call, CallbackTask, TaskPriority};

/// Outcome of one notification attempt
#[derive(Debug, Clone)]
pub struct NotificationResult {
    pub success: bool,
    pub provider: String,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl NotificationResult {
    pub fn success(provider: &str, message_id: Option<String>) -> Self {
        Self {
            success: true,
            provider: provider.to_string(),
            message_id,
            error: None,
        }
    }

    pub fn failure(provider: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider: provider.to_string(),
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// The `{sms, email}` result pair for one callback
#[derive(Debug, Clone)]
pub struct CallbackNotifications {
    pub sms: NotificationResult,
    pub email: NotificationResult,
}

/// Sliding-window SMS rate limiter.
///
/// Holds the timestamps of recent sends; entries older than one hour
/// are pruned on every check. Shared process-wide, so access goes
/// through a mutex.
pub struct SmsRateLimiter {
    max_per_hour: usize,
    timestamps: Mutex<VecDeque<DateTime<Utc>>>,
}

impl SmsRateLimiter {
    pub fn new(max_per_hour: usize) -> Self {
        Self {
            max_per_hour,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    fn prune(queue: &mut VecDeque<DateTime<Utc>>) {
        let cutoff = Utc::now() - Duration::hours(1);
        while queue.front().is_some_and(|t| *t < cutoff) {
            queue.pop_front();
        }
    }

    pub fn can_send(&self) -> bool {
        let mut queue = self.timestamps.lock().expect("rate limiter poisoned");
        Self::prune(&mut queue);
        queue.len() < self.max_per_hour
    }

    pub fn record_send(&self) {
        let mut queue = self.timestamps.lock().expect("rate limiter poisoned");
        queue.push_back(Utc::now());
    }

    /// Sends remaining in the current window
    pub fn remaining(&self) -> usize {
        let mut queue = self.timestamps.lock().expect("rate limiter poisoned");
        Self::prune(&mut queue);
        self.max_per_hour.saturating_sub(queue.len())
    }
}

/// Pluggable email backend
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
    ) -> NotificationResult;
}

// ---- SendGrid (HTTPS JSON POST) ----

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

pub struct SendGridProvider {
    client: reqwest::Client,
    send_url: String,
    api_key: String,
    from_email: String,
}

impl SendGridProvider {
    pub fn new(api_key: impl Into<String>, from_email: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            send_url: SENDGRID_SEND_URL.to_string(),
            api_key: api_key.into(),
            from_email: from_email.into(),
        }
    }

    pub fn with_send_url(mut self, url: impl Into<String>) -> Self {
        self.send_url = url.into();
        self
    }
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
    ) -> NotificationResult {
        if self.api_key.is_empty() {
            tracing::warn!("SendGrid API key not configured, skipping email");
            return NotificationResult::failure("sendgrid", "API key not configured");
        }

        let body = serde_json::json!({
            "personalizations": [{"to": [{"email": to_email}]}],
            "from": {"email": self.from_email},
            "subject": subject,
            "content": [
                {"type": "text/plain", "value": text_body.unwrap_or(html_body)},
                {"type": "text/html", "value": html_body},
            ],
        });

        let response = self
            .client
            .post(&self.send_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let message_id = resp
                    .headers()
                    .get("X-Message-Id")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                tracing::info!(to_email, subject, "email sent via SendGrid");
                NotificationResult::success("sendgrid", message_id)
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(%status, body, "SendGrid API error");
                NotificationResult::failure("sendgrid", format!("SendGrid API error: {status}"))
            }
            Err(e) => {
                tracing::error!(error = %e, "SendGrid request failed");
                NotificationResult::failure("sendgrid", format!("SendGrid error: {e}"))
            }
        }
    }
}

// ---- AWS SES (SigV4-signed REST) ----

pub struct SesProvider {
    client: reqwest::Client,
    endpoint: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
    from_email: String,
}

#[derive(Debug, Deserialize)]
struct SesSendResponse {
    #[serde(rename = "MessageId", default)]
    message_id: String,
}

impl SesProvider {
    pub fn new(
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        from_email: impl Into<String>,
    ) -> Self {
        let region = region.into();
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("https://email.{region}.amazonaws.com"),
            region,
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            from_email: from_email.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// AWS SigV4 authorization header for a JSON POST
    fn sign_request(
        &self,
        host: &str,
        path: &str,
        payload: &str,
        amz_date: &str,
    ) -> String {
        let date = &amz_date[..8];
        let payload_hash = hex::encode(Sha256::digest(payload.as_bytes()));

        let canonical_headers =
            format!("content-type:application/json\nhost:{host}\nx-amz-date:{amz_date}\n");
        let signed_headers = "content-type;host;x-amz-date";
        let canonical_request = format!(
            "POST\n{path}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let scope = format!("{date}/{}/ses/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = Self::hmac_sha256(
            format!("AWS4{}", self.secret_access_key).as_bytes(),
            date,
        );
        let k_region = Self::hmac_sha256(&k_date, &self.region);
        let k_service = Self::hmac_sha256(&k_region, "ses");
        let k_signing = Self::hmac_sha256(&k_service, "aws4_request");
        let signature = hex::encode(Self::hmac_sha256(&k_signing, &string_to_sign));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key_id
        )
    }
}

#[async_trait]
impl EmailProvider for SesProvider {
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
    ) -> NotificationResult {
        if self.access_key_id.is_empty() || self.secret_access_key.is_empty() {
            tracing::warn!("AWS credentials not configured, skipping email");
            return NotificationResult::failure("ses", "AWS credentials not configured");
        }

        let path = "/v2/email/outbound-emails";
        let payload = serde_json::json!({
            "FromEmailAddress": self.from_email,
            "Destination": {"ToAddresses": [to_email]},
            "Content": {
                "Simple": {
                    "Subject": {"Data": subject, "Charset": "UTF-8"},
                    "Body": {
                        "Text": {"Data": text_body.unwrap_or(html_body), "Charset": "UTF-8"},
                        "Html": {"Data": html_body, "Charset": "UTF-8"},
                    },
                },
            },
        })
        .to_string();

        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let host = self
            .endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        let authorization = self.sign_request(&host, path, &payload, &amz_date);

        let response = self
            .client
            .post(format!("{}{path}", self.endpoint))
            .header("Content-Type", "application/json")
            .header("X-Amz-Date", amz_date)
            .header("Authorization", authorization)
            .body(payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let message_id = resp
                    .json::<SesSendResponse>()
                    .await
                    .map(|r| r.message_id)
                    .unwrap_or_default();
                tracing::info!(to_email, subject, "email sent via SES");
                NotificationResult::success(
                    "ses",
                    (!message_id.is_empty()).then_some(message_id),
                )
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(%status, body, "SES API error");
                NotificationResult::failure("ses", format!("SES error: {status}"))
            }
            Err(e) => {
                tracing::error!(error = %e, "SES request failed");
                NotificationResult::failure("ses", format!("SES error: {e}"))
            }
        }
    }
}

// ---- Notification service ----

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Priority at or above which SMS is sent in addition to email
const SMS_PRIORITY_FLOOR: TaskPriority = TaskPriority::High;

/// Service that fans a created callback out to SMS and email
pub struct NotificationService {
    client: reqwest::Client,
    sms_api_base: String,
    staff_phone: String,
    staff_email: String,
    twilio_account_sid: String,
    twilio_auth_token: String,
    twilio_phone_number: String,
    email_provider: Arc<dyn EmailProvider>,
    rate_limiter: SmsRateLimiter,
    transcript_base_url: String,
}

impl NotificationService {
    pub fn from_config(config: &Config) -> Self {
        let email_provider: Arc<dyn EmailProvider> = match config.email_provider {
            EmailProviderKind::Ses => Arc::new(SesProvider::new(
                config.aws_region.clone(),
                config.aws_access_key_id.clone(),
                config.aws_secret_access_key.clone(),
                config.ses_from_email.clone(),
            )),
            EmailProviderKind::Sendgrid => Arc::new(SendGridProvider::new(
                config.sendgrid_api_key.clone(),
                config.sendgrid_from_email.clone(),
            )),
        };
        Self::new(config, email_provider)
    }

    pub fn new(config: &Config, email_provider: Arc<dyn EmailProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            sms_api_base: TWILIO_API_BASE.to_string(),
            staff_phone: config.staff_phone.clone(),
            staff_email: config.staff_email.clone(),
            twilio_account_sid: config.twilio_account_sid.clone(),
            twilio_auth_token: config.twilio_auth_token.clone(),
            twilio_phone_number: config.twilio_phone_number.clone(),
            email_provider,
            rate_limiter: SmsRateLimiter::new(config.sms_rate_limit),
            transcript_base_url: config.transcript_base_url.clone(),
        }
    }

    pub fn with_sms_api_base(mut self, base: impl Into<String>) -> Self {
        self.sms_api_base = base.into();
        self
    }

    pub fn rate_limiter(&self) -> &SmsRateLimiter {
        &self.rate_limiter
    }

    fn is_sms_priority(priority: TaskPriority) -> bool {
        priority >= SMS_PRIORITY_FLOOR
    }

    /// SMS body: `New urgent callback: {name} {phone} - {intent}`
    fn format_sms_message(task: &CallbackTask, call: Option<&Call>) -> String {
        let name = task.name.as_deref().unwrap_or("Unknown");
        let intent = call
            .and_then(|c| c.intent.as_deref())
            .unwrap_or("Callback requested");
        format!(
            "New urgent callback: {name} {} - {intent}",
            task.callback_number
        )
    }

    fn format_email_subject(task: &CallbackTask) -> String {
        let name = task.name.as_deref().unwrap_or("Unknown Caller");
        format!("[{}] New Callback: {name}", task.priority.label())
    }

    /// HTML and plain-text email bodies
    fn format_email_body(&self, task: &CallbackTask, call: Option<&Call>) -> (String, String) {
        let name = task.name.as_deref().unwrap_or("Unknown");
        let phone = &task.callback_number;
        let best_time = task.best_time_window.as_deref().unwrap_or("Any time");
        let notes = task.notes.as_deref().unwrap_or("No additional notes");

        let intent = call.and_then(|c| c.intent.as_deref());
        let summary = call.and_then(|c| c.summary.as_deref());
        let language_label = call
            .and_then(|c| c.language)
            .map(|l| l.long_label())
            .unwrap_or("English");
        let call_id = call.map(|c| c.id.as_str()).unwrap_or(&task.call_id);
        let transcript_link = format!("{}/{call_id}", self.transcript_base_url);

        let priority_label = match task.priority {
            TaskPriority::Urgent => "URGENT (P0)",
            TaskPriority::High => "HIGH (P1)",
            TaskPriority::Normal => "NORMAL (P2)",
            TaskPriority::Low => "LOW (P3)",
        };
        let priority_class = match task.priority {
            TaskPriority::Urgent => "priority-urgent",
            TaskPriority::High => "priority-high",
            _ => "",
        };

        let intent_html = intent
            .map(|i| {
                format!(
                    r#"<div class="field"><div class="label">Intent:</div><div class="value">{i}</div></div>"#
                )
            })
            .unwrap_or_default();
        let summary_html = summary
            .map(|s| {
                format!(
                    r#"<div class="summary"><div class="label">Call Summary:</div><div class="value">{s}</div></div>"#
                )
            })
            .unwrap_or_default();

        let html_body = format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .header {{ background-color: #2c3e50; color: white; padding: 20px; }}
        .content {{ padding: 20px; }}
        .field {{ margin-bottom: 15px; }}
        .label {{ font-weight: bold; color: #555; }}
        .value {{ margin-top: 5px; }}
        .priority-urgent {{ color: #e74c3c; font-weight: bold; }}
        .priority-high {{ color: #f39c12; font-weight: bold; }}
        .summary {{ background-color: #f9f9f9; padding: 15px; border-left: 4px solid #3498db; margin: 15px 0; }}
        .btn {{ display: inline-block; padding: 10px 20px; background-color: #3498db; color: white; text-decoration: none; border-radius: 5px; }}
    </style>
</head>
<body>
    <div class="header">
        <h2>New Callback Request</h2>
    </div>
    <div class="content">
        <div class="field">
            <div class="label">Priority:</div>
            <div class="value {priority_class}">{priority_label}</div>
        </div>
        <div class="field">
            <div class="label">Caller Name:</div>
            <div class="value">{name}</div>
        </div>
        <div class="field">
            <div class="label">Callback Number:</div>
            <div class="value"><a href="tel:{phone}">{phone}</a></div>
        </div>
        <div class="field">
            <div class="label">Best Time to Call:</div>
            <div class="value">{best_time}</div>
        </div>
        <div class="field">
            <div class="label">Language:</div>
            <div class="value">{language_label}</div>
        </div>
        {intent_html}
        {summary_html}
        <div class="field">
            <div class="label">Notes:</div>
            <div class="value">{notes}</div>
        </div>
        <div class="transcript-link">
            <a href="{transcript_link}" class="btn">View Full Transcript</a>
        </div>
    </div>
</body>
</html>
"#
        );

        let intent_line = intent.map(|i| format!("Intent: {i}\n")).unwrap_or_default();
        let summary_section = summary
            .map(|s| format!("Call Summary:\n{s}\n\n"))
            .unwrap_or_default();
        let text_body = format!(
            "New Callback Request\n\
             ====================\n\n\
             Priority: {priority_label}\n\
             Caller Name: {name}\n\
             Callback Number: {phone}\n\
             Best Time to Call: {best_time}\n\
             Language: {language_label}\n\
             {intent_line}\n\
             {summary_section}\
             Notes:\n{notes}\n\n\
             View Full Transcript: {transcript_link}\n"
        );

        (html_body, text_body)
    }

    /// Send an SMS through the telephony provider's messaging API
    pub async fn send_sms(
        &self,
        to_phone: &str,
        message: &str,
        bypass_rate_limit: bool,
    ) -> NotificationResult {
        if !bypass_rate_limit && !self.rate_limiter.can_send() {
            let remaining = self.rate_limiter.remaining();
            tracing::warn!(to_phone, remaining, "SMS rate limit exceeded");
            return NotificationResult::failure(
                "twilio",
                format!("Rate limit exceeded. {remaining} SMS remaining this hour."),
            );
        }

        if to_phone.is_empty() || self.twilio_phone_number.is_empty() {
            tracing::warn!("SMS phone number not configured, skipping SMS");
            return NotificationResult::failure("twilio", "phone number not configured");
        }
        if self.twilio_account_sid.is_empty() || self.twilio_auth_token.is_empty() {
            return NotificationResult::failure("twilio", "Twilio credentials not configured");
        }

        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.sms_api_base, self.twilio_account_sid
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.twilio_account_sid, Some(&self.twilio_auth_token))
            .form(&[
                ("To", to_phone),
                ("From", self.twilio_phone_number.as_str()),
                ("Body", message),
            ])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                if !bypass_rate_limit {
                    self.rate_limiter.record_send();
                }
                let sid = resp
                    .json::<serde_json::Value>()
                    .await
                    .ok()
                    .and_then(|v| v.get("sid").and_then(|s| s.as_str()).map(String::from));
                tracing::info!(to_phone, "SMS sent via Twilio");
                NotificationResult::success("twilio", sid)
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(%status, body, "Twilio SMS error");
                NotificationResult::failure("twilio", format!("Twilio SMS error: {status}"))
            }
            Err(e) => {
                tracing::error!(error = %e, "Twilio SMS request failed");
                NotificationResult::failure("twilio", format!("Twilio SMS error: {e}"))
            }
        }
    }

    pub async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
    ) -> NotificationResult {
        self.email_provider
            .send_email(to_email, subject, html_body, text_body)
            .await
    }

    /// Fan out notifications for a newly created callback task.
    ///
    /// SMS goes out for HIGH/URGENT priorities; email goes out for
    /// every priority when a staff email is configured. Failure on one
    /// channel never suppresses the other.
    pub async fn notify_callback_created(
        &self,
        task: &CallbackTask,
        call: Option<&Call>,
    ) -> CallbackNotifications {
        let sms = if Self::is_sms_priority(task.priority) {
            if self.staff_phone.is_empty() {
                tracing::warn!(task_id = %task.id, "staff phone not configured, skipping SMS");
                NotificationResult::failure("twilio", "Staff phone number not configured")
            } else {
                let message = Self::format_sms_message(task, call);
                self.send_sms(&self.staff_phone, &message, false).await
            }
        } else {
            // Non-urgent priorities skip SMS by design of the routing
            // rules; the slot still reports success so the pair shape
            // is uniform.
            NotificationResult {
                success: true,
                provider: "none".to_string(),
                message_id: None,
                error: Some("Skipped - not urgent priority".to_string()),
            }
        };

        let email = if self.staff_email.is_empty() {
            tracing::warn!(task_id = %task.id, "staff email not configured, skipping email");
            NotificationResult::failure("none", "Staff email not configured")
        } else {
            let subject = Self::format_email_subject(task);
            let (html_body, text_body) = self.format_email_body(task, call);
            self.send_email(&self.staff_email, &subject, &html_body, Some(&text_body))
                .await
        };

        CallbackNotifications { sms, email }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CallStatus, Language, TaskStatus};

    fn sample_task(priority: TaskPriority) -> CallbackTask {
        CallbackTask {
            id: "task-1".to_string(),
            call_id: "call-1".to_string(),
            priority,
            name: Some("John Smith".to_string()),
            callback_number: "+15551234567".to_string(),
            best_time_window: Some("ASAP".to_string()),
            notes: Some("Car accident this morning".to_string()),
            assignee: None,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_call(language: Language) -> Call {
        Call {
            id: "call-1".to_string(),
            from_number: "+15551234567".to_string(),
            language: Some(language),
            customer_type: None,
            intent: Some("File a claim".to_string()),
            status: CallStatus::End,
            summary: Some("Caller needs to file a claim".to_string()),
            transcript: None,
            costs: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service() -> NotificationService {
        let config = Config {
            staff_phone: "+15550001111".to_string(),
            staff_email: "staff@example.com".to_string(),
            transcript_base_url: "https://app.example.com/transcripts".to_string(),
            ..Config::default()
        };
        NotificationService::new(&config, Arc::new(SendGridProvider::new("", "noreply@x")))
    }

    #[test]
    fn test_rate_limiter_window() {
        let limiter = SmsRateLimiter::new(3);
        assert!(limiter.can_send());
        for _ in 0..3 {
            limiter.record_send();
        }
        assert!(!limiter.can_send());
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn test_rate_limiter_prunes_old_entries() {
        let limiter = SmsRateLimiter::new(1);
        {
            let mut queue = limiter.timestamps.lock().unwrap();
            queue.push_back(Utc::now() - Duration::hours(2));
        }
        // The stale entry no longer counts
        assert!(limiter.can_send());
        assert_eq!(limiter.remaining(), 1);
    }

    #[test]
    fn test_sms_priority_floor() {
        assert!(NotificationService::is_sms_priority(TaskPriority::Urgent));
        assert!(NotificationService::is_sms_priority(TaskPriority::High));
        assert!(!NotificationService::is_sms_priority(TaskPriority::Normal));
        assert!(!NotificationService::is_sms_priority(TaskPriority::Low));
    }

    #[test]
    fn test_sms_message_format() {
        let task = sample_task(TaskPriority::Urgent);
        let call = sample_call(Language::En);
        let message = NotificationService::format_sms_message(&task, Some(&call));
        assert_eq!(
            message,
            "New urgent callback: John Smith +15551234567 - File a claim"
        );

        let mut anonymous = task;
        anonymous.name = None;
        let message = NotificationService::format_sms_message(&anonymous, None);
        assert_eq!(
            message,
            "New urgent callback: Unknown +15551234567 - Callback requested"
        );
    }

    #[test]
    fn test_email_subject_labels() {
        assert_eq!(
            NotificationService::format_email_subject(&sample_task(TaskPriority::Urgent)),
            "[URGENT] New Callback: John Smith"
        );
        let mut task = sample_task(TaskPriority::Low);
        task.name = None;
        assert_eq!(
            NotificationService::format_email_subject(&task),
            "[LOW] New Callback: Unknown Caller"
        );
    }

    #[test]
    fn test_email_body_contents() {
        let svc = service();
        let task = sample_task(TaskPriority::Urgent);
        let call = sample_call(Language::Es);
        let (html, text) = svc.format_email_body(&task, Some(&call));

        assert!(html.contains("John Smith"));
        assert!(html.contains("tel:+15551234567"));
        assert!(html.contains("ASAP"));
        assert!(html.contains("Spanish"));
        assert!(html.contains("File a claim"));
        assert!(html.contains("Caller needs to file a claim"));
        assert!(html.contains("https://app.example.com/transcripts/call-1"));

        assert!(text.contains("Priority: URGENT (P0)"));
        assert!(text.contains("Language: Spanish"));
        assert!(text.contains("View Full Transcript: https://app.example.com/transcripts/call-1"));
    }

    #[test]
    fn test_email_body_fallbacks() {
        let svc = service();
        let mut task = sample_task(TaskPriority::Normal);
        task.best_time_window = None;
        task.notes = None;
        let (html, _) = svc.format_email_body(&task, None);
        assert!(html.contains("Any time"));
        assert!(html.contains("No additional notes"));
        // no call context: language defaults to English, no intent block
        assert!(html.contains("English"));
        assert!(!html.contains("Intent:"));
    }

    #[tokio::test]
    async fn test_sms_missing_sender_phone() {
        let config = Config {
            staff_phone: "+15550001111".to_string(),
            ..Config::default()
        };
        let svc =
            NotificationService::new(&config, Arc::new(SendGridProvider::new("", "noreply@x")));
        let result = svc.send_sms("+15550001111", "hello", false).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("phone number not configured"));
    }

    #[tokio::test]
    async fn test_rate_limited_sms_does_not_call_provider() {
        let config = Config {
            sms_rate_limit: 0,
            twilio_phone_number: "+15552223333".to_string(),
            twilio_account_sid: "AC1".to_string(),
            twilio_auth_token: "tok".to_string(),
            ..Config::default()
        };
        let svc =
            NotificationService::new(&config, Arc::new(SendGridProvider::new("", "noreply@x")));
        let result = svc.send_sms("+15550001111", "hello", false).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn test_normal_priority_skips_sms_with_synthetic_success() {
        let svc = service();
        let task = sample_task(TaskPriority::Normal);
        let results = svc.notify_callback_created(&task, None).await;
        assert!(results.sms.success);
        assert_eq!(results.sms.provider, "none");
        assert!(results.sms.error.unwrap().contains("not urgent"));
    }

    #[tokio::test]
    async fn test_sendgrid_without_key_reports_not_configured() {
        let provider = SendGridProvider::new("", "noreply@example.com");
        let result = provider.send_email("to@example.com", "s", "<p>b</p>", None).await;
        assert!(!result.success);
        assert_eq!(result.provider, "sendgrid");
        assert!(result.error.unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn test_ses_without_credentials_reports_not_configured() {
        let provider = SesProvider::new("us-east-1", "", "", "noreply@example.com");
        let result = provider.send_email("to@example.com", "s", "<p>b</p>", None).await;
        assert!(!result.success);
        assert_eq!(result.provider, "ses");
        assert!(result.error.unwrap().contains("not configured"));
    }

    #[test]
    fn test_sigv4_signature_is_stable() {
        let provider = SesProvider::new("us-east-1", "AKIDEXAMPLE", "secret", "noreply@x");
        let a = provider.sign_request("email.us-east-1.amazonaws.com", "/v2/email/outbound-emails", "{}", "20260101T000000Z");
        let b = provider.sign_request("email.us-east-1.amazonaws.com", "/v2/email/outbound-emails", "{}", "20260101T000000Z");
        assert_eq!(a, b);
        assert!(a.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260101/us-east-1/ses/aws4_request"));
        // payload changes change the signature
        let c = provider.sign_request("email.us-east-1.amazonaws.com", "/v2/email/outbound-emails", "{\"x\":1}", "20260101T000000Z");
        assert_ne!(a, c);
    }
}
