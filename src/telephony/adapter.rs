//! Telephony adapter contract and Twilio REST implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::Config;
use crate::telephony::twiml::{DialAttrs, DialNumber, Verb, VoiceResponse};

/// Provider-level call states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelephonyCallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
    Canceled,
}

impl TelephonyCallStatus {
    /// Map a provider status string; unknown inputs are treated as
    /// in-progress.
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => TelephonyCallStatus::Queued,
            "ringing" => TelephonyCallStatus::Ringing,
            "in-progress" => TelephonyCallStatus::InProgress,
            "completed" => TelephonyCallStatus::Completed,
            "busy" => TelephonyCallStatus::Busy,
            "failed" => TelephonyCallStatus::Failed,
            "no-answer" => TelephonyCallStatus::NoAnswer,
            "canceled" => TelephonyCallStatus::Canceled,
            _ => TelephonyCallStatus::InProgress,
        }
    }
}

/// Information about one call at the provider
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call_id: String,
    pub from_number: String,
    pub to_number: String,
    pub status: TelephonyCallStatus,
    pub started_at: DateTime<Utc>,
}

/// Telephony errors. Vendor HTTP details are flattened into strings at
/// this boundary.
#[derive(Debug, thiserror::Error)]
pub enum TelephonyError {
    #[error("telephony credentials not configured")]
    NotConfigured,
    #[error("call not found: {0}")]
    CallNotFound(String),
    #[error("telephony provider error: {0}")]
    Provider(String),
}

/// Pluggable telephony provider contract
#[async_trait]
pub trait TelephonyAdapter: Send + Sync {
    /// Answer an incoming call. For webhook-driven providers the
    /// answer is implicit in the webhook response.
    async fn answer_call(&self, call_id: &str) -> Result<(), TelephonyError>;

    /// Terminate an active call
    async fn hangup_call(&self, call_id: &str) -> Result<(), TelephonyError>;

    /// Transfer an active call to another number. Returns true when
    /// the transfer was initiated.
    async fn transfer_call(&self, call_id: &str, target_number: &str)
        -> Result<bool, TelephonyError>;

    /// Play a hosted audio file to the caller
    async fn play_audio(&self, call_id: &str, audio_url: &str) -> Result<(), TelephonyError>;

    /// Fetch call details from the provider
    async fn get_call_info(&self, call_id: &str) -> Result<CallInfo, TelephonyError>;
}

// ---- Twilio REST implementation ----

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Twilio call-control adapter. Live-call modifications go through the
/// calls resource: updating a call with new dialogue-control XML
/// redirects its flow.
pub struct TwilioAdapter {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    phone_number: String,
}

#[derive(Debug, Deserialize)]
struct TwilioCallResource {
    sid: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    start_time: Option<String>,
}

impl TwilioAdapter {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: TWILIO_API_BASE.to_string(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            phone_number: phone_number.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_phone_number.clone(),
        )
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty()
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_sid
        )
    }

    fn check_configured(&self) -> Result<(), TelephonyError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(TelephonyError::NotConfigured)
        }
    }

    /// Update a live call with replacement dialogue-control XML
    async fn update_call_twiml(&self, call_sid: &str, twiml: &str) -> Result<(), TelephonyError> {
        self.check_configured()?;
        let response = self
            .client
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Twiml", twiml)])
            .send()
            .await
            .map_err(|e| TelephonyError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(TelephonyError::CallNotFound(call_sid.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelephonyError::Provider(format!("{status}: {body}")));
        }
        Ok(())
    }

    fn transfer_twiml(target_number: &str) -> String {
        VoiceResponse::new()
            .push(Verb::Dial {
                attrs: DialAttrs {
                    timeout: Some(20),
                    ..Default::default()
                },
                number: DialNumber {
                    number: target_number.to_string(),
                    ..Default::default()
                },
            })
            .to_xml()
    }

    fn play_twiml(audio_url: &str) -> String {
        VoiceResponse::new()
            .push(Verb::Play {
                url: audio_url.to_string(),
                loop_count: None,
            })
            .to_xml()
    }
}

#[async_trait]
impl TelephonyAdapter for TwilioAdapter {
    async fn answer_call(&self, _call_id: &str) -> Result<(), TelephonyError> {
        // Answering is implicit: the voice webhook's XML response
        // answers the call.
        Ok(())
    }

    async fn hangup_call(&self, call_id: &str) -> Result<(), TelephonyError> {
        self.check_configured()?;
        let response = self
            .client
            .post(self.call_url(call_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(|e| TelephonyError::Provider(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TelephonyError::Provider(format!("{status}: {body}")));
        }
        tracing::info!(call_id, "hung up call");
        Ok(())
    }

    async fn transfer_call(
        &self,
        call_id: &str,
        target_number: &str,
    ) -> Result<bool, TelephonyError> {
        let twiml = Self::transfer_twiml(target_number);
        self.update_call_twiml(call_id, &twiml).await?;
        tracing::info!(call_id, target_number, "initiated call transfer");
        Ok(true)
    }

    async fn play_audio(&self, call_id: &str, audio_url: &str) -> Result<(), TelephonyError> {
        let twiml = Self::play_twiml(audio_url);
        self.update_call_twiml(call_id, &twiml).await
    }

    async fn get_call_info(&self, call_id: &str) -> Result<CallInfo, TelephonyError> {
        self.check_configured()?;
        let response = self
            .client
            .get(self.call_url(call_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| TelephonyError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(TelephonyError::CallNotFound(call_id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelephonyError::Provider(format!("{status}: {body}")));
        }

        let resource: TwilioCallResource = response
            .json()
            .await
            .map_err(|e| TelephonyError::Provider(format!("invalid response: {e}")))?;

        Ok(CallInfo {
            call_id: resource.sid,
            from_number: resource.from,
            to_number: resource.to,
            status: TelephonyCallStatus::parse(&resource.status),
            started_at: resource
                .start_time
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        })
    }
}
