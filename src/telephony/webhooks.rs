//! Twilio webhook handlers
//!
//! Form-encoded POSTs from the telephony provider drive call
//! lifecycle: inbound voice, DTMF language selection, call status,
//! recording metadata, and transfer outcomes. Every handler validates
//! the provider signature and answers with dialogue-control XML.
//!
//! Database failures never fail the HTTP response: the caller is mid
//! call, so handlers log the error and keep the dialogue going.

use axum::extract::{RawForm, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::notifications::NotificationService;
use crate::server::AppState;
use crate::storage::{CallStatus, CallUpdate, NewCallbackTask, TaskPriority};
use crate::telephony::twiml::{bilingual_greeting, VoiceResponse};

/// Form fields as parsed pairs (duplicates preserved for signing)
type FormParams = Vec<(String, String)>;

/// Notes line attached to transfer-failure callbacks
const TRANSFER_FAILED_NOTES: &str = "Transfer failed - urgent callback";

/// Routes served under the application router
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks/twilio/voice", post(handle_voice))
        .route("/webhooks/twilio/language-select", post(handle_language_select))
        .route("/webhooks/twilio/status", post(handle_status))
        .route("/webhooks/twilio/recording", post(handle_recording))
        .route("/webhooks/twilio/transfer-status", post(handle_transfer_status))
}

fn parse_form(body: &[u8]) -> FormParams {
    url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn field<'a>(params: &'a FormParams, name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Provider signature: base64(HMAC-SHA1(auth_token, url + sorted form
/// key/value concatenation)).
fn compute_signature(auth_token: &str, url: &str, params: &FormParams) -> String {
    let mut sorted: FormParams = params.clone();
    sorted.sort();

    let mut payload = url.to_string();
    for (key, value) in &sorted {
        payload.push_str(key);
        payload.push_str(value);
    }

    let mut mac = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Reconstruct the public URL the provider signed. Webhooks terminate
/// behind TLS, so the public scheme is https.
fn request_url(headers: &HeaderMap, uri: &Uri) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("https://{host}{uri}")
}

/// Validate the request signature. 401 for a missing or wrong
/// signature, 500 when no shared token is configured outside
/// development.
fn validate_signature(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
    params: &FormParams,
) -> Result<(), StatusCode> {
    if state.config.validation_skipped() {
        return Ok(());
    }

    let Some(signature) = headers
        .get("X-Twilio-Signature")
        .and_then(|v| v.to_str().ok())
    else {
        tracing::warn!("webhook request missing provider signature");
        return Err(StatusCode::UNAUTHORIZED);
    };

    if state.config.twilio_auth_token.is_empty() {
        tracing::error!("TWILIO_AUTH_TOKEN not configured, cannot validate webhooks");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let url = request_url(headers, uri);
    let expected = compute_signature(&state.config.twilio_auth_token, &url, params);
    if expected != signature {
        tracing::warn!(url, "invalid provider signature on webhook");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

fn xml_response(xml: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        xml,
    )
        .into_response()
}

fn empty_xml_response() -> Response {
    xml_response(VoiceResponse::new().to_xml())
}

/// Inbound voice webhook: create the call record and answer with the
/// bilingual greeting that gathers a language digit.
async fn handle_voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    RawForm(body): RawForm,
) -> Response {
    let params = parse_form(&body);
    if let Err(status) = validate_signature(&state, &headers, &uri, &params) {
        return status.into_response();
    }

    let (Some(call_sid), Some(from), Some(to), Some(call_status)) = (
        field(&params, "CallSid"),
        field(&params, "From"),
        field(&params, "To"),
        field(&params, "CallStatus"),
    ) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    tracing::info!(
        call_sid,
        from_number = from,
        to_number = to,
        status = call_status,
        "incoming call"
    );

    // The call must proceed even when the record cannot be written
    if let Err(e) = state.store.insert_call(Some(call_sid), from, None).await {
        tracing::error!(call_sid, error = %e, "failed to create call record, continuing call");
    }

    let response = bilingual_greeting(
        "Hello, this is the automated assistant for the office. \
         For English, press 1 or stay on the line.",
        "Hola, soy el asistente automatico de la oficina. \
         Para espanol, presione 2.",
        "/webhooks/twilio/language-select",
    );
    xml_response(response.to_xml())
}

/// DTMF language selection: digit 2 selects Spanish, anything else
/// defaults to English.
async fn handle_language_select(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    RawForm(body): RawForm,
) -> Response {
    let params = parse_form(&body);
    if let Err(status) = validate_signature(&state, &headers, &uri, &params) {
        return status.into_response();
    }

    let Some(call_sid) = field(&params, "CallSid") else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let digits = field(&params, "Digits").unwrap_or("");
    tracing::info!(call_sid, digits, "language selection received");

    // A live session (if one exists) switches language with the caller
    let language = if digits == "2" { "es" } else { "en" };
    if let Err(e) = state.sessions.set_language(call_sid, language).await {
        tracing::debug!(call_sid, error = %e, "no live session to switch language on");
    }
    if let Err(e) = state
        .store
        .update_call(
            call_sid,
            CallUpdate {
                language: crate::storage::Language::parse(language),
                ..Default::default()
            },
        )
        .await
    {
        tracing::debug!(call_sid, error = %e, "language not recorded on call");
    }

    let response = if digits == "2" {
        VoiceResponse::new()
            .say_es("Gracias. Un momento, por favor, mientras procesamos su llamada.")
            .say_es("Su llamada ha sido recibida. Un representante le devolvera la llamada pronto. Adios.")
            .hangup()
    } else {
        VoiceResponse::new()
            .say_en("Thank you. Please hold while we process your call.")
            .say_en("Your call has been received. A representative will call you back shortly. Goodbye.")
            .hangup()
    };
    xml_response(response.to_xml())
}

/// Call-status webhook: terminal statuses close out the call record
async fn handle_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    RawForm(body): RawForm,
) -> Response {
    let params = parse_form(&body);
    if let Err(status) = validate_signature(&state, &headers, &uri, &params) {
        return status.into_response();
    }

    let (Some(call_sid), Some(call_status)) =
        (field(&params, "CallSid"), field(&params, "CallStatus"))
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let duration = field(&params, "CallDuration").and_then(|d| d.parse::<f64>().ok());

    tracing::info!(call_sid, status = call_status, duration, "call status update");

    match call_status {
        "completed" => {
            if let Err(e) = state
                .store
                .set_call_status(call_sid, CallStatus::Completed)
                .await
            {
                tracing::error!(call_sid, error = %e, "failed to mark call completed");
            } else if let Some(duration) = duration {
                if let Err(e) = state.store.add_cost(call_sid, "duration_sec", duration).await {
                    tracing::error!(call_sid, error = %e, "failed to record call duration");
                }
            }
        }
        "failed" | "busy" | "no-answer" | "canceled" => {
            if let Err(e) = state.store.set_call_status(call_sid, CallStatus::Failed).await {
                tracing::error!(call_sid, error = %e, "failed to mark call failed");
            }
        }
        // Non-terminal statuses are progress notifications only
        _ => {}
    }

    empty_xml_response()
}

/// Recording webhook: metadata acknowledged, retained for future use
async fn handle_recording(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    RawForm(body): RawForm,
) -> Response {
    let params = parse_form(&body);
    if let Err(status) = validate_signature(&state, &headers, &uri, &params) {
        return status.into_response();
    }

    tracing::info!(
        call_sid = field(&params, "CallSid").unwrap_or(""),
        recording_sid = field(&params, "RecordingSid").unwrap_or(""),
        recording_status = field(&params, "RecordingStatus").unwrap_or(""),
        duration = field(&params, "RecordingDuration").unwrap_or(""),
        "recording callback received"
    );

    empty_xml_response()
}

/// Bilingual fallback announcement played when a transfer fails
fn transfer_fallback_xml() -> String {
    VoiceResponse::new()
        .say_en(
            "We're sorry, no one is available to take your call right now. \
             We will call you back within 1 hour.",
        )
        .say_es(
            "Lo sentimos, no hay nadie disponible para atender su llamada en este momento. \
             Le llamaremos dentro de 1 hora.",
        )
        .hangup()
        .to_xml()
}

/// Transfer-status webhook: a failed transfer injects a critical
/// callback task and plays the bilingual fallback; a completed
/// transfer just closes the call record.
async fn handle_transfer_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    RawForm(body): RawForm,
) -> Response {
    let params = parse_form(&body);
    if let Err(status) = validate_signature(&state, &headers, &uri, &params) {
        return status.into_response();
    }

    let (Some(call_sid), Some(dial_status)) =
        (field(&params, "CallSid"), field(&params, "DialCallStatus"))
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    tracing::info!(
        call_sid,
        dial_status,
        called = field(&params, "Called").unwrap_or(""),
        "transfer status received"
    );

    match dial_status {
        "busy" | "no-answer" | "failed" | "canceled" => {
            create_transfer_callback(&state, call_sid).await;
            xml_response(transfer_fallback_xml())
        }
        "completed" => {
            if let Err(e) = state
                .store
                .set_call_status(call_sid, CallStatus::Completed)
                .await
            {
                tracing::error!(call_sid, error = %e, "failed to mark transferred call completed");
            }
            empty_xml_response()
        }
        _ => empty_xml_response(),
    }
}

/// Insert the critical-priority callback for a failed transfer and
/// fan out notifications. Critical is stored as URGENT.
async fn create_transfer_callback(state: &AppState, call_sid: &str) {
    let call = match state.store.get_call(call_sid).await {
        Ok(Some(call)) => call,
        Ok(None) => {
            tracing::error!(call_sid, "transfer failed for unknown call, no callback created");
            return;
        }
        Err(e) => {
            tracing::error!(call_sid, error = %e, "failed to load call for transfer fallback");
            return;
        }
    };

    let task = match state
        .store
        .insert_callback_task(NewCallbackTask {
            call_id: call.id.clone(),
            priority: TaskPriority::Urgent,
            name: None,
            callback_number: call.from_number.clone(),
            best_time_window: None,
            notes: Some(TRANSFER_FAILED_NOTES.to_string()),
            assignee: None,
        })
        .await
    {
        Ok(task) => task,
        Err(e) => {
            tracing::error!(call_sid, error = %e, "failed to create transfer-failure callback");
            return;
        }
    };

    if let Err(e) = state
        .store
        .update_call(
            call_sid,
            CallUpdate {
                status: Some(CallStatus::Failed),
                ..Default::default()
            },
        )
        .await
    {
        tracing::error!(call_sid, error = %e, "failed to mark call failed after transfer failure");
    }

    tracing::info!(
        call_sid,
        task_id = %task.id,
        callback_number = %task.callback_number,
        "created critical callback for failed transfer"
    );

    notify_callback(&state.notifications, &task, &call).await;
}

async fn notify_callback(
    notifications: &NotificationService,
    task: &crate::storage::CallbackTask,
    call: &crate::storage::Call,
) {
    let results = notifications.notify_callback_created(task, Some(call)).await;
    if !results.sms.success && results.sms.provider != "none" {
        tracing::warn!(
            task_id = %task.id,
            error = results.sms.error.as_deref().unwrap_or(""),
            "SMS notification failed"
        );
    }
    if !results.email.success {
        tracing::warn!(
            task_id = %task.id,
            error = results.email.error.as_deref().unwrap_or(""),
            "email notification failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic_and_sorted() {
        let params_a = vec![
            ("CallSid".to_string(), "CA1".to_string()),
            ("From".to_string(), "+15551234567".to_string()),
        ];
        let params_b = vec![
            ("From".to_string(), "+15551234567".to_string()),
            ("CallSid".to_string(), "CA1".to_string()),
        ];
        let url = "https://example.com/webhooks/twilio/voice";
        // parameter order on the wire does not affect the signature
        assert_eq!(
            compute_signature("token", url, &params_a),
            compute_signature("token", url, &params_b)
        );
        // a different token produces a different signature
        assert_ne!(
            compute_signature("token", url, &params_a),
            compute_signature("other", url, &params_a)
        );
    }

    #[test]
    fn test_transfer_fallback_contents() {
        let xml = transfer_fallback_xml();
        assert!(xml.contains("no one is available"));
        assert!(xml.contains("call you back within 1 hour"));
        assert!(xml.contains("no hay nadie disponible"));
        assert!(xml.contains("dentro de 1 hora"));
        assert!(xml.contains("<Hangup"));
    }

    #[test]
    fn test_form_parsing() {
        let params = parse_form(b"CallSid=CA1&From=%2B15551234567&Digits=2");
        assert_eq!(field(&params, "CallSid"), Some("CA1"));
        assert_eq!(field(&params, "From"), Some("+15551234567"));
        assert_eq!(field(&params, "Digits"), Some("2"));
        assert_eq!(field(&params, "Missing"), None);
    }
}
