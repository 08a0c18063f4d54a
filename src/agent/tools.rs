//! Tool dispatcher: validated, side-effectful operations behind LLM
//! tool calls
//!
//! Tool calls arrive as `(name, JSON arguments)` pairs. Parsing turns
//! them into one variant of the `ToolInvocation` sum type with fully
//! validated, typed fields; dispatch matches exhaustively and runs each
//! handler in its own database transaction.
//!
//! Validation refuses any sensitive-checked field whose value contains
//! a denylisted substring (SSN, DOB, payment data). The assistant must
//! never persist that information.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::agent::llm::ToolDefinition;
use crate::notifications::NotificationService;
use crate::storage::{
    CallStatus, CallStore, CallUpdate, CustomerType, Language, NewCall, NewCallbackTask,
    StoreError, TaskPriority,
};
use crate::telephony::adapter::TelephonyAdapter;

/// Substring denylist for sensitive-checked fields (case-insensitive)
pub const SENSITIVE_PATTERNS: &[&str] = &[
    "ssn",
    "social_security",
    "dob",
    "date_of_birth",
    "birth_date",
    "birthdate",
    "credit_card",
    "card_number",
    "cvv",
    "expiry",
    "payment",
    "bank_account",
    "routing_number",
    "pin",
    "password",
];

/// Outcome status of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    Success,
    Failure,
    Partial,
}

/// Structured result of one tool execution
#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub status: HandlerStatus,
    pub data: Map<String, Value>,
    pub error: Option<String>,
    pub tool_name: String,
}

impl HandlerResult {
    pub fn success(tool_name: &str, data: Map<String, Value>) -> Self {
        Self {
            status: HandlerStatus::Success,
            data,
            error: None,
            tool_name: tool_name.to_string(),
        }
    }

    pub fn failure(tool_name: &str, error: impl Into<String>) -> Self {
        Self {
            status: HandlerStatus::Failure,
            data: Map::new(),
            error: Some(error.into()),
            tool_name: tool_name.to_string(),
        }
    }

    pub fn partial(tool_name: &str, data: Map<String, Value>, error: impl Into<String>) -> Self {
        Self {
            status: HandlerStatus::Partial,
            data,
            error: Some(error.into()),
            tool_name: tool_name.to_string(),
        }
    }

    /// One-line rendering fed back to the LLM as the tool message
    pub fn to_llm_response(&self) -> String {
        let data = Value::Object(self.data.clone());
        match self.status {
            HandlerStatus::Success => format!(
                "Tool '{}' executed successfully. Result: {data}",
                self.tool_name
            ),
            HandlerStatus::Partial => format!(
                "Tool '{}' partially completed. Result: {data}. Warning: {}",
                self.tool_name,
                self.error.as_deref().unwrap_or("unknown")
            ),
            HandlerStatus::Failure => format!(
                "Tool '{}' failed. Error: {}",
                self.tool_name,
                self.error.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

// ---- Argument validation ----

fn check_sensitive(value: &str, field: &str) -> Result<(), String> {
    let lower = value.to_lowercase();
    for pattern in SENSITIVE_PATTERNS {
        if lower.contains(pattern) {
            return Err(format!(
                "Field '{field}' appears to contain sensitive information. \
                 Do not collect SSN, DOB, or payment information."
            ));
        }
    }
    Ok(())
}

/// E.164-shaped number: optional leading `+`, then digits with dashes
/// and spaces allowed, 10..=20 chars total
fn check_phone(value: &str, field: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("Field '{field}' cannot be empty"));
    }
    if value.len() < 10 || value.len() > 20 {
        return Err(format!("Field '{field}' must be 10-20 characters"));
    }
    let digits = value.trim_start_matches('+').replace(['-', ' '], "");
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!(
            "Field '{field}' must contain only digits, +, -, and spaces"
        ));
    }
    Ok(value.to_string())
}

fn check_len(value: &str, field: &str, min: usize, max: usize) -> Result<(), String> {
    if value.len() < min {
        return Err(format!("Field '{field}' must be at least {min} characters"));
    }
    if value.len() > max {
        return Err(format!("Field '{field}' must be at most {max} characters"));
    }
    Ok(())
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required field '{field}'"))
}

fn optional_str(args: &Value, field: &str) -> Option<String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

// ---- Typed tool arguments ----

/// Validated arguments for `create_call_record`
#[derive(Debug, Clone)]
pub struct CreateCallRecordArgs {
    pub from_number: String,
    pub language: Language,
    pub customer_type: CustomerType,
    pub intent: String,
    pub status: CallStatus,
}

impl CreateCallRecordArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let from_number = check_phone(required_str(args, "from_number")?, "from_number")?;
        let language = Language::parse(required_str(args, "language")?)
            .ok_or_else(|| "Field 'language' must be 'en' or 'es'".to_string())?;
        let customer_type = CustomerType::parse(required_str(args, "customer_type")?)
            .ok_or_else(|| "Field 'customer_type' must be new, existing, or unknown".to_string())?;
        let intent = required_str(args, "intent")?.to_string();
        check_len(&intent, "intent", 1, 1000)?;
        check_sensitive(&intent, "intent")?;
        let status = match optional_str(args, "status") {
            Some(s) => CallStatus::parse(&s)
                .ok_or_else(|| format!("Field 'status' has unknown value '{s}'"))?,
            None => CallStatus::Init,
        };
        Ok(Self {
            from_number,
            language,
            customer_type,
            intent,
            status,
        })
    }
}

/// Validated arguments for `update_call_record` (partial update)
#[derive(Debug, Clone)]
pub struct UpdateCallRecordArgs {
    pub call_id: String,
    pub language: Option<Language>,
    pub customer_type: Option<CustomerType>,
    pub intent: Option<String>,
    pub status: Option<CallStatus>,
    pub summary: Option<String>,
    pub transcript: Option<String>,
}

impl UpdateCallRecordArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let call_id = required_str(args, "call_id")?.to_string();
        let language = match optional_str(args, "language") {
            Some(s) => Some(
                Language::parse(&s)
                    .ok_or_else(|| "Field 'language' must be 'en' or 'es'".to_string())?,
            ),
            None => None,
        };
        let customer_type = match optional_str(args, "customer_type") {
            Some(s) => Some(CustomerType::parse(&s).ok_or_else(|| {
                "Field 'customer_type' must be new, existing, or unknown".to_string()
            })?),
            None => None,
        };
        let intent = optional_str(args, "intent");
        if let Some(intent) = &intent {
            check_len(intent, "intent", 1, 1000)?;
            check_sensitive(intent, "intent")?;
        }
        let status = match optional_str(args, "status") {
            Some(s) => Some(
                CallStatus::parse(&s)
                    .ok_or_else(|| format!("Field 'status' has unknown value '{s}'"))?,
            ),
            None => None,
        };
        let summary = optional_str(args, "summary");
        if let Some(summary) = &summary {
            check_len(summary, "summary", 0, 5000)?;
            check_sensitive(summary, "summary")?;
        }
        Ok(Self {
            call_id,
            language,
            customer_type,
            intent,
            status,
            summary,
            transcript: optional_str(args, "transcript"),
        })
    }
}

/// Validated arguments for `create_callback_task`
#[derive(Debug, Clone)]
pub struct CreateCallbackTaskArgs {
    pub call_id: String,
    pub priority: TaskPriority,
    pub name: Option<String>,
    pub callback_number: String,
    pub best_time_window: Option<String>,
    pub notes: Option<String>,
}

impl CreateCallbackTaskArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let call_id = required_str(args, "call_id")?.to_string();
        let priority = match optional_str(args, "priority") {
            Some(s) => TaskPriority::parse(&s)
                .ok_or_else(|| format!("Field 'priority' has unknown value '{s}'"))?,
            None => TaskPriority::Normal,
        };
        let name = optional_str(args, "name");
        if let Some(name) = &name {
            check_len(name, "name", 0, 200)?;
            check_sensitive(name, "name")?;
        }
        let callback_number =
            check_phone(required_str(args, "callback_number")?, "callback_number")?;
        let best_time_window = optional_str(args, "best_time_window");
        if let Some(window) = &best_time_window {
            check_len(window, "best_time_window", 0, 100)?;
        }
        let notes = optional_str(args, "notes");
        if let Some(notes) = &notes {
            check_len(notes, "notes", 0, 2000)?;
            check_sensitive(notes, "notes")?;
        }
        Ok(Self {
            call_id,
            priority,
            name,
            callback_number,
            best_time_window,
            notes,
        })
    }
}

/// Validated arguments for `transfer_call`
#[derive(Debug, Clone)]
pub struct TransferCallArgs {
    pub call_id: String,
    pub target_number: Option<String>,
    pub queue_name: Option<String>,
    pub reason: String,
}

impl TransferCallArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let call_id = required_str(args, "call_id")?.to_string();
        let target_number = optional_str(args, "target_number");
        let queue_name = optional_str(args, "queue_name");
        match (&target_number, &queue_name) {
            (None, None) => {
                return Err("Either target_number or queue_name must be provided".to_string())
            }
            (Some(_), Some(_)) => {
                return Err(
                    "Provide exactly one of target_number or queue_name, not both".to_string()
                )
            }
            _ => {}
        }
        if let Some(number) = &target_number {
            check_len(number, "target_number", 0, 20)?;
        }
        if let Some(queue) = &queue_name {
            check_len(queue, "queue_name", 0, 100)?;
        }
        let reason = required_str(args, "reason")?.to_string();
        check_len(&reason, "reason", 1, 500)?;
        Ok(Self {
            call_id,
            target_number,
            queue_name,
            reason,
        })
    }
}

/// Validated arguments for `send_notification`
#[derive(Debug, Clone)]
pub struct SendNotificationArgs {
    pub call_id: String,
    pub notification_type: String,
    pub recipient: String,
    pub message: String,
}

impl SendNotificationArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let call_id = required_str(args, "call_id")?.to_string();
        let notification_type = required_str(args, "notification_type")?.to_string();
        if notification_type != "sms" && notification_type != "email" {
            return Err("Field 'notification_type' must be 'sms' or 'email'".to_string());
        }
        let recipient = required_str(args, "recipient")?.to_string();
        check_len(&recipient, "recipient", 1, 200)?;
        let message = required_str(args, "message")?.to_string();
        check_len(&message, "message", 1, 1000)?;
        check_sensitive(&message, "message")?;
        Ok(Self {
            call_id,
            notification_type,
            recipient,
            message,
        })
    }
}

/// One fully validated tool invocation
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    CreateCallRecord(CreateCallRecordArgs),
    UpdateCallRecord(UpdateCallRecordArgs),
    CreateCallbackTask(CreateCallbackTaskArgs),
    TransferCall(TransferCallArgs),
    SendNotification(SendNotificationArgs),
}

/// Why a tool call could not be turned into an invocation
#[derive(Debug, thiserror::Error)]
pub enum ToolParseError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    Validation(String),
}

impl ToolInvocation {
    /// Parse and validate a named tool call
    pub fn parse(name: &str, args: &Value) -> Result<Self, ToolParseError> {
        let parsed = match name {
            "create_call_record" => {
                ToolInvocation::CreateCallRecord(CreateCallRecordArgs::parse(args).map_err(ToolParseError::Validation)?)
            }
            "update_call_record" => {
                ToolInvocation::UpdateCallRecord(UpdateCallRecordArgs::parse(args).map_err(ToolParseError::Validation)?)
            }
            "create_callback_task" => {
                ToolInvocation::CreateCallbackTask(CreateCallbackTaskArgs::parse(args).map_err(ToolParseError::Validation)?)
            }
            "transfer_call" => {
                ToolInvocation::TransferCall(TransferCallArgs::parse(args).map_err(ToolParseError::Validation)?)
            }
            "send_notification" => {
                ToolInvocation::SendNotification(SendNotificationArgs::parse(args).map_err(ToolParseError::Validation)?)
            }
            other => return Err(ToolParseError::UnknownTool(other.to_string())),
        };
        Ok(parsed)
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolInvocation::CreateCallRecord(_) => "create_call_record",
            ToolInvocation::UpdateCallRecord(_) => "update_call_record",
            ToolInvocation::CreateCallbackTask(_) => "create_callback_task",
            ToolInvocation::TransferCall(_) => "transfer_call",
            ToolInvocation::SendNotification(_) => "send_notification",
        }
    }
}

/// Function-calling schemas for every tool, in the order the model
/// sees them
pub fn all_tool_schemas() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "create_call_record".to_string(),
            description: "Create a record of the call with essential information about the caller and their intent.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "from_number": {
                        "type": "string",
                        "description": "The caller's phone number in E.164 format (e.g., +15551234567)"
                    },
                    "language": {
                        "type": "string",
                        "enum": ["en", "es"],
                        "description": "The language selected by the caller"
                    },
                    "customer_type": {
                        "type": "string",
                        "enum": ["new", "existing", "unknown"],
                        "description": "Whether caller is new, existing, or unknown customer"
                    },
                    "intent": {
                        "type": "string",
                        "description": "The caller's stated intent/reason for calling"
                    },
                    "status": {
                        "type": "string",
                        "description": "Current status of the call"
                    }
                },
                "required": ["from_number", "language", "customer_type", "intent"]
            }),
        },
        ToolDefinition {
            name: "update_call_record".to_string(),
            description: "Update an existing call record. All fields except call_id are optional.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "call_id": {
                        "type": "string",
                        "description": "The id of the call record to update"
                    },
                    "language": {"type": "string", "enum": ["en", "es"]},
                    "customer_type": {"type": "string", "enum": ["new", "existing", "unknown"]},
                    "intent": {"type": "string", "description": "Updated intent/reason for calling"},
                    "status": {"type": "string", "description": "Updated call status"},
                    "summary": {"type": "string", "description": "AI-generated summary of the call"},
                    "transcript": {"type": "string", "description": "Full transcript of the conversation"}
                },
                "required": ["call_id"]
            }),
        },
        ToolDefinition {
            name: "create_callback_task".to_string(),
            description: "Create a callback task so office staff can call the customer back.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "call_id": {
                        "type": "string",
                        "description": "The id of the associated call record"
                    },
                    "priority": {
                        "type": "string",
                        "enum": ["low", "normal", "high", "urgent"],
                        "description": "Priority of the callback task"
                    },
                    "name": {"type": "string", "description": "The caller's name"},
                    "callback_number": {
                        "type": "string",
                        "description": "Phone number to call back in E.164 format"
                    },
                    "best_time_window": {
                        "type": "string",
                        "description": "Best time to call back (e.g., 'morning', '9am-12pm')"
                    },
                    "notes": {"type": "string", "description": "Additional notes about the callback request"}
                },
                "required": ["call_id", "callback_number"]
            }),
        },
        ToolDefinition {
            name: "transfer_call".to_string(),
            description: "Transfer the call to another number or queue when escalation to a human is needed.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "call_id": {"type": "string", "description": "The id of the call to transfer"},
                    "target_number": {"type": "string", "description": "Phone number to transfer to (direct transfer)"},
                    "queue_name": {"type": "string", "description": "Queue name to transfer to (queue-based)"},
                    "reason": {"type": "string", "description": "Reason for the transfer"}
                },
                "required": ["call_id", "reason"]
            }),
        },
        ToolDefinition {
            name: "send_notification".to_string(),
            description: "Send an SMS or email notification to office staff about an urgent matter.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "call_id": {"type": "string", "description": "The id of the associated call"},
                    "notification_type": {
                        "type": "string",
                        "enum": ["sms", "email"],
                        "description": "Type of notification"
                    },
                    "recipient": {"type": "string", "description": "Recipient phone number or email address"},
                    "message": {"type": "string", "description": "Notification message content"}
                },
                "required": ["call_id", "notification_type", "recipient", "message"]
            }),
        },
    ]
}

// ---- Dispatcher ----

/// Executes validated tool invocations against the store, telephony
/// adapter, and notification service.
pub struct ToolDispatcher {
    store: CallStore,
    telephony: Option<Arc<dyn TelephonyAdapter>>,
    notifications: Option<Arc<NotificationService>>,
}

impl ToolDispatcher {
    pub fn new(store: CallStore) -> Self {
        Self {
            store,
            telephony: None,
            notifications: None,
        }
    }

    pub fn with_telephony(mut self, telephony: Arc<dyn TelephonyAdapter>) -> Self {
        self.telephony = Some(telephony);
        self
    }

    pub fn with_notifications(mut self, notifications: Arc<NotificationService>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Execute a named tool call. Validation failures, unknown names,
    /// and store errors all come back as FAILURE results; the call
    /// keeps going either way.
    pub async fn execute(&self, tool_name: &str, arguments: &Value) -> HandlerResult {
        tracing::info!(tool = tool_name, "executing tool");
        let invocation = match ToolInvocation::parse(tool_name, arguments) {
            Ok(invocation) => invocation,
            Err(e) => {
                tracing::warn!(tool = tool_name, error = %e, "tool call rejected");
                return HandlerResult::failure(tool_name, e.to_string());
            }
        };

        let result = match invocation {
            ToolInvocation::CreateCallRecord(args) => self.create_call_record(args).await,
            ToolInvocation::UpdateCallRecord(args) => self.update_call_record(args).await,
            ToolInvocation::CreateCallbackTask(args) => self.create_callback_task(args).await,
            ToolInvocation::TransferCall(args) => self.transfer_call(args).await,
            ToolInvocation::SendNotification(args) => self.send_notification(args).await,
        };
        tracing::info!(tool = tool_name, status = ?result.status, "tool completed");
        result
    }

    async fn create_call_record(&self, args: CreateCallRecordArgs) -> HandlerResult {
        let result = self
            .store
            .insert_call_full(NewCall {
                id: None,
                from_number: args.from_number,
                language: Some(args.language),
                customer_type: Some(args.customer_type),
                intent: Some(args.intent),
                status: args.status,
            })
            .await;
        match result {
            Ok(call) => {
                let mut data = Map::new();
                data.insert("call_id".to_string(), Value::String(call.id));
                data.insert(
                    "status".to_string(),
                    Value::String(call.status.as_str().to_string()),
                );
                HandlerResult::success("create_call_record", data)
            }
            Err(e) => HandlerResult::failure("create_call_record", e.to_string()),
        }
    }

    async fn update_call_record(&self, args: UpdateCallRecordArgs) -> HandlerResult {
        let update = CallUpdate {
            language: args.language,
            customer_type: args.customer_type,
            intent: args.intent,
            status: args.status,
            summary: args.summary,
            transcript: args.transcript,
        };
        match self.store.update_call(&args.call_id, update).await {
            Ok(call) => {
                let mut data = Map::new();
                data.insert("call_id".to_string(), Value::String(call.id));
                data.insert(
                    "status".to_string(),
                    Value::String(call.status.as_str().to_string()),
                );
                HandlerResult::success("update_call_record", data)
            }
            Err(StoreError::CallNotFound(id)) => {
                HandlerResult::failure("update_call_record", format!("Call not found: {id}"))
            }
            Err(e) => HandlerResult::failure("update_call_record", e.to_string()),
        }
    }

    async fn create_callback_task(&self, args: CreateCallbackTaskArgs) -> HandlerResult {
        let call = match self.store.get_call(&args.call_id).await {
            Ok(Some(call)) => call,
            Ok(None) => {
                return HandlerResult::failure(
                    "create_callback_task",
                    format!("Call not found: {}", args.call_id),
                )
            }
            Err(e) => return HandlerResult::failure("create_callback_task", e.to_string()),
        };

        let task = match self
            .store
            .insert_callback_task(NewCallbackTask {
                call_id: args.call_id.clone(),
                priority: args.priority,
                name: args.name,
                callback_number: args.callback_number,
                best_time_window: args.best_time_window,
                notes: args.notes,
                assignee: None,
            })
            .await
        {
            Ok(task) => task,
            Err(e) => return HandlerResult::failure("create_callback_task", e.to_string()),
        };

        let mut data = Map::new();
        data.insert("task_id".to_string(), Value::String(task.id.clone()));
        data.insert("call_id".to_string(), Value::String(args.call_id));

        // Callback creation triggers the staff notification fanout
        if let Some(notifications) = &self.notifications {
            let results = notifications.notify_callback_created(&task, Some(&call)).await;
            data.insert(
                "notifications".to_string(),
                serde_json::json!({
                    "sms": {"success": results.sms.success, "provider": results.sms.provider},
                    "email": {"success": results.email.success, "provider": results.email.provider},
                }),
            );
        }

        HandlerResult::success("create_callback_task", data)
    }

    async fn transfer_call(&self, args: TransferCallArgs) -> HandlerResult {
        let Some(telephony) = &self.telephony else {
            return HandlerResult::failure("transfer_call", "Telephony adapter not configured");
        };

        // Queue transfers resolve to their queue's number at the
        // provider; a direct number is used as given.
        let target = args
            .target_number
            .clone()
            .or(args.queue_name.clone())
            .unwrap_or_default();

        let transferred = match telephony
            .transfer_call(&args.call_id, args.target_number.as_deref().unwrap_or(""))
            .await
        {
            Ok(ok) => ok,
            Err(e) => return HandlerResult::failure("transfer_call", e.to_string()),
        };
        if !transferred {
            return HandlerResult::failure("transfer_call", "Transfer failed");
        }

        tracing::info!(call_id = %args.call_id, target = %target, reason = %args.reason, "transferred call");

        let mut data = Map::new();
        data.insert("call_id".to_string(), Value::String(args.call_id.clone()));
        data.insert("transferred_to".to_string(), Value::String(target));

        // Status is written after the adapter acknowledges. If the
        // write fails the transfer still happened, so the result is
        // PARTIAL rather than FAILURE.
        match self
            .store
            .set_call_status(&args.call_id, CallStatus::Transferred)
            .await
        {
            Ok(_) => HandlerResult::success("transfer_call", data),
            Err(e) => {
                tracing::error!(call_id = %args.call_id, error = %e, "transfer succeeded but status write failed");
                HandlerResult::partial(
                    "transfer_call",
                    data,
                    format!("transferred but status not recorded: {e}"),
                )
            }
        }
    }

    async fn send_notification(&self, args: SendNotificationArgs) -> HandlerResult {
        let Some(notifications) = &self.notifications else {
            return HandlerResult::failure("send_notification", "Notification service not configured");
        };

        let result = match args.notification_type.as_str() {
            "sms" => notifications.send_sms(&args.recipient, &args.message, false).await,
            _ => {
                notifications
                    .send_email(&args.recipient, "Message from your voice receptionist", &args.message, Some(&args.message))
                    .await
            }
        };

        if !result.success {
            return HandlerResult::failure(
                "send_notification",
                result.error.unwrap_or_else(|| "notification failed".to_string()),
            );
        }

        let mut data = Map::new();
        data.insert(
            "notification_type".to_string(),
            Value::String(args.notification_type),
        );
        data.insert("recipient".to_string(), Value::String(args.recipient));
        data.insert("sent".to_string(), Value::Bool(true));
        HandlerResult::success("send_notification", data)
    }
}
