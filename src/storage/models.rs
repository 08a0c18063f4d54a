//! Row types and enums for the call/callback data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Languages a call can be conducted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "en" => Some(Language::En),
            "es" => Some(Language::Es),
            _ => None,
        }
    }

    /// Long-form label used in staff-facing email bodies
    pub fn long_label(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Es => "Spanish",
        }
    }
}

/// Classification of the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerType {
    New,
    Existing,
    Unknown,
}

impl CustomerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerType::New => "new",
            CustomerType::Existing => "existing",
            CustomerType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(CustomerType::New),
            "existing" => Some(CustomerType::Existing),
            "unknown" => Some(CustomerType::Unknown),
            _ => None,
        }
    }
}

/// Persisted status of a call.
///
/// The first ten values mirror the call-flow state machine; the last
/// three are terminal bookkeeping statuses written by webhooks and the
/// transfer handler, not by the state machine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
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
    Completed,
    Transferred,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Init => "init",
            CallStatus::Greet => "greet",
            CallStatus::LanguageSelect => "language_select",
            CallStatus::ClassifyCustomerType => "classify_customer_type",
            CallStatus::IntentDiscovery => "intent_discovery",
            CallStatus::InfoCollection => "info_collection",
            CallStatus::Confirmation => "confirmation",
            CallStatus::CreateCallbackTask => "create_callback_task",
            CallStatus::TransferOrWrapup => "transfer_or_wrapup",
            CallStatus::End => "end",
            CallStatus::Completed => "completed",
            CallStatus::Transferred => "transferred",
            CallStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "init" => Some(CallStatus::Init),
            "greet" => Some(CallStatus::Greet),
            "language_select" => Some(CallStatus::LanguageSelect),
            "classify_customer_type" => Some(CallStatus::ClassifyCustomerType),
            "intent_discovery" => Some(CallStatus::IntentDiscovery),
            "info_collection" => Some(CallStatus::InfoCollection),
            "confirmation" => Some(CallStatus::Confirmation),
            "create_callback_task" => Some(CallStatus::CreateCallbackTask),
            "transfer_or_wrapup" => Some(CallStatus::TransferOrWrapup),
            "end" => Some(CallStatus::End),
            "completed" => Some(CallStatus::Completed),
            "transferred" => Some(CallStatus::Transferred),
            "failed" => Some(CallStatus::Failed),
            _ => None,
        }
    }

    /// Terminal bookkeeping statuses that sit outside the call-flow
    /// transition graph and may always be written.
    pub fn is_bookkeeping(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Transferred | CallStatus::Failed
        )
    }

    /// Whether a persisted status write from `self` to `to` follows the
    /// call-flow transition graph.
    ///
    /// Concurrent webhook writers check this before overwriting the
    /// status column. Bookkeeping statuses and same-status rewrites are
    /// always allowed; everything else must be an arc of the flow graph
    /// projected onto persisted statuses.
    pub fn can_advance_to(&self, to: CallStatus) -> bool {
        use CallStatus::*;
        if to.is_bookkeeping() || *self == to {
            return true;
        }
        if self.is_bookkeeping() {
            return false;
        }
        let allowed: &[CallStatus] = match self {
            Init => &[Greet],
            Greet => &[LanguageSelect],
            LanguageSelect => &[ClassifyCustomerType, Greet],
            ClassifyCustomerType => &[IntentDiscovery, LanguageSelect],
            IntentDiscovery => &[InfoCollection, Confirmation, TransferOrWrapup, ClassifyCustomerType],
            InfoCollection => &[Confirmation, IntentDiscovery],
            Confirmation => &[CreateCallbackTask, TransferOrWrapup, InfoCollection],
            CreateCallbackTask => &[TransferOrWrapup, End],
            TransferOrWrapup => &[End],
            End => &[],
            Completed | Transferred | Failed => &[],
        };
        allowed.contains(&to)
    }
}

/// Status of a callback task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

/// Priority of a callback task, ordered low to urgent.
///
/// "Critical" is a name used for transfer-failure-originated tasks;
/// the data layer stores it as `Urgent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl TaskPriority {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(TaskPriority::Low),
            2 => Some(TaskPriority::Normal),
            3 => Some(TaskPriority::High),
            4 => Some(TaskPriority::Urgent),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TaskPriority::Low),
            "normal" => Some(TaskPriority::Normal),
            "high" => Some(TaskPriority::High),
            // CRITICAL is the transfer-failure alias for URGENT
            "urgent" | "critical" => Some(TaskPriority::Urgent),
            _ => None,
        }
    }

    /// Bracketed label used in email subjects
    pub fn label(&self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Normal => "NORMAL",
            TaskPriority::High => "HIGH",
            TaskPriority::Urgent => "URGENT",
        }
    }
}

/// One inbound call handled by the receptionist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub from_number: String,
    pub language: Option<Language>,
    pub customer_type: Option<CustomerType>,
    pub intent: Option<String>,
    pub status: CallStatus,
    pub summary: Option<String>,
    /// Structured transcript JSON document (see `storage::transcript`)
    pub transcript: Option<String>,
    /// Free-form cost map (STT, TTS, LLM, telephony, storage)
    pub costs: Option<serde_json::Map<String, serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A follow-up work item produced during or after a call.
///
/// At most one task exists per call (UNIQUE constraint on `call_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackTask {
    pub id: String,
    pub call_id: String,
    pub priority: TaskPriority,
    pub name: Option<String>,
    pub callback_number: String,
    pub best_time_window: Option<String>,
    pub notes: Option<String>,
    pub assignee: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Urgent > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert_eq!(TaskPriority::Urgent.as_i64(), 4);
        assert_eq!(TaskPriority::Low.as_i64(), 1);
    }

    #[test]
    fn test_critical_is_urgent_alias() {
        assert_eq!(TaskPriority::parse("critical"), Some(TaskPriority::Urgent));
        assert_eq!(TaskPriority::parse("urgent"), Some(TaskPriority::Urgent));
    }

    #[test]
    fn test_call_status_round_trip() {
        for status in [
            CallStatus::Init,
            CallStatus::LanguageSelect,
            CallStatus::CreateCallbackTask,
            CallStatus::Transferred,
        ] {
            assert_eq!(CallStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CallStatus::parse("bogus"), None);
    }

    #[test]
    fn test_bookkeeping_statuses() {
        assert!(CallStatus::Completed.is_bookkeeping());
        assert!(CallStatus::Transferred.is_bookkeeping());
        assert!(CallStatus::Failed.is_bookkeeping());
        assert!(!CallStatus::End.is_bookkeeping());
        assert!(!CallStatus::Init.is_bookkeeping());
    }

    #[test]
    fn test_language_labels() {
        assert_eq!(Language::En.long_label(), "English");
        assert_eq!(Language::Es.long_label(), "Spanish");
        assert_eq!(Language::parse("es"), Some(Language::Es));
        assert_eq!(Language::parse("fr"), None);
    }
}
