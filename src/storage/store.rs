//! SQLite-backed persistence for calls and callback tasks

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::{
    Call, CallStatus, CallbackTask, CustomerType, Language, TaskPriority, TaskStatus,
};
use super::transcript::TranscriptDocument;

/// Errors surfaced by the call store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("call not found: {0}")]
    CallNotFound(String),
    #[error("illegal status transition from {from} to {to}")]
    IllegalStatusTransition { from: &'static str, to: &'static str },
    #[error("callback task already exists for call {0}")]
    TaskAlreadyExists(String),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Partial update applied to an existing call record
#[derive(Debug, Default, Clone)]
pub struct CallUpdate {
    pub language: Option<Language>,
    pub customer_type: Option<CustomerType>,
    pub intent: Option<String>,
    pub status: Option<CallStatus>,
    pub summary: Option<String>,
    pub transcript: Option<String>,
}

/// Fields for a new call record created through the tool dispatcher
#[derive(Debug, Clone)]
pub struct NewCall {
    pub id: Option<String>,
    pub from_number: String,
    pub language: Option<Language>,
    pub customer_type: Option<CustomerType>,
    pub intent: Option<String>,
    pub status: CallStatus,
}

/// Fields for a new callback task
#[derive(Debug, Clone)]
pub struct NewCallbackTask {
    pub call_id: String,
    pub priority: TaskPriority,
    pub name: Option<String>,
    pub callback_number: String,
    pub best_time_window: Option<String>,
    pub notes: Option<String>,
    pub assignee: Option<String>,
}

/// SQLite store for calls and callback tasks.
///
/// Each public operation opens its own transaction and commits or
/// rolls back before returning.
#[derive(Clone)]
pub struct CallStore {
    conn: Arc<Mutex<Connection>>,
}

impl CallStore {
    /// Open (or create) the store at the given path
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                id TEXT PRIMARY KEY,
                from_number TEXT NOT NULL,
                language TEXT,
                customer_type TEXT,
                intent TEXT,
                status TEXT NOT NULL DEFAULT 'init',
                summary TEXT,
                transcript TEXT,
                costs TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS callback_tasks (
                id TEXT PRIMARY KEY,
                call_id TEXT NOT NULL UNIQUE
                    REFERENCES calls(id) ON DELETE CASCADE,
                priority INTEGER NOT NULL DEFAULT 2,
                name TEXT,
                callback_number TEXT NOT NULL,
                best_time_window TEXT,
                notes TEXT,
                assignee TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS ix_calls_from_number_created_at
                ON calls(from_number, created_at);
            CREATE INDEX IF NOT EXISTS ix_calls_status_created_at
                ON calls(status, created_at);
            CREATE INDEX IF NOT EXISTS ix_callback_tasks_status_priority
                ON callback_tasks(status, priority);
            "#,
        )?;
        Ok(())
    }

    /// Insert a new call record. The telephony provider's call id is
    /// used as the primary key when present; otherwise a UUID is
    /// generated.
    pub async fn insert_call(
        &self,
        call_id: Option<&str>,
        from_number: &str,
        language: Option<Language>,
    ) -> Result<Call, StoreError> {
        let id = call_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO calls (id, from_number, language, status, created_at, updated_at)
               VALUES (?1, ?2, ?3, 'init', ?4, ?4)"#,
            params![
                id,
                from_number,
                language.map(|l| l.as_str()),
                now.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        tracing::info!(call_id = %id, from_number, "created call record");

        Ok(Call {
            id,
            from_number: from_number.to_string(),
            language,
            customer_type: None,
            intent: None,
            status: CallStatus::Init,
            summary: None,
            transcript: None,
            costs: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Insert a call record with the full field set
    pub async fn insert_call_full(&self, new: NewCall) -> Result<Call, StoreError> {
        let id = new
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO calls
                   (id, from_number, language, customer_type, intent, status, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)"#,
            params![
                id,
                new.from_number,
                new.language.map(|l| l.as_str()),
                new.customer_type.map(|c| c.as_str()),
                new.intent,
                new.status.as_str(),
                now.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        tracing::info!(call_id = %id, from_number = %new.from_number, "created call record");

        Ok(Call {
            id,
            from_number: new.from_number,
            language: new.language,
            customer_type: new.customer_type,
            intent: new.intent,
            status: new.status,
            summary: None,
            transcript: None,
            costs: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_call(&self, call_id: &str) -> Result<Option<Call>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, from_number, language, customer_type, intent, status,
                    summary, transcript, costs, created_at, updated_at
             FROM calls WHERE id = ?1",
        )?;
        let call = stmt
            .query_row(params![call_id], Self::row_to_call)
            .optional()?;
        Ok(call)
    }

    /// Apply a partial update to a call.
    ///
    /// Status writes are validated against the call-flow transition
    /// graph inside the transaction; an out-of-order write is rejected
    /// without touching any other field.
    pub async fn update_call(
        &self,
        call_id: &str,
        update: CallUpdate,
    ) -> Result<Call, StoreError> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let current: Option<Call> = tx
            .prepare_cached(
                "SELECT id, from_number, language, customer_type, intent, status,
                        summary, transcript, costs, created_at, updated_at
                 FROM calls WHERE id = ?1",
            )?
            .query_row(params![call_id], Self::row_to_call)
            .optional()?;
        let current = current.ok_or_else(|| StoreError::CallNotFound(call_id.to_string()))?;

        if let Some(new_status) = update.status {
            if !current.status.can_advance_to(new_status) {
                return Err(StoreError::IllegalStatusTransition {
                    from: current.status.as_str(),
                    to: new_status.as_str(),
                });
            }
        }

        tx.execute(
            r#"UPDATE calls SET
                   language = COALESCE(?2, language),
                   customer_type = COALESCE(?3, customer_type),
                   intent = COALESCE(?4, intent),
                   status = COALESCE(?5, status),
                   summary = COALESCE(?6, summary),
                   transcript = COALESCE(?7, transcript),
                   updated_at = ?8
               WHERE id = ?1"#,
            params![
                call_id,
                update.language.map(|l| l.as_str()),
                update.customer_type.map(|c| c.as_str()),
                update.intent,
                update.status.map(|s| s.as_str()),
                update.summary,
                update.transcript,
                now.to_rfc3339(),
            ],
        )?;

        let updated = tx
            .prepare_cached(
                "SELECT id, from_number, language, customer_type, intent, status,
                        summary, transcript, costs, created_at, updated_at
                 FROM calls WHERE id = ?1",
            )?
            .query_row(params![call_id], Self::row_to_call)?;
        tx.commit()?;

        tracing::info!(call_id, status = updated.status.as_str(), "updated call record");
        Ok(updated)
    }

    /// Set only the status column, with the same transition check as
    /// `update_call`.
    pub async fn set_call_status(
        &self,
        call_id: &str,
        status: CallStatus,
    ) -> Result<Call, StoreError> {
        self.update_call(
            call_id,
            CallUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Merge a cost entry into the call's cost map
    pub async fn add_cost(
        &self,
        call_id: &str,
        key: &str,
        value: f64,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let costs_json: Option<Option<String>> = tx
            .prepare_cached("SELECT costs FROM calls WHERE id = ?1")?
            .query_row(params![call_id], |row| row.get(0))
            .optional()?;
        let costs_json =
            costs_json.ok_or_else(|| StoreError::CallNotFound(call_id.to_string()))?;

        let mut costs: serde_json::Map<String, serde_json::Value> = costs_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();
        costs.insert(key.to_string(), serde_json::json!(value));

        tx.execute(
            "UPDATE calls SET costs = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                call_id,
                serde_json::to_string(&costs)?,
                now.to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Append a turn to the call's structured transcript, creating the
    /// document on first use. Also tracks transcript storage size in
    /// the cost map.
    pub async fn append_transcript_turn(
        &self,
        call_id: &str,
        speaker: &str,
        text: &str,
        confidence: Option<f64>,
        duration_ms: Option<u64>,
    ) -> Result<TranscriptDocument, StoreError> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let row: Option<(Option<String>, Option<String>, Option<String>)> = tx
            .prepare_cached("SELECT transcript, language, costs FROM calls WHERE id = ?1")?
            .query_row(params![call_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()?;
        let (transcript_json, language, costs_json) =
            row.ok_or_else(|| StoreError::CallNotFound(call_id.to_string()))?;

        let mut doc = transcript_json
            .as_deref()
            .and_then(|j| TranscriptDocument::from_json(j).ok())
            .unwrap_or_else(|| TranscriptDocument::new(language));
        doc.add_turn(speaker, text, confidence, duration_ms);

        let json = doc.to_json();
        let mut costs: serde_json::Map<String, serde_json::Value> = costs_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();
        costs.insert(
            "transcript_storage_bytes".to_string(),
            serde_json::json!(json.len() as f64),
        );
        tx.execute(
            "UPDATE calls SET transcript = ?2, costs = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                call_id,
                json,
                serde_json::to_string(&costs)?,
                now.to_rfc3339()
            ],
        )?;
        tx.commit()?;

        tracing::debug!(call_id, speaker, turns = doc.len(), "appended transcript turn");
        Ok(doc)
    }

    /// Insert a callback task for a call. At most one task may exist
    /// per call; a second insert fails.
    pub async fn insert_callback_task(
        &self,
        task: NewCallbackTask,
    ) -> Result<CallbackTask, StoreError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let call_exists: Option<String> = tx
            .prepare_cached("SELECT id FROM calls WHERE id = ?1")?
            .query_row(params![task.call_id], |row| row.get(0))
            .optional()?;
        if call_exists.is_none() {
            return Err(StoreError::CallNotFound(task.call_id));
        }

        let result = tx.execute(
            r#"INSERT INTO callback_tasks
                   (id, call_id, priority, name, callback_number,
                    best_time_window, notes, assignee, status, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?9)"#,
            params![
                id,
                task.call_id,
                task.priority.as_i64(),
                task.name,
                task.callback_number,
                task.best_time_window,
                task.notes,
                task.assignee,
                now.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::TaskAlreadyExists(task.call_id));
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit()?;

        tracing::info!(task_id = %id, call_id = %task.call_id, priority = task.priority.as_i64(), "created callback task");

        Ok(CallbackTask {
            id,
            call_id: task.call_id,
            priority: task.priority,
            name: task.name,
            callback_number: task.callback_number,
            best_time_window: task.best_time_window,
            notes: task.notes,
            assignee: task.assignee,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_task_for_call(
        &self,
        call_id: &str,
    ) -> Result<Option<CallbackTask>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, call_id, priority, name, callback_number, best_time_window,
                    notes, assignee, status, created_at, updated_at
             FROM callback_tasks WHERE call_id = ?1",
        )?;
        let task = stmt
            .query_row(params![call_id], Self::row_to_task)
            .optional()?;
        Ok(task)
    }

    /// Pending tasks ordered by priority (most urgent first), then age
    pub async fn pending_tasks(&self) -> Result<Vec<CallbackTask>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, call_id, priority, name, callback_number, best_time_window,
                    notes, assignee, status, created_at, updated_at
             FROM callback_tasks
             WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC",
        )?;
        let tasks = stmt
            .query_map([], Self::row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Most recent calls, newest first
    pub async fn recent_calls(&self, limit: usize) -> Result<Vec<Call>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, from_number, language, customer_type, intent, status,
                    summary, transcript, costs, created_at, updated_at
             FROM calls ORDER BY created_at DESC LIMIT ?1",
        )?;
        let calls = stmt
            .query_map(params![limit as i64], Self::row_to_call)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(calls)
    }

    fn row_to_call(row: &Row<'_>) -> rusqlite::Result<Call> {
        let language: Option<String> = row.get(2)?;
        let customer_type: Option<String> = row.get(3)?;
        let status: String = row.get(5)?;
        let costs: Option<String> = row.get(8)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;

        Ok(Call {
            id: row.get(0)?,
            from_number: row.get(1)?,
            language: language.as_deref().and_then(Language::parse),
            customer_type: customer_type.as_deref().and_then(CustomerType::parse),
            intent: row.get(4)?,
            status: CallStatus::parse(&status).unwrap_or(CallStatus::Init),
            summary: row.get(6)?,
            transcript: row.get(7)?,
            costs: costs.as_deref().and_then(|c| serde_json::from_str(c).ok()),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }

    fn row_to_task(row: &Row<'_>) -> rusqlite::Result<CallbackTask> {
        let priority: i64 = row.get(2)?;
        let status: String = row.get(8)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;

        Ok(CallbackTask {
            id: row.get(0)?,
            call_id: row.get(1)?,
            priority: TaskPriority::from_i64(priority).unwrap_or(TaskPriority::Normal),
            name: row.get(3)?,
            callback_number: row.get(4)?,
            best_time_window: row.get(5)?,
            notes: row.get(6)?,
            assignee: row.get(7)?,
            status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
