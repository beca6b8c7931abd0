//! Storage layer.
//!
//! SQLite holds the student records behind the student data tool and an
//! audit log of every oracle and agent call the routing graph makes.

mod sqlite;


pub use sqlite::{validate_read_only, SqliteStorage};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// One row of the students table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub name: String,
    pub surname: String,
    pub nationality: String,
    /// Semester in `1..=8`.
    pub semester: i64,
    /// Comma-separated course titles.
    pub all_courses: String,
    /// Discount as displayed, e.g. `"30%"`.
    pub discount_rate: String,
    pub tuition_fees: f64,
}

/// Result of a read-only query: column names plus stringified cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryTable {
    /// True when the query matched no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as a pipe-separated text table, header first.
    pub fn render(&self) -> String {
        if self.columns.is_empty() {
            return "(no columns)".to_string();
        }
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(self.columns.join(" | "));
        for row in &self.rows {
            lines.push(row.join(" | "));
        }
        if self.is_empty() {
            lines.push("(no rows)".to_string());
        }
        lines.join("\n")
    }
}

/// Invocation log entry for auditing oracle and agent calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique invocation identifier.
    pub id: String,
    /// Optional session the call belongs to.
    pub session_id: Option<String>,
    /// Graph node or tool that made the call.
    pub tool_name: String,
    /// Input as JSON.
    pub input: serde_json::Value,
    /// Output as JSON (if successful).
    pub output: Option<serde_json::Value>,
    /// Name of the Langbase pipe called.
    pub pipe_name: Option<String>,
    /// Latency in milliseconds.
    pub latency_ms: Option<i64>,
    /// Whether the call succeeded.
    pub success: bool,
    /// Error message (if failed).
    pub error: Option<String>,
    /// When the call occurred.
    pub created_at: DateTime<Utc>,
}

impl Invocation {
    /// Create a new invocation log entry
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: None,
            tool_name: tool_name.into(),
            input,
            output: None,
            pipe_name: None,
            latency_ms: None,
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Set the session ID
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the pipe name
    pub fn with_pipe(mut self, pipe_name: impl Into<String>) -> Self {
        self.pipe_name = Some(pipe_name.into());
        self
    }

    /// Mark as successful with output
    pub fn success(mut self, output: serde_json::Value, latency_ms: i64) -> Self {
        self.success = true;
        self.output = Some(output);
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Mark as failed with error
    pub fn failure(mut self, error: impl Into<String>, latency_ms: i64) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Audit persistence used by the routing graph.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Record one invocation.
    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()>;
    /// Most recent invocations, newest first.
    async fn recent_invocations(&self, limit: i64) -> StorageResult<Vec<Invocation>>;
}
