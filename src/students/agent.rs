use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{AgentRun, Classification, StructuredDataStore};
use crate::config::PipeConfig;
use crate::error::{AppResult, ToolError};
use crate::langbase::{LangbaseClient, Message, PipeRequest};
use crate::oracle::{extract_json_from_completion, AgentStep};
use crate::prompts::{guard_prompt, narrate_rows_prompt};
use crate::storage::SqliteStorage;

/// Action name recorded for each executed statement.
pub const SQL_ACTION: &str = "sql_query";

#[derive(Debug, Deserialize)]
struct SqlReply {
    sql: String,
}

/// Student data agent: a pipe writes SQL, SQLite runs it read-only, a second
/// pipe narrates the rows.
#[derive(Clone)]
pub struct SqlStudentAgent {
    storage: SqliteStorage,
    langbase: LangbaseClient,
    sql_pipe: String,
    answer_pipe: String,
    guard_pipe: String,
}

impl SqlStudentAgent {
    pub fn new(storage: SqliteStorage, langbase: LangbaseClient, pipes: &PipeConfig) -> Self {
        Self {
            storage,
            langbase,
            sql_pipe: pipes.student_sql.clone(),
            answer_pipe: pipes.answer.clone(),
            guard_pipe: pipes.guard.clone(),
        }
    }

    async fn complete(&self, pipe: &str, content: String) -> AppResult<String> {
        let request = PipeRequest::new(pipe, vec![Message::user(content)]);
        Ok(self.langbase.call_pipe(request).await?.completion)
    }
}

/// Pull the SQL statement out of a SQL pipe completion.
///
/// Accepts `{"sql": ...}` JSON (bare or fenced), a ```sql block, or a bare
/// statement starting with SELECT/WITH.
pub fn extract_sql(completion: &str) -> Result<String, ToolError> {
    if let Ok(json) = extract_json_from_completion(completion) {
        if let Ok(reply) = serde_json::from_str::<SqlReply>(json) {
            let sql = reply.sql.trim();
            if !sql.is_empty() {
                return Ok(sql.to_string());
            }
        }
    }

    if let Some(block) = completion
        .split("```sql")
        .nth(1)
        .and_then(|s| s.split("```").next())
    {
        let sql = block.trim();
        if !sql.is_empty() {
            return Ok(sql.to_string());
        }
    }

    let trimmed = completion.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("select") || lower.starts_with("with") {
        return Ok(trimmed.to_string());
    }

    Err(ToolError::ParseFailed {
        source_name: "student sql".to_string(),
        message: format!(
            "no SQL statement found. First 100 chars: '{}'",
            completion.chars().take(100).collect::<String>()
        ),
    })
}

#[async_trait]
impl StructuredDataStore for SqlStudentAgent {
    async fn classify(&self, query: &str) -> AppResult<Classification> {
        let reply = self
            .complete(&self.guard_pipe, guard_prompt(query))
            .await
            .map_err(|e| ToolError::Guard {
                message: e.to_string(),
            })?;
        let verdict = Classification::parse(&reply);
        debug!(verdict = ?verdict, "Guard classified request");
        Ok(verdict)
    }

    async fn execute(&self, query: &str) -> AppResult<AgentRun> {
        let completion = self.complete(&self.sql_pipe, query.to_string()).await?;
        let sql = extract_sql(&completion)?;

        let observation = match self.storage.run_read_only(&sql).await {
            Ok(table) => table.render(),
            Err(e) => {
                warn!(error = %e, sql = %sql, "Generated SQL failed");
                format!("Error: {}", e)
            }
        };

        let output = self
            .complete(
                &self.answer_pipe,
                narrate_rows_prompt(query, &sql, &observation),
            )
            .await?;

        Ok(AgentRun {
            output,
            intermediate_steps: vec![AgentStep {
                tool: SQL_ACTION.to_string(),
                tool_input: sql,
                observation,
            }],
        })
    }
}
