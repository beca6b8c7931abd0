use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, ValueRef};
use std::str::FromStr;
use tracing::{debug, info};

use super::{Invocation, QueryTable, Storage, StudentRecord};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Keywords that never appear in a statement the read-only executor accepts.
const WRITE_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "attach", "detach", "pragma",
    "vacuum", "reindex", "truncate",
];

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Insert one student record, returning its row id
    pub async fn insert_student(&self, student: &StudentRecord) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO students (name, surname, nationality, semester, all_courses, discount_rate, tuition_fees)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&student.name)
        .bind(&student.surname)
        .bind(&student.nationality)
        .bind(student.semester)
        .bind(&student.all_courses)
        .bind(&student.discount_rate)
        .bind(student.tuition_fees)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Number of student records
    pub async fn count_students(&self) -> StorageResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM students")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Run a single SELECT statement and return its rows.
    ///
    /// The statement is checked by [`validate_read_only`] and runs inside a
    /// transaction that is always rolled back.
    pub async fn run_read_only(&self, sql: &str) -> StorageResult<QueryTable> {
        let statement = validate_read_only(sql)?;
        debug!(sql = %statement, "Running read-only statement");

        let mut tx = self.pool.begin().await?;
        let fetched = sqlx::query(statement).fetch_all(&mut *tx).await;
        tx.rollback().await?;

        let rows = fetched.map_err(|e| StorageError::Query {
            message: e.to_string(),
        })?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|idx| cell_to_string(row, idx)).collect())
            .collect();

        Ok(QueryTable { columns, rows })
    }
}

/// Accept exactly one SELECT (or WITH ... SELECT) statement.
///
/// Quoted literals, quoted identifiers and comments are masked before the
/// scan, so `'O;Neil'` or `LIKE '%update%'` do not trip it. Returns the
/// statement without its trailing semicolon.
pub fn validate_read_only(sql: &str) -> StorageResult<&str> {
    let statement = sql.trim().trim_end_matches(';').trim();

    if statement.is_empty() {
        return Err(StorageError::Rejected {
            reason: "statement is empty".to_string(),
        });
    }

    let code = mask_literals(statement)?;

    if code.contains(';') {
        return Err(StorageError::Rejected {
            reason: "only a single statement may run".to_string(),
        });
    }

    let words: Vec<String> = code
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect();

    match words.first().map(String::as_str) {
        Some("select") | Some("with") => {}
        _ => {
            return Err(StorageError::Rejected {
                reason: "only SELECT statements may run".to_string(),
            })
        }
    }

    // `replace(...)` is a string function; only `REPLACE INTO` writes.
    let forbidden = words.iter().enumerate().find(|(i, w)| {
        WRITE_KEYWORDS.contains(&w.as_str())
            || (w.as_str() == "replace" && words.get(i + 1).map(String::as_str) == Some("into"))
    });
    if let Some((_, keyword)) = forbidden {
        return Err(StorageError::Rejected {
            reason: format!("statement contains forbidden keyword '{}'", keyword),
        });
    }

    Ok(statement)
}

/// Blank out string literals, quoted identifiers and comments.
fn mask_literals(statement: &str) -> StorageResult<String> {
    let mut masked = String::with_capacity(statement.len());
    let mut chars = statement.chars().peekable();

    while let Some(c) = chars.next() {
        let close = match c {
            '\'' | '"' | '`' => c,
            '[' => ']',
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                masked.push(' ');
                continue;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        closed = true;
                        break;
                    }
                    prev = next;
                }
                if !closed {
                    return Err(StorageError::Rejected {
                        reason: "unterminated comment".to_string(),
                    });
                }
                masked.push(' ');
                continue;
            }
            _ => {
                masked.push(c);
                continue;
            }
        };

        let mut closed = false;
        while let Some(next) = chars.next() {
            if next == close {
                // Doubled quotes escape themselves.
                if close != ']' && chars.peek() == Some(&close) {
                    chars.next();
                    continue;
                }
                closed = true;
                break;
            }
        }
        if !closed {
            return Err(StorageError::Rejected {
                reason: "unterminated quoted literal".to_string(),
            });
        }
        masked.push_str(" x ");
    }

    Ok(masked)
}

fn cell_to_string(row: &SqliteRow, idx: usize) -> String {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return "NULL".to_string(),
        Ok(_) => {}
        Err(_) => return "?".to_string(),
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return v;
    }
    "<blob>".to_string()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()> {
        let input = serde_json::to_string(&invocation.input).unwrap_or_default();
        let output = invocation
            .output
            .as_ref()
            .map(|o| serde_json::to_string(o).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO invocations (id, session_id, tool_name, input, output, pipe_name, latency_ms, success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&invocation.id)
        .bind(&invocation.session_id)
        .bind(&invocation.tool_name)
        .bind(&input)
        .bind(&output)
        .bind(&invocation.pipe_name)
        .bind(invocation.latency_ms)
        .bind(invocation.success)
        .bind(&invocation.error)
        .bind(invocation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_invocations(&self, limit: i64) -> StorageResult<Vec<Invocation>> {
        let rows: Vec<InvocationRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, tool_name, input, output, pipe_name, latency_ms, success, error, created_at
            FROM invocations
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// Internal row type for SQLx mapping
#[derive(sqlx::FromRow)]
struct InvocationRow {
    id: String,
    session_id: Option<String>,
    tool_name: String,
    input: String,
    output: Option<String>,
    pipe_name: Option<String>,
    latency_ms: Option<i64>,
    success: bool,
    error: Option<String>,
    created_at: String,
}

impl From<InvocationRow> for Invocation {
    fn from(row: InvocationRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            tool_name: row.tool_name,
            input: serde_json::from_str(&row.input).unwrap_or(serde_json::Value::Null),
            output: row.output.and_then(|o| serde_json::from_str(&o).ok()),
            pipe_name: row.pipe_name,
            latency_ms: row.latency_ms,
            success: row.success,
            error: row.error,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_select() {
        assert_eq!(
            validate_read_only("  SELECT name FROM students;  ").unwrap(),
            "SELECT name FROM students"
        );
        assert!(validate_read_only("with s as (select 1) select * from s").is_ok());
        assert!(validate_read_only("SELECT replace(name, 'a', 'b') FROM students").is_ok());
        assert!(validate_read_only("SELECT name FROM students WHERE all_courses LIKE '%Update%'").is_ok());
        assert!(validate_read_only("SELECT name FROM students WHERE surname = 'O;Neil'").is_ok());
        assert!(validate_read_only("SELECT name FROM students WHERE surname = 'O''Neil; drop'").is_ok());
    }

    #[test]
    fn test_validate_masks_comments_but_not_code() {
        assert!(validate_read_only("SELECT name -- delete later\nFROM students").is_ok());
        assert!(validate_read_only("SELECT 1 /* ; */ FROM students").is_ok());
        assert!(validate_read_only("WITH t AS (SELECT 1) REPLACE INTO students (name) VALUES ('x')").is_err());
        assert!(validate_read_only("SELECT 'unterminated FROM students").is_err());
    }

    #[test]
    fn test_validate_rejects_writes() {
        for sql in [
            "DELETE FROM students WHERE semester = 1",
            "DROP TABLE students",
            "UPDATE students SET semester = 2",
            "PRAGMA query_only = OFF",
            "REPLACE INTO students (name) VALUES ('x')",
        ] {
            let err = validate_read_only(sql).unwrap_err();
            assert!(matches!(err, StorageError::Rejected { .. }), "{}", sql);
        }
    }

    #[test]
    fn test_validate_rejects_cte_wrapping_a_delete() {
        let err = validate_read_only("WITH t AS (SELECT 1) DELETE FROM students").unwrap_err();
        assert!(err.to_string().contains("delete"));
    }

    #[test]
    fn test_validate_rejects_stacked_statements() {
        let err = validate_read_only("SELECT 1; DROP TABLE students").unwrap_err();
        assert!(err.to_string().contains("single statement"));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(validate_read_only(" ; ").is_err());
    }
}
