//! Command-line surface: subcommands plus the interactive chat loop.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::graph::{QueryState, RunStatus};
use crate::session::Session;
use crate::storage::{SqliteStorage, Storage, StudentRecord};

/// Route university questions through the campus query graph.
#[derive(Parser, Debug)]
#[command(name = "campus-query-router", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level subcommands. No subcommand means [`Command::Chat`].
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Interactive chat on stdin
    Chat,

    /// Load student records from a JSON array file
    ImportStudents {
        /// Path to the JSON file
        path: PathBuf,
    },

    /// Show the most recent audited calls
    Invocations {
        /// Maximum number of entries to show
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    pub message: String,
}

impl CliResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Insert every record of a JSON array file into the students table.
pub async fn import_students(storage: &SqliteStorage, path: &Path) -> CliResult {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => return CliResult::error(format!("Cannot read {}: {}", path.display(), e)),
    };
    let records: Vec<StudentRecord> = match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(e) => return CliResult::error(format!("Invalid student file: {}", e)),
    };

    for (i, record) in records.iter().enumerate() {
        if let Err(e) = storage.insert_student(record).await {
            return CliResult::error(format!("Record {} rejected: {}", i, e));
        }
    }

    info!(count = records.len(), path = %path.display(), "Imported students");
    CliResult::success(format!("Imported {} students", records.len()))
}

/// List recent invocations, newest first.
pub async fn show_invocations(storage: &dyn Storage, limit: i64) -> CliResult {
    match storage.recent_invocations(limit).await {
        Ok(invocations) if invocations.is_empty() => CliResult::success("No invocations recorded"),
        Ok(invocations) => {
            let lines: Vec<String> = invocations
                .iter()
                .map(|inv| {
                    format!(
                        "{} [{}] {} {}ms{}",
                        inv.created_at.format("%Y-%m-%d %H:%M:%S"),
                        if inv.success { "ok" } else { "failed" },
                        inv.tool_name,
                        inv.latency_ms.unwrap_or_default(),
                        inv.error
                            .as_deref()
                            .map(|e| format!(" - {}", e))
                            .unwrap_or_default()
                    )
                })
                .collect();
            CliResult::success(lines.join("\n"))
        }
        Err(e) => CliResult::error(format!("Failed to load invocations: {}", e)),
    }
}

/// One line of chat input.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Query(String),
    /// `:approve [text]`; no text keeps the pending answer.
    ApproveText(Option<String>),
    /// `:approve-code [sql]`; no code keeps the pending code.
    ApproveCode(Option<String>),
    Pending,
    History,
    Quit,
    Empty,
    Unknown(String),
}

/// Parse a chat line. Lines not starting with `:` are queries.
pub fn parse_line(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    if !line.starts_with(':') {
        return ReplCommand::Query(line.to_string());
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };
    let argument = (!rest.is_empty()).then(|| rest.to_string());

    match command {
        ":approve" => ReplCommand::ApproveText(argument),
        ":approve-code" => ReplCommand::ApproveCode(argument),
        ":pending" => ReplCommand::Pending,
        ":history" => ReplCommand::History,
        ":quit" | ":q" | ":exit" => ReplCommand::Quit,
        other => ReplCommand::Unknown(other.to_string()),
    }
}

/// Render a graph result for the terminal.
pub fn render_state(state: &QueryState) -> String {
    let output = state.output().unwrap_or_default();
    match state.status() {
        RunStatus::Finalized => output.to_string(),
        RunStatus::PendingTextApproval => format!(
            "{}\n\n[needs review: confidence {:.3}] Context:\n{}\n\nUse `:approve` to accept or `:approve <text>` to replace the answer.",
            output,
            state.confidence().unwrap_or_default(),
            state.context().unwrap_or_default()
        ),
        RunStatus::PendingCodeApproval => format!(
            "Generated code:\n{}\n\nAgent's answer:\n{}\n\nUse `:approve-code` to run it or `:approve-code <sql>` to run an edited version.",
            output,
            state.context().unwrap_or_default()
        ),
    }
}

/// Handle one chat line. `None` means quit.
pub async fn handle_line(session: &mut Session, command: ReplCommand) -> Option<String> {
    let reply = match command {
        ReplCommand::Quit => return None,
        ReplCommand::Empty => String::new(),
        ReplCommand::Query(query) => match session.submit(&query).await {
            Ok(state) => render_state(&state),
            Err(e) => format!("Error: {}", e),
        },
        ReplCommand::ApproveText(edited) => {
            let text = edited.or_else(|| pending_output(session));
            match text {
                Some(text) => match session.approve_text(&text).await {
                    Ok(state) => render_state(&state),
                    Err(e) => format!("Error: {}", e),
                },
                None => "Nothing is waiting for approval".to_string(),
            }
        }
        ReplCommand::ApproveCode(edited) => {
            let code = edited.or_else(|| pending_output(session));
            match code {
                Some(code) => match session.approve_code(&code).await {
                    Ok(state) => render_state(&state),
                    Err(e) => format!("Error: {}", e),
                },
                None => "Nothing is waiting for approval".to_string(),
            }
        }
        ReplCommand::Pending => match session.pending() {
            Some(state) => render_state(state),
            None => "Nothing is waiting for approval".to_string(),
        },
        ReplCommand::History => {
            let transcript = session.history().transcript();
            if transcript.is_empty() {
                "(empty)".to_string()
            } else {
                transcript
            }
        }
        ReplCommand::Unknown(command) => format!(
            "Unknown command {}. Commands: :approve [text], :approve-code [sql], :pending, :history, :quit",
            command
        ),
    };
    Some(reply)
}

fn pending_output(session: &Session) -> Option<String> {
    session
        .pending()
        .and_then(|s| s.output())
        .map(str::to_string)
}

/// Read chat lines from `input` until EOF or `:quit`, writing replies to `output`.
pub async fn run_repl<R, W>(session: &mut Session, input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    output.write_all(b"> ").await?;
    output.flush().await?;

    while let Some(line) = lines.next_line().await? {
        match handle_line(session, parse_line(&line)).await {
            Some(reply) => {
                if !reply.is_empty() {
                    output.write_all(reply.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                }
                output.write_all(b"> ").await?;
                output.flush().await?;
            }
            None => break,
        }
    }

    if session.pending().is_some() {
        warn!(session_id = %session.id(), "Leaving with an unresolved approval");
    }
    output.flush().await?;
    Ok(())
}
