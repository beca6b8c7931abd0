//! # Campus Query Router
//!
//! Answers university questions by routing each query to one of four tools
//! (regulations retrieval, calendar retrieval, a guarded student-data agent,
//! or the clock) or to a direct answer, through a small execution graph.
//! Low-confidence answers and all generated code halt for human approval.
//!
//! ## Architecture
//!
//! ```text
//! stdin REPL → Session → RoutingGraph → Langbase Pipes / Memories (HTTP)
//!                              ↓
//!                    SQLite (students, audit log)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use campus_query_router::{Config, RoutingGraph, Session};
//! use campus_query_router::langbase::LangbaseClient;
//! use campus_query_router::oracle::LangbaseOracle;
//! use campus_query_router::retrieval::LangbaseMemoryIndex;
//! use campus_query_router::storage::SqliteStorage;
//! use campus_query_router::students::SqlStudentAgent;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let langbase = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let graph = RoutingGraph::new(
//!         Arc::new(LangbaseOracle::new(langbase.clone(), &config.pipes)),
//!         Arc::new(LangbaseMemoryIndex::new(langbase.clone(), "regulations")),
//!         Arc::new(LangbaseMemoryIndex::new(langbase.clone(), "calendar")),
//!         Arc::new(SqlStudentAgent::new(storage, langbase, &config.pipes)),
//!     );
//!     let mut session = Session::new(Arc::new(graph));
//!     let state = session.submit("What events are on campus next week?").await?;
//!     println!("{:?}", state.output());
//!     Ok(())
//! }
//! ```

/// Command-line subcommands and the chat loop.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// The routing graph, its state and its approval gates.
pub mod graph;
/// Langbase API client and types for pipe and memory calls.
pub mod langbase;
/// Conversation memory.
pub mod memory;
/// Completion oracle with a planning-only mode.
pub mod oracle;
/// Dry-run tool selection.
pub mod planner;
/// Prompts and fixed messages.
pub mod prompts;
/// Similarity-search indices over document chunks.
pub mod retrieval;
/// Per-conversation orchestration.
pub mod session;
/// SQLite storage layer for student records and audit logging.
pub mod storage;
/// Guarded student data store.
pub mod students;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use graph::{QueryState, RoutingGraph, RunStatus};
pub use session::Session;
