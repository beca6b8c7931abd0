//! The routing graph.
//!
//! ```text
//!                        ┌─> regulations_retrieve ─┐
//!                        ├─> calendar_retrieve ────┴─> generate ─> confidence_gate ─> END
//!  route ────────────────┼─> code_review ─────────────────────────────────────────> END
//!                        ├─> clock ───────────────────────────────────────────────> END
//!                        └─> direct_answer ───────────────────────────────────────> END
//! ```
//!
//! A run ends either finalized (one assistant turn appended to memory) or
//! halted for review (nothing appended). Halted runs are resumed through
//! [`RoutingGraph::resume_text_approval`] and [`RoutingGraph::resume_code_approval`],
//! which take the state the caller kept from the halted run.

mod confidence;
mod nodes;
mod route;
mod state;

pub use confidence::*;
pub use route::*;
pub use state::*;

use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PipeConfig;
use crate::error::{AppError, AppResult, ToolError};
use crate::memory::{ConversationMemory, Turn};
use crate::oracle::CompletionOracle;
use crate::planner::ToolPlanner;
use crate::retrieval::RetrievalIndex;
use crate::storage::{Invocation, Storage};
use crate::students::StructuredDataStore;

/// Format of clock answers.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Source of the current time for the clock tool.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Nodes of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Node {
    Route,
    DirectAnswer,
    RegulationsRetrieve,
    CalendarRetrieve,
    Generate,
    ConfidenceGate,
    CodeReview,
    Clock,
}

impl Node {
    fn as_str(&self) -> &'static str {
        match self {
            Node::Route => "route",
            Node::DirectAnswer => "direct_answer",
            Node::RegulationsRetrieve => "regulations_retrieve",
            Node::CalendarRetrieve => "calendar_retrieve",
            Node::Generate => "generate",
            Node::ConfidenceGate => "confidence_gate",
            Node::CodeReview => "code_review",
            Node::Clock => "clock",
        }
    }

    fn entry_for(edge: Edge) -> Node {
        match edge {
            Edge::RegulationsRetrieval => Node::RegulationsRetrieve,
            Edge::CalendarRetrieval => Node::CalendarRetrieve,
            Edge::CodeReview => Node::CodeReview,
            Edge::Clock => Node::Clock,
            Edge::DirectAnswer => Node::DirectAnswer,
        }
    }

    /// Fixed successor; `None` is END. The route node's successor comes
    /// from the state instead.
    fn successor(&self, state: &QueryState) -> Option<Node> {
        match self {
            Node::Route => Some(Node::entry_for(Edge::from_metadata(state.next_node()))),
            Node::RegulationsRetrieve | Node::CalendarRetrieve => Some(Node::Generate),
            Node::Generate => Some(Node::ConfidenceGate),
            Node::ConfidenceGate | Node::CodeReview | Node::Clock | Node::DirectAnswer => None,
        }
    }
}

/// Routes queries through retrieval, student data, clock or direct answers.
///
/// Cheap to share: collaborators are held behind `Arc`s and the graph keeps
/// no per-query or per-session state.
#[derive(Clone)]
pub struct RoutingGraph {
    planner: ToolPlanner,
    oracle: Arc<dyn CompletionOracle>,
    regulations: Arc<dyn RetrievalIndex>,
    calendar: Arc<dyn RetrievalIndex>,
    students: Arc<dyn StructuredDataStore>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<dyn Storage>>,
    pipes: Option<PipeConfig>,
}

impl RoutingGraph {
    /// Number of regulation chunks retrieved per query.
    pub const REGULATIONS_K: usize = 3;
    /// Number of calendar chunks retrieved per query.
    pub const CALENDAR_K: usize = 20;

    pub fn new(
        oracle: Arc<dyn CompletionOracle>,
        regulations: Arc<dyn RetrievalIndex>,
        calendar: Arc<dyn RetrievalIndex>,
        students: Arc<dyn StructuredDataStore>,
    ) -> Self {
        Self {
            planner: ToolPlanner::new(Arc::clone(&oracle)),
            oracle,
            regulations,
            calendar,
            students,
            clock: Arc::new(SystemClock),
            audit: None,
            pipes: None,
        }
    }

    /// Replace the clock used by the clock tool.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Log every oracle and agent call to `audit`.
    pub fn with_audit(mut self, audit: Arc<dyn Storage>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Tag audited answer and agent calls with the pipes serving them.
    pub fn with_pipe_names(mut self, pipes: PipeConfig) -> Self {
        self.pipes = Some(pipes);
        self
    }

    /// The audit sink, if one is attached.
    pub fn audit(&self) -> Option<&Arc<dyn Storage>> {
        self.audit.as_ref()
    }

    /// Run one query to completion or to an approval halt.
    ///
    /// Finalized runs append exactly one assistant turn to `memory`; halted
    /// runs leave it untouched.
    pub async fn generate_response(
        &self,
        query: &str,
        memory: &mut ConversationMemory,
    ) -> AppResult<QueryState> {
        if query.trim().is_empty() {
            return Err(ToolError::Validation {
                field: "query".to_string(),
                reason: "Query cannot be empty".to_string(),
            }
            .into());
        }

        let start = Instant::now();
        let mut state = QueryState::new(query);
        let mut node = Some(Node::Route);
        let mut visited = Vec::new();

        while let Some(current) = node {
            debug!(node = current.as_str(), "Entering node");
            state = self.run_node(current, state, memory).await?;
            visited.push(current.as_str());
            node = current.successor(&state);
        }

        if !state.is_pending() {
            self.finalize(&state, memory)?;
        }

        info!(
            path = ?visited,
            status = ?state.status(),
            confidence = ?state.confidence(),
            latency_ms = start.elapsed().as_millis(),
            "Query run completed"
        );

        Ok(state)
    }

    /// Execute reviewed code through the guarded student data agent.
    ///
    /// Never reached from dispatch; this is the resumption path after code review.
    pub async fn generate_code_response(&self, code: &str) -> AppResult<QueryState> {
        if code.trim().is_empty() {
            return Err(ToolError::Validation {
                field: "code".to_string(),
                reason: "Code cannot be empty".to_string(),
            }
            .into());
        }
        Ok(self.execute_code_node(QueryState::new(code)).await)
    }

    /// Finish a run halted for text review with the reviewer's (possibly edited) text.
    ///
    /// The trailing assistant turn is overwritten, or one is appended when the
    /// halted answer was never recorded. Generation is not re-run.
    pub fn resume_text_approval(
        &self,
        halted: QueryState,
        edited_text: &str,
        memory: &mut ConversationMemory,
    ) -> AppResult<QueryState> {
        if !halted.needs_text_approval() {
            return Err(ToolError::Validation {
                field: "state".to_string(),
                reason: "State is not waiting for text approval".to_string(),
            }
            .into());
        }

        memory.replace_last_assistant(edited_text);
        info!(edited = halted.output() != Some(edited_text), "Text approval resumed");

        Ok(halted.with_output(edited_text).approved())
    }

    /// Finish a run halted for code review by executing the reviewer's code.
    ///
    /// Appends the original query as a user turn and the execution result as
    /// an assistant turn.
    pub async fn resume_code_approval(
        &self,
        halted: QueryState,
        edited_code: &str,
        memory: &mut ConversationMemory,
    ) -> AppResult<QueryState> {
        if !halted.needs_code_approval() {
            return Err(ToolError::Validation {
                field: "state".to_string(),
                reason: "State is not waiting for code approval".to_string(),
            }
            .into());
        }

        let executed = self.generate_code_response(edited_code).await?;
        let result = executed.output().unwrap_or_default().to_string();

        memory.push(Turn::user(halted.query()));
        memory.push(Turn::assistant(result.clone()));
        info!(result_len = result.len(), "Code approval resumed");

        Ok(halted.with_output(result).approved())
    }

    fn finalize(&self, state: &QueryState, memory: &mut ConversationMemory) -> AppResult<()> {
        let output = state.output().ok_or_else(|| AppError::Internal {
            message: "graph halted without an output".to_string(),
        })?;
        memory.push(Turn::assistant(output));
        Ok(())
    }

    async fn run_node(
        &self,
        node: Node,
        state: QueryState,
        memory: &ConversationMemory,
    ) -> AppResult<QueryState> {
        Ok(match node {
            Node::Route => self.route_node(state, memory).await,
            Node::DirectAnswer => self.direct_answer_node(state).await,
            Node::RegulationsRetrieve => {
                self.retrieval_node(state, &*self.regulations, Self::REGULATIONS_K)
                    .await
            }
            Node::CalendarRetrieve => {
                self.retrieval_node(state, &*self.calendar, Self::CALENDAR_K)
                    .await
            }
            Node::Generate => self.generate_node(state).await?,
            Node::ConfidenceGate => self.confidence_gate_node(state)?,
            Node::CodeReview => self.code_review_node(state).await,
            Node::Clock => self.clock_node(state),
        })
    }

    async fn record(&self, invocation: Invocation) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_invocation(&invocation).await {
                warn!(
                    error = %e,
                    tool = %invocation.tool_name,
                    "Failed to log invocation - audit trail incomplete"
                );
            }
        }
    }
}
