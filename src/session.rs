//! One conversation: memory, the routing graph, and at most one pending approval.

use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppResult, ToolError};
use crate::graph::{QueryState, RoutingGraph, RunStatus};
use crate::memory::{ConversationMemory, Turn};
use crate::storage::Invocation;

/// Owns a conversation's memory and its pending approval.
///
/// A session runs one query at a time; `&mut self` on every operation keeps
/// memory writes in the order the user acted.
pub struct Session {
    id: String,
    graph: Arc<RoutingGraph>,
    memory: ConversationMemory,
    pending: Option<QueryState>,
}

impl Session {
    pub fn new(graph: Arc<RoutingGraph>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            graph,
            memory: ConversationMemory::new(),
            pending: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Conversation so far.
    pub fn history(&self) -> &ConversationMemory {
        &self.memory
    }

    /// The halted state waiting for a reviewer, if any.
    pub fn pending(&self) -> Option<&QueryState> {
        self.pending.as_ref()
    }

    /// Run the user's query through the graph.
    ///
    /// The query and its answer are committed to memory together when the run
    /// finalizes. A halted run leaves memory untouched until it is approved.
    /// A pending approval from an earlier query is dropped; the new query
    /// starts fresh.
    pub async fn submit(&mut self, query: &str) -> AppResult<QueryState> {
        if query.trim().is_empty() {
            return Err(ToolError::Validation {
                field: "query".to_string(),
                reason: "Query cannot be empty".to_string(),
            }
            .into());
        }

        if let Some(stale) = self.pending.take() {
            warn!(
                session_id = %self.id,
                status = ?stale.status(),
                "Discarding unresolved approval"
            );
        }

        let start = Instant::now();
        let mut working = self.memory.clone();
        working.push(Turn::user(query));
        let state = self.graph.generate_response(query, &mut working).await?;

        if state.is_pending() {
            self.pending = Some(state.clone());
        } else {
            self.memory = working;
        }

        self.log("submit", json!({ "query": query }), &state, start)
            .await;
        Ok(state)
    }

    /// Approve (or edit) the pending text answer.
    ///
    /// On failure the halted state stays pending so the reviewer can retry.
    pub async fn approve_text(&mut self, edited_text: &str) -> AppResult<QueryState> {
        let halted = self.take_pending(RunStatus::PendingTextApproval)?;
        let start = Instant::now();

        let mut working = self.memory.clone();
        working.push(Turn::user(halted.query()));
        let state = match self
            .graph
            .resume_text_approval(halted.clone(), edited_text, &mut working)
        {
            Ok(state) => state,
            Err(e) => {
                self.pending = Some(halted);
                return Err(e);
            }
        };
        self.memory = working;

        self.log("approve_text", json!({ "text": edited_text }), &state, start)
            .await;
        Ok(state)
    }

    /// Approve (or edit) the pending code and execute it.
    ///
    /// On failure the halted state stays pending so the reviewer can retry.
    pub async fn approve_code(&mut self, edited_code: &str) -> AppResult<QueryState> {
        let halted = self.take_pending(RunStatus::PendingCodeApproval)?;
        let start = Instant::now();

        let mut working = self.memory.clone();
        let state = match self
            .graph
            .resume_code_approval(halted.clone(), edited_code, &mut working)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                self.pending = Some(halted);
                return Err(e);
            }
        };
        self.memory = working;

        self.log("approve_code", json!({ "code": edited_code }), &state, start)
            .await;
        Ok(state)
    }

    fn take_pending(&mut self, expected: RunStatus) -> AppResult<QueryState> {
        match self.pending.take() {
            Some(state) if state.status() == expected => Ok(state),
            other => {
                let actual = other.as_ref().map(|s| s.status());
                self.pending = other;
                Err(ToolError::Validation {
                    field: "pending".to_string(),
                    reason: match actual {
                        Some(status) => format!("expected {:?}, found {:?}", expected, status),
                        None => "nothing is waiting for approval".to_string(),
                    },
                }
                .into())
            }
        }
    }

    async fn log(&self, action: &str, input: serde_json::Value, state: &QueryState, start: Instant) {
        info!(
            session_id = %self.id,
            action,
            status = ?state.status(),
            turns = self.memory.len(),
            "Session step completed"
        );

        let Some(audit) = self.graph.audit() else {
            return;
        };
        let invocation = Invocation::new(format!("session.{}", action), input)
            .with_session(self.id.clone())
            .success(
                json!({ "status": state.status(), "output": state.output() }),
                start.elapsed().as_millis() as i64,
            );
        if let Err(e) = audit.log_invocation(&invocation).await {
            warn!(error = %e, session_id = %self.id, "Failed to log session step");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::error::AppError;
    use crate::memory::Role;
    use crate::oracle::{AgentStep, MockCompletionOracle, PlanDecision};
    use crate::retrieval::{RetrievalIndex, RetrievedChunk};
    use crate::students::{AgentRun, Classification, StructuredDataStore};

    struct Docs(Vec<f64>);

    #[async_trait]
    impl RetrievalIndex for Docs {
        async fn search(&self, _query: &str, k: usize) -> AppResult<Vec<RetrievedChunk>> {
            Ok(self
                .0
                .iter()
                .take(k)
                .map(|d| RetrievedChunk::new(format!("passage at {}", d), *d))
                .collect())
        }
    }

    struct Students;

    #[async_trait]
    impl StructuredDataStore for Students {
        async fn classify(&self, _query: &str) -> AppResult<Classification> {
            Ok(Classification::Safe)
        }

        async fn execute(&self, query: &str) -> AppResult<AgentRun> {
            Ok(AgentRun {
                output: format!("result of: {}", query.lines().last().unwrap_or_default()),
                intermediate_steps: vec![AgentStep {
                    tool: "sql_query".to_string(),
                    tool_input: "SELECT name FROM students".to_string(),
                    observation: "Ada".to_string(),
                }],
            })
        }
    }

    fn session_planning(tool: &'static str, regulations: Vec<f64>) -> Session {
        let mut oracle = MockCompletionOracle::new();
        oracle.expect_plan().returning(move |_, _, _| {
            Ok(PlanDecision::Action {
                tool: tool.to_string(),
                tool_input: String::new(),
            })
        });
        oracle
            .expect_invoke()
            .returning(|_| Ok("generated answer".to_string()));

        let graph = RoutingGraph::new(
            Arc::new(oracle),
            Arc::new(Docs(regulations)),
            Arc::new(Docs(vec![])),
            Arc::new(Students),
        );
        Session::new(Arc::new(graph))
    }

    #[tokio::test]
    async fn test_confident_answer_finalizes() {
        let mut session = session_planning("University regulations retriever", vec![0.1, 0.2, 0.3]);

        let state = session.submit("How many credits per year?").await.unwrap();

        assert_eq!(state.status(), RunStatus::Finalized);
        assert!(session.pending().is_none());
        let roles: Vec<Role> = session.history().turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(session.history().last_assistant_text(), Some("generated answer"));
    }

    #[tokio::test]
    async fn test_text_approval_round_trip() {
        let mut session = session_planning("University regulations retriever", vec![1.0, 1.2, 1.4]);

        let state = session.submit("Can I retake an exam?").await.unwrap();
        assert_eq!(state.status(), RunStatus::PendingTextApproval);
        assert!(session.history().is_empty());

        let resumed = session.approve_text("Yes, twice per semester.").await.unwrap();

        assert_eq!(resumed.status(), RunStatus::Finalized);
        assert!(session.pending().is_none());
        assert_eq!(
            session.history().turns(),
            &[
                Turn::user("Can I retake an exam?"),
                Turn::assistant("Yes, twice per semester."),
            ]
        );
    }

    #[tokio::test]
    async fn test_code_approval_appends_query_and_result() {
        let mut session = session_planning("Student data table tool", vec![]);

        let state = session.submit("Who is enrolled?").await.unwrap();
        assert_eq!(state.status(), RunStatus::PendingCodeApproval);
        assert_eq!(state.output(), Some("SELECT name FROM students"));

        session
            .approve_code("SELECT name FROM students LIMIT 1")
            .await
            .unwrap();

        assert_eq!(
            session.history().turns(),
            &[
                Turn::user("Who is enrolled?"),
                Turn::assistant("result of: SELECT name FROM students LIMIT 1"),
            ]
        );
        assert!(session.pending().is_none());
    }

    #[tokio::test]
    async fn test_failed_code_approval_keeps_pending() {
        let mut session = session_planning("Student data table tool", vec![]);
        session.submit("Who is enrolled?").await.unwrap();

        let err = session.approve_code("   ").await.unwrap_err();
        assert!(matches!(err, AppError::Tool(ToolError::Validation { .. })));
        assert_eq!(
            session.pending().map(|s| s.status()),
            Some(RunStatus::PendingCodeApproval)
        );
        assert!(session.history().is_empty());

        session
            .approve_code("SELECT name FROM students")
            .await
            .unwrap();
        assert!(session.pending().is_none());
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_approval_leaves_no_orphan_turn() {
        let mut session = session_planning("Student data table tool", vec![]);
        session.submit("Who is enrolled?").await.unwrap();
        session.submit("And in semester 2?").await.unwrap();

        assert!(session.history().is_empty());
        assert_eq!(
            session.pending().map(|s| s.query()),
            Some("And in semester 2?")
        );
    }

    #[tokio::test]
    async fn test_approval_without_pending_is_rejected() {
        let mut session = session_planning("University regulations retriever", vec![0.0]);

        let err = session.approve_text("anything").await.unwrap_err();
        assert!(matches!(err, AppError::Tool(ToolError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_wrong_kind_of_approval_keeps_pending() {
        let mut session = session_planning("Student data table tool", vec![]);
        session.submit("Who is enrolled?").await.unwrap();

        assert!(session.approve_text("edited").await.is_err());
        assert_eq!(
            session.pending().map(|s| s.status()),
            Some(RunStatus::PendingCodeApproval)
        );
    }

    #[tokio::test]
    async fn test_new_query_discards_stale_pending() {
        let mut session = session_planning("Student data table tool", vec![]);
        session.submit("Who is enrolled?").await.unwrap();
        assert!(session.pending().is_some());

        session.submit("And in semester 2?").await.unwrap();
        assert_eq!(
            session.pending().map(|s| s.query()),
            Some("And in semester 2?")
        );
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let mut session = session_planning("University regulations retriever", vec![]);
        assert!(session.submit("   ").await.is_err());
        assert!(session.history().is_empty());
    }
}
