//! Node bodies of the routing graph.
//!
//! Collaborator faults never escape a node: they become diagnostic outputs
//! or empty retrievals. Only missing state a node requires is an error.

use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{
    compute_confidence, dispatch, requires_text_approval, QueryState, RoutingGraph,
    CONFIDENCE_KEY, NEXT_NODE_KEY, TIMESTAMP_FORMAT,
};
use crate::error::{AppError, AppResult};
use crate::memory::ConversationMemory;
use crate::prompts::{direct_answer_prompt, execute_code_prompt, generation_prompt, RETRIEVAL_NOTE};
use crate::retrieval::RetrievalIndex;
use crate::storage::Invocation;
use crate::students::{guarded_execute, GuardOutcome};

/// Tool name used in generation prompts when the route recorded none.
const FALLBACK_TOOL_NAME: &str = "a relevant tool";

fn elapsed_ms(start: Instant) -> i64 {
    start.elapsed().as_millis() as i64
}

impl RoutingGraph {
    pub(super) async fn route_node(
        &self,
        state: QueryState,
        memory: &ConversationMemory,
    ) -> QueryState {
        let plan = self.planner.plan(state.query(), memory).await;
        let edge = dispatch(&plan);
        debug!(edge = %edge, "Dispatching");

        state
            .with_selected_tool(plan.tool().map(|t| t.display_name().to_string()))
            .with_metadata(NEXT_NODE_KEY, edge.as_str())
    }

    pub(super) fn clock_node(&self, state: QueryState) -> QueryState {
        let now = self.clock.now().format(TIMESTAMP_FORMAT).to_string();
        state.with_output(now)
    }

    pub(super) async fn direct_answer_node(&self, state: QueryState) -> QueryState {
        let prompt = direct_answer_prompt(state.query());
        let output = self.invoke_logged("direct_answer", &prompt).await;
        let output = output.unwrap_or_else(|e| format!("Agent failed while answering directly: {}", e));
        state.with_output(output)
    }

    pub(super) async fn retrieval_node(
        &self,
        state: QueryState,
        index: &dyn RetrievalIndex,
        k: usize,
    ) -> QueryState {
        let (chunks, note) = match index.search(state.query(), k).await {
            Ok(chunks) => (chunks, RETRIEVAL_NOTE.to_string()),
            Err(e) => {
                warn!(error = %e, k, "Retrieval failed, continuing with no documents");
                (Vec::new(), format!("Retrieval failed: {}", e))
            }
        };

        let confidence = compute_confidence(&chunks);
        info!(k, returned = chunks.len(), confidence, "Retrieved documents");

        state
            .with_retrieved(chunks)
            .with_intermediate_note(note)
            .with_metadata(CONFIDENCE_KEY, confidence)
    }

    pub(super) async fn generate_node(&self, state: QueryState) -> AppResult<QueryState> {
        let retrieved = state.retrieved().ok_or_else(|| AppError::Internal {
            message: "generate reached without retrieved documents".to_string(),
        })?;

        let context = retrieved
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let tool = state
            .selected_tool()
            .unwrap_or(FALLBACK_TOOL_NAME)
            .to_string();

        let prompt = generation_prompt(&tool, &context, state.query());
        let output = match self.invoke_logged("generate", &prompt).await {
            Ok(answer) => answer,
            Err(e) => format!("Agent failed while trying to use {}: {}", tool, e),
        };

        Ok(state.with_output(output).with_context(context))
    }

    pub(super) fn confidence_gate_node(&self, state: QueryState) -> AppResult<QueryState> {
        let confidence = state.confidence().ok_or_else(|| AppError::Internal {
            message: "confidence gate reached without a confidence score".to_string(),
        })?;

        if requires_text_approval(confidence) {
            info!(confidence, "Low confidence, waiting for text approval");
            Ok(state.with_text_approval_needed())
        } else {
            Ok(state)
        }
    }

    pub(super) async fn code_review_node(&self, state: QueryState) -> QueryState {
        let start = Instant::now();
        let outcome = guarded_execute(&*self.students, state.query()).await;
        self.record_agent("code_review", state.query(), &outcome, start)
            .await;

        match outcome {
            Ok(GuardOutcome::Executed(run)) => match run.last_code() {
                Some(code) => {
                    let code = code.to_string();
                    info!(code_len = code.len(), "Generated code waiting for approval");
                    state
                        .with_output(code)
                        .with_context(run.output)
                        .with_code_approval_needed()
                }
                None => {
                    debug!("Agent produced no code, answering with its narrative");
                    state.with_output(run.output)
                }
            },
            Ok(GuardOutcome::Refused(refusal)) => state.with_output(refusal),
            Err(e) => {
                let tool = state
                    .selected_tool()
                    .unwrap_or(FALLBACK_TOOL_NAME)
                    .to_string();
                state.with_output(format!("Agent failed while trying to use {}: {}", tool, e))
            }
        }
    }

    /// Run `state.query()` as code through the guarded agent.
    pub(super) async fn execute_code_node(&self, state: QueryState) -> QueryState {
        let instruction = execute_code_prompt(state.query());
        let start = Instant::now();
        let outcome = guarded_execute(&*self.students, &instruction).await;
        self.record_agent("execute_code", &instruction, &outcome, start)
            .await;

        let output = match outcome {
            Ok(GuardOutcome::Executed(run)) => run.output,
            Ok(GuardOutcome::Refused(refusal)) => refusal,
            Err(e) => format!("Agent failed while executing code: {}", e),
        };
        state.with_output(output)
    }

    async fn invoke_logged(&self, node: &str, prompt: &str) -> AppResult<String> {
        let start = Instant::now();
        let result = self.oracle.invoke(prompt).await;

        let mut invocation = Invocation::new(node, json!({ "prompt": prompt }));
        if let Some(pipes) = &self.pipes {
            invocation = invocation.with_pipe(pipes.answer.as_str());
        }
        let invocation = match &result {
            Ok(answer) => invocation.success(json!({ "output": answer }), elapsed_ms(start)),
            Err(e) => {
                warn!(node, error = %e, "Oracle call failed");
                invocation.failure(e.to_string(), elapsed_ms(start))
            }
        };
        self.record(invocation).await;

        result
    }

    async fn record_agent(
        &self,
        node: &str,
        query: &str,
        outcome: &AppResult<GuardOutcome>,
        start: Instant,
    ) {
        let mut invocation = Invocation::new(node, json!({ "query": query }));
        if let Some(pipes) = &self.pipes {
            invocation = invocation.with_pipe(pipes.student_sql.as_str());
        }
        let invocation = match outcome {
            Ok(GuardOutcome::Executed(run)) => invocation.success(
                json!({ "output": run.output, "steps": run.intermediate_steps }),
                elapsed_ms(start),
            ),
            Ok(GuardOutcome::Refused(refusal)) => {
                invocation.success(json!({ "refused": refusal }), elapsed_ms(start))
            }
            Err(e) => {
                warn!(node, error = %e, "Student data agent failed");
                invocation.failure(e.to_string(), elapsed_ms(start))
            }
        };
        self.record(invocation).await;
    }
}
