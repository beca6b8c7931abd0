//! The completion oracle: the language model behind planning and answering.
//!
//! [`CompletionOracle`] is the seam the planner and the graph nodes call
//! through; [`LangbaseOracle`] implements it over two Langbase pipes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipeConfig;
use crate::error::{AppResult, ToolError};
use crate::langbase::{LangbaseClient, Message, PipeRequest};
use crate::memory::{Role, Turn};

/// One step an agent already took: the action, its input and what it observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub tool: String,
    pub tool_input: String,
    pub observation: String,
}

/// What the oracle would do next for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanDecision {
    /// Call `tool` with `tool_input`. Not executed by the oracle.
    Action { tool: String, tool_input: String },
    /// Answer directly without a tool.
    Finish { output: String },
}

/// Text-completion oracle with a planning-only mode.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionOracle: Send + Sync {
    /// Decide the next action without executing it.
    async fn plan(
        &self,
        input: &str,
        history: &[Turn],
        intermediate_steps: &[AgentStep],
    ) -> AppResult<PlanDecision>;

    /// Produce a free-text answer for `input`.
    async fn invoke(&self, input: &str) -> AppResult<String>;
}

/// Raw planner pipe reply.
#[derive(Debug, Deserialize)]
struct PlannerReply {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    action_input: Option<String>,
    #[serde(default)]
    final_answer: Option<String>,
}

impl PlannerReply {
    fn into_decision(self) -> Option<PlanDecision> {
        match (self.action, self.final_answer) {
            (Some(tool), _) if !tool.trim().is_empty() => Some(PlanDecision::Action {
                tool: tool.trim().to_string(),
                tool_input: self.action_input.unwrap_or_default(),
            }),
            (_, Some(output)) => Some(PlanDecision::Finish { output }),
            _ => None,
        }
    }
}

/// Parse a planner completion into a [`PlanDecision`].
pub fn parse_plan(completion: &str) -> Result<PlanDecision, ToolError> {
    let json = extract_json_from_completion(completion).map_err(|message| {
        ToolError::ParseFailed {
            source_name: "planner".to_string(),
            message,
        }
    })?;

    let reply: PlannerReply =
        serde_json::from_str(json).map_err(|e| ToolError::ParseFailed {
            source_name: "planner".to_string(),
            message: format!(
                "JSON parse error: {} | Response preview: {}",
                e,
                completion.chars().take(200).collect::<String>()
            ),
        })?;

    reply.into_decision().ok_or_else(|| ToolError::ParseFailed {
        source_name: "planner".to_string(),
        message: "reply names neither an action nor a final answer".to_string(),
    })
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Tries raw JSON first, then a ```json fenced block, then any fenced block.
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// [`CompletionOracle`] over the planner and answer pipes.
#[derive(Clone)]
pub struct LangbaseOracle {
    langbase: LangbaseClient,
    planner_pipe: String,
    answer_pipe: String,
}

impl LangbaseOracle {
    pub fn new(langbase: LangbaseClient, pipes: &PipeConfig) -> Self {
        Self {
            langbase,
            planner_pipe: pipes.planner.clone(),
            answer_pipe: pipes.answer.clone(),
        }
    }

    fn build_plan_messages(
        input: &str,
        history: &[Turn],
        intermediate_steps: &[AgentStep],
    ) -> Vec<Message> {
        let mut messages = Vec::new();

        for turn in history {
            messages.push(match turn.role {
                Role::User => Message::user(turn.text.clone()),
                Role::Assistant => Message::assistant(turn.text.clone()),
            });
        }

        if intermediate_steps.is_empty() {
            messages.push(Message::user(input.to_string()));
        } else {
            let steps: Vec<String> = intermediate_steps
                .iter()
                .map(|s| {
                    format!(
                        "Action: {}\nAction input: {}\nObservation: {}",
                        s.tool, s.tool_input, s.observation
                    )
                })
                .collect();
            messages.push(Message::user(format!(
                "{}\n\nSteps taken so far:\n{}",
                input,
                steps.join("\n\n")
            )));
        }

        messages
    }
}

#[async_trait]
impl CompletionOracle for LangbaseOracle {
    async fn plan(
        &self,
        input: &str,
        history: &[Turn],
        intermediate_steps: &[AgentStep],
    ) -> AppResult<PlanDecision> {
        let messages = Self::build_plan_messages(input, history, intermediate_steps);
        let request = PipeRequest::new(&self.planner_pipe, messages);
        let response = self.langbase.call_pipe(request).await?;

        debug!(completion_len = response.completion.len(), "Planner replied");

        parse_plan(&response.completion).map_err(|e| {
            warn!(error = %e, "Planner reply could not be parsed");
            e.into()
        })
    }

    async fn invoke(&self, input: &str) -> AppResult<String> {
        let request = PipeRequest::new(&self.answer_pipe, vec![Message::user(input.to_string())]);
        let response = self.langbase.call_pipe(request).await?;
        Ok(response.completion)
    }
}
