//! Dry-run tool planning.
//!
//! The planner asks the oracle which tool it *would* call for a query and
//! maps the answer onto the closed [`ToolId`] set. Nothing is executed.
//! Planning never fails: oracle errors and unknown tool names both become
//! [`PlanResult::NoToolSelected`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::memory::{ConversationMemory, Role};
use crate::oracle::{CompletionOracle, PlanDecision};

/// The tools a query can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    /// Academic regulations retrieval.
    RegulationsRetriever,
    /// Campus calendar retrieval.
    CalendarRetriever,
    /// Student records table.
    StudentDataTool,
    /// Current date and time.
    ClockTool,
}

impl ToolId {
    /// All tools, in catalogue order.
    pub const ALL: [ToolId; 4] = [
        ToolId::RegulationsRetriever,
        ToolId::CalendarRetriever,
        ToolId::StudentDataTool,
        ToolId::ClockTool,
    ];

    /// Snake-case identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolId::RegulationsRetriever => "regulations_retriever",
            ToolId::CalendarRetriever => "calendar_retriever",
            ToolId::StudentDataTool => "student_data_tool",
            ToolId::ClockTool => "clock_tool",
        }
    }

    /// Name the planner sees in its tool catalogue
    pub fn display_name(&self) -> &'static str {
        match self {
            ToolId::RegulationsRetriever => "University regulations retriever",
            ToolId::CalendarRetriever => "Calendar events retriever",
            ToolId::StudentDataTool => "Student data table tool",
            ToolId::ClockTool => "Current date and time tool",
        }
    }

    /// Match a planner-supplied name, case-insensitively, against display
    /// names and snake-case ids.
    pub fn from_name(name: &str) -> Option<ToolId> {
        let wanted = name.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        Self::ALL.into_iter().find(|tool| {
            tool.display_name().eq_ignore_ascii_case(wanted)
                || tool.as_str().eq_ignore_ascii_case(wanted)
        })
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Outcome of dry-run planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "tool", rename_all = "snake_case")]
pub enum PlanResult {
    /// Answer directly, no retrieval.
    NoToolSelected,
    /// Route through the named tool.
    ToolSelected(ToolId),
}

impl PlanResult {
    /// The selected tool, if any.
    pub fn tool(&self) -> Option<ToolId> {
        match self {
            PlanResult::NoToolSelected => None,
            PlanResult::ToolSelected(tool) => Some(*tool),
        }
    }
}

impl From<&PlanDecision> for PlanResult {
    fn from(decision: &PlanDecision) -> Self {
        match decision {
            PlanDecision::Finish { .. } => PlanResult::NoToolSelected,
            PlanDecision::Action { tool, .. } => match ToolId::from_name(tool) {
                Some(id) => PlanResult::ToolSelected(id),
                None => {
                    warn!(tool = %tool, "Planner named an unknown tool, answering directly");
                    PlanResult::NoToolSelected
                }
            },
        }
    }
}

/// Selects at most one tool per query.
#[derive(Clone)]
pub struct ToolPlanner {
    oracle: Arc<dyn CompletionOracle>,
}

impl ToolPlanner {
    pub fn new(oracle: Arc<dyn CompletionOracle>) -> Self {
        Self { oracle }
    }

    /// Plan a query against the conversation so far.
    ///
    /// A trailing user turn equal to `query` is the query itself and is not
    /// sent as history.
    pub async fn plan(&self, query: &str, history: &ConversationMemory) -> PlanResult {
        let turns = match history.turns().split_last() {
            Some((last, earlier)) if last.role == Role::User && last.text == query => earlier,
            _ => history.turns(),
        };

        match self.oracle.plan(query, turns, &[]).await {
            Ok(decision) => {
                let result = PlanResult::from(&decision);
                info!(plan = ?result, "Planned tool use");
                result
            }
            Err(e) => {
                warn!(error = %e, "Planning failed, answering directly");
                PlanResult::NoToolSelected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, LangbaseError};
    use crate::memory::Turn;
    use crate::oracle::MockCompletionOracle;

    fn planner_returning(decision: PlanDecision) -> ToolPlanner {
        let mut oracle = MockCompletionOracle::new();
        oracle
            .expect_plan()
            .times(1)
            .returning(move |_, _, _| Ok(decision.clone()));
        ToolPlanner::new(Arc::new(oracle))
    }

    #[test]
    fn test_tool_from_display_name() {
        for tool in ToolId::ALL {
            assert_eq!(ToolId::from_name(tool.display_name()), Some(tool));
            assert_eq!(ToolId::from_name(tool.as_str()), Some(tool));
        }
    }

    #[test]
    fn test_tool_from_name_is_lenient_about_case_and_quotes() {
        assert_eq!(
            ToolId::from_name("  \"calendar EVENTS retriever\" "),
            Some(ToolId::CalendarRetriever)
        );
    }

    #[test]
    fn test_tool_from_unknown_name() {
        assert_eq!(ToolId::from_name("Weather tool"), None);
        assert_eq!(ToolId::from_name(""), None);
    }

    #[test]
    fn test_plan_result_from_unknown_action_is_no_tool() {
        let decision = PlanDecision::Action {
            tool: "Library catalogue".to_string(),
            tool_input: String::new(),
        };
        assert_eq!(PlanResult::from(&decision), PlanResult::NoToolSelected);
    }

    #[test]
    fn test_plan_result_serialization() {
        let json = serde_json::to_string(&PlanResult::ToolSelected(ToolId::ClockTool)).unwrap();
        assert_eq!(json, r#"{"kind":"tool_selected","tool":"clock_tool"}"#);
    }

    #[tokio::test]
    async fn test_plan_selects_tool() {
        let planner = planner_returning(PlanDecision::Action {
            tool: "University regulations retriever".to_string(),
            tool_input: "exam retakes".to_string(),
        });
        let result = planner
            .plan("How many exam retakes are allowed?", &ConversationMemory::new())
            .await;
        assert_eq!(result, PlanResult::ToolSelected(ToolId::RegulationsRetriever));
    }

    #[tokio::test]
    async fn test_plan_finish_means_no_tool() {
        let planner = planner_returning(PlanDecision::Finish {
            output: "Hi there".to_string(),
        });
        let result = planner.plan("hello", &ConversationMemory::new()).await;
        assert_eq!(result, PlanResult::NoToolSelected);
    }

    #[tokio::test]
    async fn test_plan_fails_open_on_oracle_error() {
        let mut oracle = MockCompletionOracle::new();
        oracle.expect_plan().returning(|_, _, _| {
            Err(AppError::Langbase(LangbaseError::Timeout { timeout_ms: 10 }))
        });
        let planner = ToolPlanner::new(Arc::new(oracle));

        let result = planner.plan("anything", &ConversationMemory::new()).await;
        assert_eq!(result, PlanResult::NoToolSelected);
    }

    #[tokio::test]
    async fn test_plan_passes_history_and_no_steps() {
        let mut oracle = MockCompletionOracle::new();
        oracle
            .expect_plan()
            .withf(|input, history, steps| {
                input.to_string() == "and after that?" && history.len() == 2 && steps.is_empty()
            })
            .returning(|_, _, _| {
                Ok(PlanDecision::Finish {
                    output: String::new(),
                })
            });
        let planner = ToolPlanner::new(Arc::new(oracle));

        let mut memory = ConversationMemory::new();
        memory.push(Turn::user("what is on monday?"));
        memory.push(Turn::assistant("a lecture"));

        assert_eq!(
            planner.plan("and after that?", &memory).await,
            PlanResult::NoToolSelected
        );
    }

    #[tokio::test]
    async fn test_plan_drops_the_just_recorded_query_from_history() {
        let mut oracle = MockCompletionOracle::new();
        oracle
            .expect_plan()
            .withf(|_, history, _| history.len() == 2)
            .returning(|_, _, _| {
                Ok(PlanDecision::Finish {
                    output: String::new(),
                })
            });
        let planner = ToolPlanner::new(Arc::new(oracle));

        let mut memory = ConversationMemory::new();
        memory.push(Turn::user("what is on monday?"));
        memory.push(Turn::assistant("a lecture"));
        memory.push(Turn::user("and after that?"));

        planner.plan("and after that?", &memory).await;
    }
}
