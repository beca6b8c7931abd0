//! Dispatch from a plan to the graph's first working node.

use serde::{Deserialize, Serialize};

use crate::planner::{PlanResult, ToolId};

/// The five successors of the route node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    RegulationsRetrieval,
    CalendarRetrieval,
    CodeReview,
    /// Terminal: answer with the current timestamp.
    Clock,
    DirectAnswer,
}

impl Edge {
    pub const ALL: [Edge; 5] = [
        Edge::RegulationsRetrieval,
        Edge::CalendarRetrieval,
        Edge::CodeReview,
        Edge::Clock,
        Edge::DirectAnswer,
    ];

    /// Name stored under the `next_node` metadata key
    pub fn as_str(&self) -> &'static str {
        match self {
            Edge::RegulationsRetrieval => "regulations_retrieval",
            Edge::CalendarRetrieval => "calendar_retrieval",
            Edge::CodeReview => "code_review",
            Edge::Clock => "clock",
            Edge::DirectAnswer => "direct_answer",
        }
    }

    /// Read an edge back from metadata. Missing or unknown names mean
    /// [`Edge::DirectAnswer`].
    pub fn from_metadata(name: Option<&str>) -> Edge {
        name.and_then(|n| Self::ALL.into_iter().find(|e| e.as_str() == n))
            .unwrap_or(Edge::DirectAnswer)
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Total mapping from plan to edge.
pub fn dispatch(plan: &PlanResult) -> Edge {
    match plan {
        PlanResult::ToolSelected(ToolId::RegulationsRetriever) => Edge::RegulationsRetrieval,
        PlanResult::ToolSelected(ToolId::CalendarRetriever) => Edge::CalendarRetrieval,
        PlanResult::ToolSelected(ToolId::StudentDataTool) => Edge::CodeReview,
        PlanResult::ToolSelected(ToolId::ClockTool) => Edge::Clock,
        PlanResult::NoToolSelected => Edge::DirectAnswer,
    }
}
