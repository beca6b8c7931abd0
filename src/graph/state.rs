//! Per-query state threaded through the routing graph.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::retrieval::RetrievedChunk;

/// Metadata key holding the retrieval confidence.
pub const CONFIDENCE_KEY: &str = "confidence";
/// Metadata key holding the dispatch edge chosen by the route node.
pub const NEXT_NODE_KEY: &str = "next_node";

/// Scalar metadata attached to a state.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Answer committed.
    Finalized,
    /// Waiting for a reviewer to approve or edit the text answer.
    PendingTextApproval,
    /// Waiting for a reviewer to approve or edit generated code.
    PendingCodeApproval,
}

/// State of one query's run through the graph.
///
/// Values are never mutated in place: every `with_*` method consumes the
/// state and returns the updated copy. The query is fixed at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryState {
    query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retrieved: Option<Vec<RetrievedChunk>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    intermediate_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    needs_text_approval: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    needs_code_approval: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected_tool: Option<String>,
}

impl QueryState {
    /// Fresh state for `query`.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn retrieved(&self) -> Option<&[RetrievedChunk]> {
        self.retrieved.as_deref()
    }

    pub fn intermediate_note(&self) -> Option<&str> {
        self.intermediate_note.as_deref()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn needs_text_approval(&self) -> bool {
        self.needs_text_approval.unwrap_or(false)
    }

    pub fn needs_code_approval(&self) -> bool {
        self.needs_code_approval.unwrap_or(false)
    }

    pub fn selected_tool(&self) -> Option<&str> {
        self.selected_tool.as_deref()
    }

    /// Retrieval confidence, if a retrieval node has run.
    pub fn confidence(&self) -> Option<f64> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(CONFIDENCE_KEY))
            .and_then(|v| v.as_f64())
    }

    /// Dispatch edge name recorded by the route node.
    pub fn next_node(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(NEXT_NODE_KEY))
            .and_then(|v| v.as_str())
    }

    /// Where this state stands once the graph has halted.
    pub fn status(&self) -> RunStatus {
        if self.needs_code_approval() {
            RunStatus::PendingCodeApproval
        } else if self.needs_text_approval() {
            RunStatus::PendingTextApproval
        } else {
            RunStatus::Finalized
        }
    }

    /// True while a reviewer still has to act.
    pub fn is_pending(&self) -> bool {
        self.status() != RunStatus::Finalized
    }

    pub fn with_retrieved(self, retrieved: Vec<RetrievedChunk>) -> Self {
        Self {
            retrieved: Some(retrieved),
            ..self
        }
    }

    pub fn with_intermediate_note(self, note: impl Into<String>) -> Self {
        Self {
            intermediate_note: Some(note.into()),
            ..self
        }
    }

    /// Copy with one metadata entry added or replaced.
    pub fn with_metadata(self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let mut metadata = self.metadata.clone().unwrap_or_default();
        metadata.insert(key.to_string(), value.into());
        Self {
            metadata: Some(metadata),
            ..self
        }
    }

    pub fn with_output(self, output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..self
        }
    }

    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
            ..self
        }
    }

    pub fn with_selected_tool(self, tool: Option<String>) -> Self {
        Self {
            selected_tool: tool,
            ..self
        }
    }

    /// Halt for text review. Clears any code review flag.
    pub fn with_text_approval_needed(self) -> Self {
        Self {
            needs_text_approval: Some(true),
            needs_code_approval: None,
            ..self
        }
    }

    /// Halt for code review. Clears any text review flag.
    pub fn with_code_approval_needed(self) -> Self {
        Self {
            needs_text_approval: None,
            needs_code_approval: Some(true),
            ..self
        }
    }

    /// Copy with both approval flags cleared.
    pub fn approved(self) -> Self {
        Self {
            needs_text_approval: None,
            needs_code_approval: None,
            ..self
        }
    }
}
