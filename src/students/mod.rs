//! Structured student data: the guarded tabular store behind the student data tool.
//!
//! Every request passes a SAFE/MODIFY classifier before it reaches the
//! executor ([`guarded_execute`]). Requests labelled MODIFY are refused with
//! [`MODIFICATION_REFUSAL`].

mod agent;

pub use agent::SqlStudentAgent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppResult;
use crate::oracle::AgentStep;
use crate::prompts::MODIFICATION_REFUSAL;

/// Guard verdict for a student data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    /// Read-only.
    Safe,
    /// Would change the table.
    Modify,
}

impl Classification {
    /// Parse a classifier reply. Anything that is not clearly SAFE is MODIFY.
    pub fn parse(reply: &str) -> Self {
        let upper = reply.to_ascii_uppercase();
        if upper.contains("MODIFY") || upper.contains("UNSAFE") {
            Classification::Modify
        } else if upper.contains("SAFE") {
            Classification::Safe
        } else {
            Classification::Modify
        }
    }
}

/// What the student data agent produced for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    /// Narrative answer.
    pub output: String,
    /// Actions taken, in order.
    pub intermediate_steps: Vec<AgentStep>,
}

impl AgentRun {
    /// Input of the last action, i.e. the last generated code fragment.
    pub fn last_code(&self) -> Option<&str> {
        self.intermediate_steps.last().map(|s| s.tool_input.as_str())
    }
}

/// A tabular store of student records with an agent that answers questions over it.
#[async_trait]
pub trait StructuredDataStore: Send + Sync {
    /// Label a request SAFE or MODIFY.
    async fn classify(&self, query: &str) -> AppResult<Classification>;

    /// Answer a request. Callers go through [`guarded_execute`].
    async fn execute(&self, query: &str) -> AppResult<AgentRun>;
}

/// Result of a guarded execution.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome {
    /// Classified SAFE and executed.
    Executed(AgentRun),
    /// Classified MODIFY; carries the fixed refusal text.
    Refused(String),
}

/// Classify `query` and execute it only when it is SAFE.
pub async fn guarded_execute(
    store: &dyn StructuredDataStore,
    query: &str,
) -> AppResult<GuardOutcome> {
    match store.classify(query).await? {
        Classification::Safe => {
            info!("Student data request classified SAFE");
            Ok(GuardOutcome::Executed(store.execute(query).await?))
        }
        Classification::Modify => {
            warn!("Student data request classified MODIFY, refusing");
            Ok(GuardOutcome::Refused(MODIFICATION_REFUSAL.to_string()))
        }
    }
}
