//! Workflow stages and progress reporting.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One phase of the adaptive research pipeline.
///
/// Stages run in declaration order; the chosen [`Strategy`](super::Strategy)
/// decides which of the middle stages participate. `Initialization` is always
/// first and `Completion` always last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Initialization,
    Discovery,
    Analysis,
    Extraction,
    Crawling,
    Synthesis,
    Validation,
    Completion,
}

impl WorkflowStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::Initialization => "initialization",
            WorkflowStage::Discovery => "discovery",
            WorkflowStage::Analysis => "analysis",
            WorkflowStage::Extraction => "extraction",
            WorkflowStage::Crawling => "crawling",
            WorkflowStage::Synthesis => "synthesis",
            WorkflowStage::Validation => "validation",
            WorkflowStage::Completion => "completion",
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Emitted on every stage transition.
///
/// `percent_complete` is `completed_stages / total_stages` for the strategy
/// in effect, so a shallow run reaches 100% in fewer steps than a deep one.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub stage: WorkflowStage,
    pub percent_complete: f32,
    pub message: String,
}
