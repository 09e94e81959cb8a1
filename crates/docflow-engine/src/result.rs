use serde::{Deserialize, Serialize};

use docflow_types::Node;

use crate::termination::TerminationSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCode {
    BoundaryViolation,
    PatchFailed,
    EvaluationFailed,
    HandlerFailed,
    MustUnderstand,
    IllegalState,
    OutOfGas,
    Cancelled,
    FatalTermination,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::BoundaryViolation => "BoundaryViolation",
            FailureCode::PatchFailed => "PatchFailed",
            FailureCode::EvaluationFailed => "EvaluationFailed",
            FailureCode::HandlerFailed => "HandlerFailed",
            FailureCode::MustUnderstand => "MustUnderstand",
            FailureCode::IllegalState => "IllegalState",
            FailureCode::OutOfGas => "OutOfGas",
            FailureCode::Cancelled => "Cancelled",
            FailureCode::FatalTermination => "FatalTermination",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub scope_path: String,
    pub code: FailureCode,
    pub reason: String,
    pub fatal: bool,
}

impl FailureRecord {
    pub fn scoped(scope_path: &str, code: FailureCode, reason: impl Into<String>) -> Self {
        Self {
            scope_path: scope_path.to_string(),
            code,
            reason: reason.into(),
            fatal: false,
        }
    }

    pub fn fatal(scope_path: &str, code: FailureCode, reason: impl Into<String>) -> Self {
        Self {
            fatal: true,
            ..Self::scoped(scope_path, code, reason)
        }
    }
}

/// Observable outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentProcessingResult {
    pub document: Node,
    pub triggered_events: Vec<Node>,
    pub total_gas: u64,
    pub terminated_scopes: Vec<TerminationSummary>,
    pub run_terminated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
}

impl DocumentProcessingResult {
    /// A run that did nothing.
    pub fn unchanged(document: Node, run_terminated: bool) -> Self {
        Self {
            document,
            triggered_events: Vec::new(),
            total_gas: 0,
            terminated_scopes: Vec::new(),
            run_terminated,
            failures: Vec::new(),
        }
    }

    pub fn fatal_failure(&self) -> Option<&FailureRecord> {
        self.failures.iter().find(|failure| failure.fatal)
    }
}
