use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl PatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOp::Add => "ADD",
            PatchOp::Replace => "REPLACE",
            PatchOp::Remove => "REMOVE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "ADD" => Some(PatchOp::Add),
            "REPLACE" => Some(PatchOp::Replace),
            "REMOVE" => Some(PatchOp::Remove),
            _ => None,
        }
    }
}

/// Wire form of a single document mutation: `{op, path, val?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonPatch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<Node>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchShapeError {
    #[error("{0:?} patch requires a value")]
    MissingValue(PatchOp),
    #[error("REMOVE patch must not carry a value")]
    UnexpectedValue,
}

impl JsonPatch {
    pub fn add(path: impl Into<String>, val: Node) -> Self {
        JsonPatch {
            op: PatchOp::Add,
            path: path.into(),
            val: Some(val),
        }
    }

    pub fn replace(path: impl Into<String>, val: Node) -> Self {
        JsonPatch {
            op: PatchOp::Replace,
            path: path.into(),
            val: Some(val),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        JsonPatch {
            op: PatchOp::Remove,
            path: path.into(),
            val: None,
        }
    }

    /// REMOVE carries no value; ADD and REPLACE carry exactly one.
    pub fn validate(&self) -> Result<(), PatchShapeError> {
        match (self.op, &self.val) {
            (PatchOp::Remove, Some(_)) => Err(PatchShapeError::UnexpectedValue),
            (PatchOp::Add | PatchOp::Replace, None) => Err(PatchShapeError::MissingValue(self.op)),
            _ => Ok(()),
        }
    }
}
