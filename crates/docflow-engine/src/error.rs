use docflow_types::{NodeError, PatchShapeError, PointerError};
use thiserror::Error;

use crate::gas::OutOfGas;

/// Errors returned to callers. Processing faults are reported inside the result instead.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("document is already initialized")]
    AlreadyInitialized,
    #[error("event encoding error: {0}")]
    Encoding(#[from] NodeError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("invalid pointer: {0}")]
    InvalidPointer(#[from] PointerError),
    #[error("malformed patch: {0}")]
    Shape(#[from] PatchShapeError),
    #[error("parent of '{0}' does not exist")]
    MissingParent(String),
    #[error("target '{0}' does not exist")]
    MissingTarget(String),
    #[error("index in '{0}' is out of range")]
    InvalidIndex(String),
    #[error("the document root cannot be removed")]
    CannotRemoveRoot,
    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] NodeError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("scope '{scope}': {source}")]
    Rejected {
        scope: String,
        source: docflow_types::ContractRejection,
    },
    #[error("scope '{scope}' declares contract key '{key}' twice")]
    DuplicateKey { scope: String, key: String },
    #[error("scope '{scope}': handler '{handler}' is bound to unknown channel '{channel}'")]
    UnknownChannel {
        scope: String,
        handler: String,
        channel: String,
    },
    #[error("scope '{scope}': reserved key '{key}' holds a {found} contract")]
    ReservedKeyMisuse {
        scope: String,
        key: String,
        found: String,
    },
    #[error("scope '{scope}' declares invalid embedded path '{path}'")]
    InvalidEmbeddedPath { scope: String, path: String },
    #[error("scope '{0}' is registered twice")]
    DuplicateScope(String),
    #[error("scope '{0}' is not a node in the document")]
    MissingScope(String),
}

impl RegistryError {
    /// Unknown contract types mean the document needs a capability this processor lacks.
    pub fn is_must_understand(&self) -> bool {
        matches!(
            self,
            RegistryError::Rejected {
                source: docflow_types::ContractRejection::UnknownType { .. },
                ..
            }
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("boundary violation: '{path}' is outside scope '{scope}'")]
pub struct BoundaryViolation {
    pub scope: String,
    pub path: String,
}

/// Failure raised by handler logic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("expression failed: {0}")]
    Evaluation(#[from] docflow_exec::EvalError),
    #[error(transparent)]
    OutOfGas(#[from] OutOfGas),
    #[error("invalid handler definition: {0}")]
    Invalid(String),
    #[error("invalid node produced: {0}")]
    Node(#[from] NodeError),
}
