//! Document data model: nodes, pointers, patches and contract records.

pub mod builtins;
pub mod contract;
mod node;
mod patch;
pub mod pointer;
pub mod schemas;

pub use contract::{
    ChannelKind, CheckpointMarker, Contract, ContractKind, ContractRejection, FailureMarker,
    HandlerContract, InitializationMarker, KnownTypes, MarkerKind, TerminationCause,
    TerminationMarker, validate_contract,
};
pub use node::{ITEMS_KEY, Node, NodeError, Scalar, TYPE_KEY, VALUE_KEY};
pub use patch::{JsonPatch, PatchOp, PatchShapeError};
pub use pointer::PointerError;

#[cfg(test)]
mod tests;
