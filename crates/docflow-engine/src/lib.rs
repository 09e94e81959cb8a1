//! Deterministic document processing: route events to contracts, commit patches under a gas budget.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod gas;
pub mod handler;
pub mod markers;
pub mod patch;
pub mod processor;
pub mod processors;
pub mod registry;
pub mod result;
pub mod router;
mod runtime;
pub mod scope;
pub mod termination;

pub use checkpoint::CheckpointStore;
pub use config::{CancelToken, ChannelHint, ProcessorConfig, RunOptions};
pub use error::{BoundaryViolation, HandlerError, PatchError, ProcessorError, RegistryError};
pub use gas::{GasLedger, OutOfGas};
pub use handler::{ChannelProcessor, Effect, HandlerContext, HandlerProcessor, HandlerProcessors};
pub use patch::{AppliedPatch, PatchEngine};
pub use processor::{DocumentProcessor, DocumentProcessorBuilder};
pub use processors::SequentialWorkflow;
pub use registry::{ContractBundle, ContractRegistry};
pub use result::{DocumentProcessingResult, FailureCode, FailureRecord};
pub use router::{ChannelProcessors, EventRouter};
pub use scope::ScopeResolver;
pub use termination::{TerminationStore, TerminationSummary};
