//! Handler processors shipped with the engine.

mod sequential_workflow;

pub use sequential_workflow::{
    COMPUTE_STEP, SequentialWorkflow, TERMINATE_STEP, TRIGGER_EVENT_STEP, UPDATE_DOCUMENT_STEP,
};
