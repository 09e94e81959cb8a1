//! Type identities understood without any caller registration.

pub const DOCUMENT_UPDATE_CHANNEL: &str = "DocumentUpdateChannel";
pub const LIFECYCLE_CHANNEL: &str = "LifecycleChannel";
pub const TRIGGERED_EVENT_CHANNEL: &str = "TriggeredEventChannel";
pub const EMBEDDED_NODE_CHANNEL: &str = "EmbeddedNodeChannel";
pub const TIMELINE_CHANNEL: &str = "TimelineChannel";
pub const EVENT_CHANNEL: &str = "EventChannel";

pub const PROCESS_EMBEDDED: &str = "ProcessEmbedded";
pub const INITIALIZATION_MARKER: &str = "InitializationMarker";
pub const CHANNEL_EVENT_CHECKPOINT: &str = "ChannelEventCheckpoint";
pub const PROCESSING_FAILURE_MARKER: &str = "ProcessingFailureMarker";
pub const PROCESSING_TERMINATED_MARKER: &str = "ProcessingTerminatedMarker";

pub const SEQUENTIAL_WORKFLOW: &str = "SequentialWorkflow";

/// Event types synthesized by the engine.
pub const DOCUMENT_UPDATE_EVENT: &str = "Document Update";
pub const LIFECYCLE_INITIATED_EVENT: &str = "Document Processing Initiated";

/// Node type evaluated by the expression sandbox when it appears in workflow payloads.
pub const EXPRESSION: &str = "Expression";

pub const BUILTIN_CHANNELS: &[&str] = &[
    DOCUMENT_UPDATE_CHANNEL,
    LIFECYCLE_CHANNEL,
    TRIGGERED_EVENT_CHANNEL,
    EMBEDDED_NODE_CHANNEL,
    TIMELINE_CHANNEL,
    EVENT_CHANNEL,
];

pub const BUILTIN_MARKERS: &[&str] = &[
    PROCESS_EMBEDDED,
    INITIALIZATION_MARKER,
    CHANNEL_EVENT_CHECKPOINT,
    PROCESSING_FAILURE_MARKER,
    PROCESSING_TERMINATED_MARKER,
];

/// Channel kinds fed by the engine itself rather than by external events.
pub const PROCESSOR_MANAGED_CHANNELS: &[&str] = &[
    DOCUMENT_UPDATE_CHANNEL,
    LIFECYCLE_CHANNEL,
    TRIGGERED_EVENT_CHANNEL,
    EMBEDDED_NODE_CHANNEL,
];
