//! Typed contract records and validation of raw contract nodes.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::builtins::*;
use crate::node::{Node, Scalar};
use crate::pointer;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractRejection {
    #[error("contract '{key}' has no type")]
    MissingType { key: String },
    #[error("contract '{key}' has unknown type '{type_ref}'")]
    UnknownType { key: String, type_ref: String },
    #[error("contract '{key}' is missing field '{field}'")]
    MissingField { key: String, field: &'static str },
    #[error("contract '{key}' field '{field}' must be {expected}")]
    InvalidField {
        key: String,
        field: &'static str,
        expected: &'static str,
    },
}

impl ContractRejection {
    pub fn key(&self) -> &str {
        match self {
            ContractRejection::MissingType { key }
            | ContractRejection::UnknownType { key, .. }
            | ContractRejection::MissingField { key, .. }
            | ContractRejection::InvalidField { key, .. } => key,
        }
    }
}

/// Handler and channel types a processor has been taught, besides the built-in ones.
#[derive(Debug, Clone, Default)]
pub struct KnownTypes {
    handlers: BTreeSet<String>,
    channels: BTreeSet<String>,
}

impl KnownTypes {
    /// Known types with the built-in handler registered.
    pub fn new() -> Self {
        KnownTypes::default().with_handler(SEQUENTIAL_WORKFLOW)
    }

    pub fn with_handler(mut self, type_ref: impl Into<String>) -> Self {
        self.handlers.insert(type_ref.into());
        self
    }

    pub fn with_channel(mut self, type_ref: impl Into<String>) -> Self {
        self.channels.insert(type_ref.into());
        self
    }

    pub fn insert_handler(&mut self, type_ref: impl Into<String>) {
        self.handlers.insert(type_ref.into());
    }

    pub fn insert_channel(&mut self, type_ref: impl Into<String>) {
        self.channels.insert(type_ref.into());
    }

    pub fn is_handler(&self, type_ref: &str) -> bool {
        self.handlers.contains(type_ref)
    }

    pub fn is_custom_channel(&self, type_ref: &str) -> bool {
        self.channels.contains(type_ref)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    DocumentUpdate { path: String },
    Lifecycle,
    TriggeredEvent,
    EmbeddedNode { child_path: String },
    Timeline { timeline_id: String },
    Event { event_type: Option<String> },
    Custom { type_ref: String },
}

impl ChannelKind {
    pub fn type_ref(&self) -> &str {
        match self {
            ChannelKind::DocumentUpdate { .. } => DOCUMENT_UPDATE_CHANNEL,
            ChannelKind::Lifecycle => LIFECYCLE_CHANNEL,
            ChannelKind::TriggeredEvent => TRIGGERED_EVENT_CHANNEL,
            ChannelKind::EmbeddedNode { .. } => EMBEDDED_NODE_CHANNEL,
            ChannelKind::Timeline { .. } => TIMELINE_CHANNEL,
            ChannelKind::Event { .. } => EVENT_CHANNEL,
            ChannelKind::Custom { type_ref } => type_ref,
        }
    }

    /// Channels fed by the engine are never matched against external events.
    pub fn is_processor_managed(&self) -> bool {
        PROCESSOR_MANAGED_CHANNELS.contains(&self.type_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationCause {
    Graceful,
    Fatal,
}

impl TerminationCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationCause::Graceful => "graceful",
            TerminationCause::Fatal => "fatal",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "graceful" => Some(TerminationCause::Graceful),
            "fatal" => Some(TerminationCause::Fatal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitializationMarker {
    pub document_id: Option<String>,
}

impl InitializationMarker {
    pub fn to_node(&self) -> Node {
        let mut node = Node::typed(INITIALIZATION_MARKER);
        if let Some(id) = &self.document_id {
            node.set_property("documentId", Node::scalar(id.as_str()));
        }
        node
    }
}

/// Per-channel record of the last processed event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointMarker {
    pub last_events: IndexMap<String, Node>,
    pub last_signatures: IndexMap<String, String>,
}

impl CheckpointMarker {
    pub fn signature_for(&self, channel_key: &str) -> Option<&str> {
        self.last_signatures.get(channel_key).map(String::as_str)
    }

    pub fn record(&mut self, channel_key: &str, event: Node, signature: String) {
        self.last_events.insert(channel_key.to_string(), event);
        self.last_signatures
            .insert(channel_key.to_string(), signature);
    }

    pub fn to_node(&self) -> Node {
        let mut events = Node::new();
        for (key, event) in &self.last_events {
            events.set_property(key.clone(), event.clone());
        }
        let mut signatures = Node::new();
        for (key, signature) in &self.last_signatures {
            signatures.set_property(key.clone(), Node::scalar(signature.as_str()));
        }
        Node::typed(CHANNEL_EVENT_CHECKPOINT)
            .with_property("lastEvents", events)
            .with_property("lastSignatures", signatures)
    }

    pub fn from_node(key: &str, node: &Node) -> Result<Self, ContractRejection> {
        let mut marker = CheckpointMarker::default();
        if let Some(events) = node.property("lastEvents") {
            for (channel, event) in &events.properties {
                marker.last_events.insert(channel.clone(), event.clone());
            }
        }
        if let Some(signatures) = node.property("lastSignatures") {
            for (channel, signature) in &signatures.properties {
                let text = signature
                    .as_text()
                    .ok_or_else(|| ContractRejection::InvalidField {
                        key: key.to_string(),
                        field: "lastSignatures",
                        expected: "a map of strings",
                    })?;
                marker
                    .last_signatures
                    .insert(channel.clone(), text.to_string());
            }
        }
        Ok(marker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureMarker {
    pub code: String,
    pub reason: Option<String>,
}

impl FailureMarker {
    pub fn to_node(&self) -> Node {
        let mut node =
            Node::typed(PROCESSING_FAILURE_MARKER).with_property("code", Node::scalar(self.code.as_str()));
        if let Some(reason) = &self.reason {
            node.set_property("reason", Node::scalar(reason.as_str()));
        }
        node
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationMarker {
    pub cause: TerminationCause,
    pub reason: Option<String>,
}

impl TerminationMarker {
    pub fn to_node(&self) -> Node {
        let mut node = Node::typed(PROCESSING_TERMINATED_MARKER)
            .with_property("cause", Node::scalar(self.cause.as_str()));
        if let Some(reason) = &self.reason {
            node.set_property("reason", Node::scalar(reason.as_str()));
        }
        node
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKind {
    ProcessEmbedded { paths: Vec<String> },
    Initialization(InitializationMarker),
    Checkpoint(CheckpointMarker),
    ProcessingFailure(FailureMarker),
    ProcessingTerminated(TerminationMarker),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerContract {
    pub type_ref: String,
    /// Key of the channel contract in the same scope.
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractKind {
    Channel(ChannelKind),
    Handler(HandlerContract),
    Marker(MarkerKind),
}

/// A validated contract with its position in the declaring scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub key: String,
    pub order: i64,
    /// Declaration index inside the scope's `contracts` map.
    pub index: usize,
    pub kind: ContractKind,
    pub node: Node,
}

impl Contract {
    pub fn channel(&self) -> Option<&ChannelKind> {
        match &self.kind {
            ContractKind::Channel(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn handler(&self) -> Option<&HandlerContract> {
        match &self.kind {
            ContractKind::Handler(handler) => Some(handler),
            _ => None,
        }
    }

    pub fn marker(&self) -> Option<&MarkerKind> {
        match &self.kind {
            ContractKind::Marker(marker) => Some(marker),
            _ => None,
        }
    }

    /// Deterministic execution order: explicit `order` first, then declaration order.
    pub fn cmp_order(&self, other: &Contract) -> Ordering {
        (self.order, self.index).cmp(&(other.order, other.index))
    }
}

/// Classifies a raw contract node by its type identity.
pub fn validate_contract(
    key: &str,
    index: usize,
    node: &Node,
    known: &KnownTypes,
) -> Result<Contract, ContractRejection> {
    let type_ref = node
        .type_ref()
        .ok_or_else(|| ContractRejection::MissingType {
            key: key.to_string(),
        })?;
    let order = match node.property("order") {
        None => 0,
        Some(value) => value.as_i64().ok_or_else(|| ContractRejection::InvalidField {
            key: key.to_string(),
            field: "order",
            expected: "an integer",
        })?,
    };
    let fields = Fields { key, node };
    let kind = match type_ref {
        DOCUMENT_UPDATE_CHANNEL => ContractKind::Channel(ChannelKind::DocumentUpdate {
            path: fields.pointer("path")?,
        }),
        LIFECYCLE_CHANNEL => ContractKind::Channel(ChannelKind::Lifecycle),
        TRIGGERED_EVENT_CHANNEL => ContractKind::Channel(ChannelKind::TriggeredEvent),
        EMBEDDED_NODE_CHANNEL => ContractKind::Channel(ChannelKind::EmbeddedNode {
            child_path: fields.pointer("childPath")?,
        }),
        TIMELINE_CHANNEL => ContractKind::Channel(ChannelKind::Timeline {
            timeline_id: fields.text("timelineId")?.to_string(),
        }),
        EVENT_CHANNEL => ContractKind::Channel(ChannelKind::Event {
            event_type: fields.optional_text("eventType")?,
        }),
        PROCESS_EMBEDDED => {
            let list = fields.required("paths")?;
            let items = list.items.as_ref().ok_or_else(|| fields.invalid("paths", "a list"))?;
            let mut paths = Vec::with_capacity(items.len());
            for item in items {
                let raw = item
                    .as_text()
                    .ok_or_else(|| fields.invalid("paths", "a list of pointers"))?;
                paths.push(
                    pointer::normalize(raw)
                        .map_err(|_| fields.invalid("paths", "a list of pointers"))?,
                );
            }
            ContractKind::Marker(MarkerKind::ProcessEmbedded { paths })
        }
        INITIALIZATION_MARKER => ContractKind::Marker(MarkerKind::Initialization(
            InitializationMarker {
                document_id: fields.optional_text("documentId")?,
            },
        )),
        CHANNEL_EVENT_CHECKPOINT => {
            ContractKind::Marker(MarkerKind::Checkpoint(CheckpointMarker::from_node(key, node)?))
        }
        PROCESSING_FAILURE_MARKER => {
            ContractKind::Marker(MarkerKind::ProcessingFailure(FailureMarker {
                code: fields.text("code")?.to_string(),
                reason: fields.optional_text("reason")?,
            }))
        }
        PROCESSING_TERMINATED_MARKER => {
            let cause = TerminationCause::parse(fields.text("cause")?)
                .ok_or_else(|| fields.invalid("cause", "'graceful' or 'fatal'"))?;
            ContractKind::Marker(MarkerKind::ProcessingTerminated(TerminationMarker {
                cause,
                reason: fields.optional_text("reason")?,
            }))
        }
        other if known.is_handler(other) => ContractKind::Handler(HandlerContract {
            type_ref: other.to_string(),
            channel: fields.text("channel")?.to_string(),
        }),
        other if known.is_custom_channel(other) => ContractKind::Channel(ChannelKind::Custom {
            type_ref: other.to_string(),
        }),
        other => {
            return Err(ContractRejection::UnknownType {
                key: key.to_string(),
                type_ref: other.to_string(),
            });
        }
    };
    Ok(Contract {
        key: key.to_string(),
        order,
        index,
        kind,
        node: node.clone(),
    })
}

struct Fields<'a> {
    key: &'a str,
    node: &'a Node,
}

impl<'a> Fields<'a> {
    fn invalid(&self, field: &'static str, expected: &'static str) -> ContractRejection {
        ContractRejection::InvalidField {
            key: self.key.to_string(),
            field,
            expected,
        }
    }

    fn required(&self, field: &'static str) -> Result<&'a Node, ContractRejection> {
        self.node
            .property(field)
            .ok_or_else(|| ContractRejection::MissingField {
                key: self.key.to_string(),
                field,
            })
    }

    fn text(&self, field: &'static str) -> Result<&'a str, ContractRejection> {
        self.required(field)?
            .as_text()
            .ok_or_else(|| self.invalid(field, "a string"))
    }

    fn optional_text(&self, field: &'static str) -> Result<Option<String>, ContractRejection> {
        match self.node.property(field) {
            None => Ok(None),
            Some(node) if node.value == Some(Scalar::Null) => Ok(None),
            Some(node) => node
                .as_text()
                .map(|text| Some(text.to_string()))
                .ok_or_else(|| self.invalid(field, "a string")),
        }
    }

    fn pointer(&self, field: &'static str) -> Result<String, ContractRejection> {
        pointer::normalize(self.text(field)?).map_err(|_| self.invalid(field, "a pointer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(json: serde_json::Value) -> Node {
        Node::from_json(&json).unwrap()
    }

    #[test]
    fn classifies_builtin_channels_and_markers() {
        let known = KnownTypes::new();
        let update = validate_contract(
            "watch",
            0,
            &node(json!({"type": "DocumentUpdateChannel", "path": "counter"})),
            &known,
        )
        .unwrap();
        assert_eq!(
            update.channel(),
            Some(&ChannelKind::DocumentUpdate {
                path: "/counter".into()
            })
        );
        assert!(update.channel().unwrap().is_processor_managed());

        let embedded = validate_contract(
            "embedded",
            1,
            &node(json!({"type": "ProcessEmbedded", "paths": ["/a", "b"]})),
            &known,
        )
        .unwrap();
        assert_eq!(
            embedded.marker(),
            Some(&MarkerKind::ProcessEmbedded {
                paths: vec!["/a".into(), "/b".into()]
            })
        );
    }

    #[test]
    fn handlers_require_registration_and_channel() {
        let known = KnownTypes::new();
        let workflow = validate_contract(
            "h",
            2,
            &node(json!({"type": "SequentialWorkflow", "channel": "inc", "order": -1})),
            &known,
        )
        .unwrap();
        assert_eq!(workflow.order, -1);
        assert_eq!(workflow.handler().map(|h| h.channel.as_str()), Some("inc"));

        let missing = validate_contract("h", 0, &node(json!({"type": "SequentialWorkflow"})), &known);
        assert!(matches!(
            missing,
            Err(ContractRejection::MissingField { field: "channel", .. })
        ));

        let unknown = validate_contract("x", 0, &node(json!({"type": "Mystery"})), &known);
        assert!(matches!(unknown, Err(ContractRejection::UnknownType { .. })));

        let custom = KnownTypes::new().with_channel("Webhook");
        let channel = validate_contract("hook", 0, &node(json!({"type": "Webhook"})), &custom).unwrap();
        assert_eq!(
            channel.channel(),
            Some(&ChannelKind::Custom {
                type_ref: "Webhook".into()
            })
        );
    }

    #[test]
    fn rejects_bad_field_types() {
        let known = KnownTypes::new();
        let bad_order = validate_contract(
            "c",
            0,
            &node(json!({"type": "LifecycleChannel", "order": "first"})),
            &known,
        );
        assert!(matches!(
            bad_order,
            Err(ContractRejection::InvalidField { field: "order", .. })
        ));
        let bad_cause = validate_contract(
            "terminated",
            0,
            &node(json!({"type": "ProcessingTerminatedMarker", "cause": "bored"})),
            &known,
        );
        assert!(matches!(
            bad_cause,
            Err(ContractRejection::InvalidField { field: "cause", .. })
        ));
        assert!(matches!(
            validate_contract("n", 0, &node(json!({"path": "/x"})), &known),
            Err(ContractRejection::MissingType { .. })
        ));
    }

    #[test]
    fn checkpoint_marker_round_trips_through_nodes() {
        let mut marker = CheckpointMarker::default();
        marker.record("inc", node(json!({"key": 1})), "sha256:abc".into());
        let as_node = marker.to_node();
        let contract =
            validate_contract("checkpoint", 0, &as_node, &KnownTypes::new()).unwrap();
        assert_eq!(
            contract.marker(),
            Some(&MarkerKind::Checkpoint(marker.clone()))
        );
        assert_eq!(marker.signature_for("inc"), Some("sha256:abc"));
    }

    #[test]
    fn ordering_uses_order_then_declaration_index() {
        let known = KnownTypes::new();
        let a = validate_contract(
            "a",
            0,
            &node(json!({"type": "SequentialWorkflow", "channel": "c", "order": 5})),
            &known,
        )
        .unwrap();
        let b = validate_contract(
            "b",
            1,
            &node(json!({"type": "SequentialWorkflow", "channel": "c"})),
            &known,
        )
        .unwrap();
        assert_eq!(b.cmp_order(&a), Ordering::Less);
    }
}
