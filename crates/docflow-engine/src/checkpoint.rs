//! Per-channel checkpoints kept in each scope's `checkpoint` marker.
//!
//! Checkpoint bookkeeping is not charged.

use docflow_types::pointer::CHECKPOINT_KEY;
use docflow_types::{CheckpointMarker, Node};

use crate::markers::{read_marker, write_marker};

pub struct CheckpointStore;

impl CheckpointStore {
    /// Reads the marker of `scope`. A missing or malformed marker reads as empty.
    pub fn load(document: &Node, scope: &str) -> CheckpointMarker {
        read_marker(document, scope, CHECKPOINT_KEY)
            .and_then(|node| CheckpointMarker::from_node(CHECKPOINT_KEY, node).ok())
            .unwrap_or_default()
    }

    /// Whether `channel_key` in `scope` already processed an event with `signature`.
    pub fn is_processed(document: &Node, scope: &str, channel_key: &str, signature: &str) -> bool {
        Self::load(document, scope).signature_for(channel_key) == Some(signature)
    }

    pub fn record(
        document: &mut Node,
        scope: &str,
        channel_key: &str,
        event: &Node,
        signature: &str,
    ) -> bool {
        let mut marker = Self::load(document, scope);
        marker.record(channel_key, event.clone(), signature.to_string());
        write_marker(document, scope, CHECKPOINT_KEY, marker.to_node())
    }
}
