//! Scope termination markers and the summaries reported in run results.

use serde::{Deserialize, Serialize};

use docflow_types::pointer::{self, FAILURE_KEY, TERMINATED_KEY};
use docflow_types::{FailureMarker, Node, TerminationCause, TerminationMarker};

use crate::markers::{read_marker, write_marker};
use crate::registry::ContractRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationSummary {
    pub scope_path: String,
    pub kind: TerminationCause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct TerminationStore;

impl TerminationStore {
    /// Cause recorded by a persisted termination marker of `scope`.
    pub fn persisted(document: &Node, scope: &str) -> Option<TerminationCause> {
        read_marker(document, scope, TERMINATED_KEY)
            .and_then(|marker| marker.text_property("cause"))
            .and_then(TerminationCause::parse)
    }

    /// A scope is inactive once it, or any scope enclosing it, carries a termination marker.
    pub fn is_terminated(document: &Node, registry: &ContractRegistry, scope: &str) -> bool {
        if Self::persisted(document, scope).is_some() {
            return true;
        }
        registry
            .ancestors(scope)
            .iter()
            .any(|ancestor| Self::persisted(document, ancestor).is_some())
    }

    pub fn mark_terminated(
        document: &mut Node,
        scope: &str,
        cause: TerminationCause,
        reason: Option<String>,
    ) -> TerminationSummary {
        let marker = TerminationMarker {
            cause,
            reason: reason.clone(),
        };
        write_marker(document, scope, TERMINATED_KEY, marker.to_node());
        TerminationSummary {
            scope_path: pointer::normalize(scope).unwrap_or_else(|_| scope.to_string()),
            kind: cause,
            reason,
        }
    }

    pub fn mark_failed(document: &mut Node, scope: &str, code: &str, reason: &str) {
        let marker = FailureMarker {
            code: code.to_string(),
            reason: Some(reason.to_string()),
        };
        write_marker(document, scope, FAILURE_KEY, marker.to_node());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_types::KnownTypes;
    use serde_json::json;

    #[test]
    fn termination_is_inherited_by_embedded_scopes() {
        let mut document = Node::from_json(&json!({
            "contracts": {"embedded": {"type": "ProcessEmbedded", "paths": ["/a"]}},
            "a": {}
        }))
        .unwrap();
        let registry = ContractRegistry::build(&document, &KnownTypes::new()).unwrap();
        assert!(!TerminationStore::is_terminated(&document, &registry, "/a"));

        let summary = TerminationStore::mark_terminated(
            &mut document,
            "/",
            TerminationCause::Graceful,
            Some("done".into()),
        );
        assert_eq!(summary.scope_path, "/");
        assert_eq!(
            TerminationStore::persisted(&document, "/"),
            Some(TerminationCause::Graceful)
        );
        assert!(TerminationStore::is_terminated(&document, &registry, "/a"));
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({"scopePath": "/", "kind": "graceful", "reason": "done"})
        );
    }

    #[test]
    fn failure_marker_shape() {
        let mut document = Node::new();
        TerminationStore::mark_failed(&mut document, "/", "PatchFailed", "missing parent");
        assert_eq!(
            document.get("/contracts/failure").unwrap().to_json(),
            json!({
                "type": "ProcessingFailureMarker",
                "code": "PatchFailed",
                "reason": "missing parent"
            })
        );
    }
}
