//! Engine-owned marker storage under `<scope>/contracts/<reserved key>`.

use docflow_types::Node;
use docflow_types::pointer::{self, CONTRACTS_KEY};

/// The marker node stored under `key` in `scope`, if any.
pub fn read_marker<'d>(document: &'d Node, scope: &str, key: &str) -> Option<&'d Node> {
    document.get(scope)?.property(CONTRACTS_KEY)?.property(key)
}

/// Stores `marker` under `key` in `scope`, creating the `contracts` map when missing.
///
/// Returns false when the scope node itself no longer exists.
pub fn write_marker(document: &mut Node, scope: &str, key: &str, marker: Node) -> bool {
    let Some(scope_node) = document.get_mut(scope) else {
        log::warn!(
            "cannot store marker '{}': scope is gone",
            pointer::contract_path(scope, key)
        );
        return false;
    };
    if scope_node.property(CONTRACTS_KEY).is_none() {
        scope_node.set_property(CONTRACTS_KEY, Node::new());
    }
    match scope_node.property_mut(CONTRACTS_KEY) {
        Some(contracts) => {
            contracts.set_property(key, marker);
            true
        }
        None => false,
    }
}
