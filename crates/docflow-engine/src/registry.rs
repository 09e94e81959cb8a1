//! Contract discovery and per-scope bundles.

use indexmap::IndexMap;

use docflow_types::builtins::*;
use docflow_types::pointer::{self, CONTRACTS_KEY};
use docflow_types::{
    ChannelKind, Contract, ContractRejection, KnownTypes, MarkerKind, Node,
    validate_contract,
};

use crate::error::RegistryError;

/// Validated contracts of one scope, in declaration order.
#[derive(Debug, Clone)]
pub struct ContractBundle {
    scope_path: String,
    contracts: Vec<Contract>,
    embedded_paths: Vec<String>,
}

impl ContractBundle {
    pub fn new(scope_path: &str, contracts: Vec<Contract>) -> Result<Self, RegistryError> {
        let scope_path = pointer::normalize(scope_path).map_err(|_| {
            RegistryError::MissingScope(scope_path.to_string())
        })?;
        let mut seen: IndexMap<&str, &Contract> = IndexMap::new();
        for contract in &contracts {
            if seen.insert(contract.key.as_str(), contract).is_some() {
                return Err(RegistryError::DuplicateKey {
                    scope: scope_path,
                    key: contract.key.clone(),
                });
            }
            check_reserved_key(&scope_path, contract)?;
        }
        for contract in &contracts {
            if let Some(handler) = contract.handler() {
                let bound = seen.get(handler.channel.as_str());
                if !bound.is_some_and(|target| target.channel().is_some()) {
                    return Err(RegistryError::UnknownChannel {
                        scope: scope_path,
                        handler: contract.key.clone(),
                        channel: handler.channel.clone(),
                    });
                }
            }
        }

        let mut embedded_paths = Vec::new();
        for contract in &contracts {
            if let Some(MarkerKind::ProcessEmbedded { paths }) = contract.marker() {
                for relative in paths {
                    let absolute = pointer::resolve(&scope_path, relative)
                        .map_err(|_| RegistryError::InvalidEmbeddedPath {
                            scope: scope_path.clone(),
                            path: relative.clone(),
                        })?;
                    if absolute == scope_path || !pointer::is_within(&scope_path, &absolute) {
                        return Err(RegistryError::InvalidEmbeddedPath {
                            scope: scope_path,
                            path: relative.clone(),
                        });
                    }
                    if !embedded_paths.contains(&absolute) {
                        embedded_paths.push(absolute);
                    }
                }
            }
        }

        Ok(Self {
            scope_path,
            contracts,
            embedded_paths,
        })
    }

    pub fn scope_path(&self) -> &str {
        &self.scope_path
    }

    pub fn contract(&self, key: &str) -> Option<&Contract> {
        self.contracts.iter().find(|contract| contract.key == key)
    }

    pub fn contracts(&self) -> &[Contract] {
        &self.contracts
    }

    /// Channel contracts in execution order.
    pub fn channels(&self) -> Vec<&Contract> {
        let mut channels: Vec<&Contract> = self
            .contracts
            .iter()
            .filter(|contract| contract.channel().is_some())
            .collect();
        channels.sort_by(|a, b| a.cmp_order(b));
        channels
    }

    /// Channels that external events are tested against.
    pub fn external_channels(&self) -> Vec<&Contract> {
        self.channels()
            .into_iter()
            .filter(|contract| {
                contract
                    .channel()
                    .is_some_and(|channel| !channel.is_processor_managed())
            })
            .collect()
    }

    /// Channels of one processor-managed kind, e.g. all lifecycle channels.
    pub fn channels_of_type(&self, type_ref: &str) -> Vec<&Contract> {
        self.channels()
            .into_iter()
            .filter(|contract| {
                contract
                    .channel()
                    .is_some_and(|channel| channel.type_ref() == type_ref)
            })
            .collect()
    }

    /// Handlers bound to `channel_key`, in execution order.
    pub fn handlers_for(&self, channel_key: &str) -> Vec<&Contract> {
        let mut handlers: Vec<&Contract> = self
            .contracts
            .iter()
            .filter(|contract| {
                contract
                    .handler()
                    .is_some_and(|handler| handler.channel == channel_key)
            })
            .collect();
        handlers.sort_by(|a, b| a.cmp_order(b));
        handlers
    }

    /// Absolute paths of embedded child scopes, as declared.
    pub fn embedded_paths(&self) -> &[String] {
        &self.embedded_paths
    }

    /// Embedded-node channels that bridge events out of the child scope at `child_scope`.
    pub fn embedded_node_channels_for(&self, child_scope: &str) -> Vec<&Contract> {
        self.channels()
            .into_iter()
            .filter(|contract| match contract.channel() {
                Some(ChannelKind::EmbeddedNode { child_path }) => {
                    pointer::resolve(&self.scope_path, child_path)
                        .is_ok_and(|path| path == child_scope)
                }
                _ => false,
            })
            .collect()
    }
}

fn check_reserved_key(scope: &str, contract: &Contract) -> Result<(), RegistryError> {
    let expected = match contract.key.as_str() {
        pointer::EMBEDDED_KEY => PROCESS_EMBEDDED,
        pointer::INITIALIZED_KEY => INITIALIZATION_MARKER,
        pointer::TERMINATED_KEY => PROCESSING_TERMINATED_MARKER,
        pointer::CHECKPOINT_KEY => CHANNEL_EVENT_CHECKPOINT,
        pointer::FAILURE_KEY => PROCESSING_FAILURE_MARKER,
        _ => return Ok(()),
    };
    let found = contract.node.type_ref().unwrap_or_default();
    if found != expected {
        return Err(RegistryError::ReservedKeyMisuse {
            scope: scope.to_string(),
            key: contract.key.clone(),
            found: found.to_string(),
        });
    }
    Ok(())
}

/// Validates every contract stored under a scope node's `contracts` property.
pub fn contracts_at(scope_node: &Node, known: &KnownTypes) -> Result<Vec<Contract>, ContractRejection> {
    let Some(contracts) = scope_node.property(CONTRACTS_KEY) else {
        return Ok(Vec::new());
    };
    contracts
        .properties
        .iter()
        .enumerate()
        .map(|(index, (key, node))| validate_contract(key, index, node, known))
        .collect()
}

/// Every scope of a document, keyed by absolute path in discovery order (root first).
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    bundles: IndexMap<String, ContractBundle>,
    parents: IndexMap<String, String>,
}

impl ContractRegistry {
    /// Walks the document from the root, following process-embedded markers.
    pub fn build(document: &Node, known: &KnownTypes) -> Result<Self, RegistryError> {
        let mut registry = ContractRegistry::default();
        registry.discover(document, pointer::ROOT, None, known)?;
        Ok(registry)
    }

    fn discover(
        &mut self,
        document: &Node,
        scope: &str,
        parent: Option<&str>,
        known: &KnownTypes,
    ) -> Result<(), RegistryError> {
        let node = document
            .get(scope)
            .ok_or_else(|| RegistryError::MissingScope(scope.to_string()))?;
        let contracts = contracts_at(node, known).map_err(|source| RegistryError::Rejected {
            scope: scope.to_string(),
            source,
        })?;
        self.register_scope(scope, contracts, parent)?;
        let children = self
            .bundles
            .get(scope)
            .map(|bundle| bundle.embedded_paths().to_vec())
            .unwrap_or_default();
        for child in children {
            if self.bundles.contains_key(&child) || document.get(&child).is_none() {
                continue;
            }
            self.discover(document, &child, Some(scope), known)?;
        }
        Ok(())
    }

    /// Registers a scope from pre-indexed contracts.
    pub fn register_scope(
        &mut self,
        path: &str,
        contracts: Vec<Contract>,
        parent: Option<&str>,
    ) -> Result<(), RegistryError> {
        let bundle = ContractBundle::new(path, contracts)?;
        let scope_path = bundle.scope_path().to_string();
        if self.bundles.contains_key(&scope_path) {
            return Err(RegistryError::DuplicateScope(scope_path));
        }
        if let Some(parent) = parent {
            self.parents.insert(scope_path.clone(), parent.to_string());
        }
        self.bundles.insert(scope_path, bundle);
        Ok(())
    }

    pub fn bundle(&self, scope: &str) -> Option<&ContractBundle> {
        self.bundles.get(scope)
    }

    pub fn contains_scope(&self, scope: &str) -> bool {
        self.bundles.contains_key(scope)
    }

    pub fn parent_of(&self, scope: &str) -> Option<&str> {
        self.parents.get(scope).map(String::as_str)
    }

    /// Scope paths with the root first.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }

    /// Scope paths with every embedded child before its parent.
    pub fn scopes_children_first(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.bundles.len());
        if let Some(root) = self.bundles.keys().next() {
            self.post_order(root, &mut out);
        }
        out
    }

    fn post_order(&self, scope: &str, out: &mut Vec<String>) {
        for (child, parent) in &self.parents {
            if parent == scope {
                self.post_order(child, out);
            }
        }
        out.push(scope.to_string());
    }

    /// Parents first, then ancestors outward.
    pub fn ancestors(&self, scope: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = self.parent_of(scope);
        while let Some(parent) = current {
            out.push(parent.to_string());
            current = self.parent_of(parent);
        }
        out
    }
}
