use docflow_types::pointer;

use crate::error::BoundaryViolation;
use crate::registry::{ContractBundle, ContractRegistry};

/// Maps document paths to scopes and enforces mutation boundaries.
pub struct ScopeResolver<'r> {
    registry: &'r ContractRegistry,
}

impl<'r> ScopeResolver<'r> {
    pub fn new(registry: &'r ContractRegistry) -> Self {
        Self { registry }
    }

    /// The innermost registered scope containing `path`.
    pub fn resolve_scope(&self, path: &str) -> Result<&'r ContractBundle, BoundaryViolation> {
        let normalized = pointer::normalize(path).map_err(|_| BoundaryViolation {
            scope: pointer::ROOT.to_string(),
            path: path.to_string(),
        })?;
        self.registry
            .scopes()
            .filter(|scope| pointer::is_within(scope, &normalized))
            .max_by_key(|scope| pointer::depth(scope))
            .and_then(|scope| self.registry.bundle(scope))
            .ok_or(BoundaryViolation {
                scope: pointer::ROOT.to_string(),
                path: normalized,
            })
    }

    /// The scope registered exactly at `path`.
    pub fn scope(&self, path: &str) -> Result<&'r ContractBundle, BoundaryViolation> {
        let normalized = pointer::normalize(path).unwrap_or_else(|_| path.to_string());
        self.registry
            .bundle(&normalized)
            .ok_or_else(|| BoundaryViolation {
                scope: pointer::ROOT.to_string(),
                path: path.to_string(),
            })
    }

    /// Scopes whose subtree contains `path`, outermost first.
    pub fn scopes_containing(&self, path: &str) -> Vec<&'r str> {
        let mut scopes: Vec<&str> = self
            .registry
            .scopes()
            .filter(|scope| pointer::is_within(scope, path))
            .collect();
        scopes.sort_by_key(|scope| pointer::depth(scope));
        scopes
    }

    /// A handler in `scope` may write strictly below its scope root, including inside embedded
    /// children, but never into engine-owned contract storage.
    ///
    /// Storage is also protected from above: a target may not be a registered scope's `contracts`
    /// map or any ancestor of one, since writing there replaces the reserved slots wholesale.
    pub fn check_boundary(&self, scope: &str, target: &str) -> Result<(), BoundaryViolation> {
        let violation = || BoundaryViolation {
            scope: scope.to_string(),
            path: target.to_string(),
        };
        let target = pointer::normalize(target).map_err(|_| violation())?;
        if target == scope || !pointer::is_within(scope, &target) {
            return Err(violation());
        }
        if pointer::reserved_storage(&target).is_some() {
            return Err(violation());
        }
        let covers_storage = self
            .registry
            .scopes()
            .any(|registered| pointer::is_within(&target, &pointer::contracts_map(registered)));
        if covers_storage {
            return Err(violation());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_types::{KnownTypes, Node};
    use serde_json::json;

    fn registry() -> ContractRegistry {
        let document = Node::from_json(&json!({
            "contracts": {"embedded": {"type": "ProcessEmbedded", "paths": ["/a"]}},
            "a": {"child": {}},
            "b": {}
        }))
        .unwrap();
        ContractRegistry::build(&document, &KnownTypes::new()).unwrap()
    }

    #[test]
    fn resolves_innermost_scope() {
        let registry = registry();
        let resolver = ScopeResolver::new(&registry);
        assert_eq!(resolver.resolve_scope("/a/child").unwrap().scope_path(), "/a");
        assert_eq!(resolver.resolve_scope("/b").unwrap().scope_path(), "/");
        assert_eq!(resolver.scopes_containing("/a/child"), vec!["/", "/a"]);
        assert!(resolver.scope("/b").is_err());
        assert!(resolver.scope("/a").is_ok());
    }

    #[test]
    fn boundaries() {
        let registry = registry();
        let resolver = ScopeResolver::new(&registry);
        assert!(resolver.check_boundary("/a", "/a/child/x").is_ok());
        assert!(resolver.check_boundary("/a", "/b").is_err());
        assert!(resolver.check_boundary("/a", "/a").is_err());
        assert!(resolver.check_boundary("/", "/a/child").is_ok());
        assert!(resolver.check_boundary("/", "/contracts/checkpoint").is_err());
        assert!(resolver.check_boundary("/", "/a/contracts/terminated").is_err());
        assert!(resolver.check_boundary("/", "/contracts/newHandler").is_ok());
    }

    #[test]
    fn contract_maps_and_their_ancestors_are_protected() {
        let registry = registry();
        let resolver = ScopeResolver::new(&registry);
        assert!(resolver.check_boundary("/", "/contracts").is_err());
        assert!(resolver.check_boundary("/a", "/a/contracts").is_err());
        assert!(resolver.check_boundary("/", "/a/contracts").is_err());
        assert!(resolver.check_boundary("/", "/a").is_err());
        assert!(resolver.check_boundary("/", "/b/contracts").is_ok());
        assert!(resolver.check_boundary("/a", "/a/child/contracts").is_ok());
    }
}
