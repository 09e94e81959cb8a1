//! Handler and channel processor seams plus the context handed to handler code.
//!
//! Handlers never touch the document directly. They record effects on the context and the runtime
//! commits them once the handler returns.

use std::collections::BTreeMap;
use std::sync::Arc;

use docflow_exec::{Env, Expr, Value, evaluate};
use docflow_types::{Contract, JsonPatch, Node, TerminationCause, pointer};

use crate::error::{HandlerError, PatchError};
use crate::gas::{GasLedger, OutOfGas};
use crate::patch::PatchEngine;

/// An effect requested by a handler, committed by the runtime in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Patch(JsonPatch),
    Emit(Node),
    Terminate {
        cause: TerminationCause,
        reason: Option<String>,
    },
}

pub struct HandlerContext<'a> {
    scope_path: &'a str,
    event: &'a Node,
    document: &'a Node,
    ledger: &'a mut GasLedger,
    expression_gas_limit: u64,
    effects: Vec<Effect>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        scope_path: &'a str,
        event: &'a Node,
        document: &'a Node,
        ledger: &'a mut GasLedger,
        expression_gas_limit: u64,
    ) -> Self {
        Self {
            scope_path,
            event,
            document,
            ledger,
            expression_gas_limit,
            effects: Vec::new(),
        }
    }

    pub fn event(&self) -> &Node {
        self.event
    }

    pub fn scope_path(&self) -> &str {
        self.scope_path
    }

    /// Absolute pointer for a scope-relative one.
    pub fn resolve_pointer(&self, relative: &str) -> Result<String, PatchError> {
        PatchEngine::resolve_pointer(self.scope_path, relative)
    }

    /// Whether a scope-relative pointer names an existing node.
    pub fn document_contains(&self, relative: &str) -> bool {
        self.resolve_pointer(relative)
            .is_ok_and(|absolute| PatchEngine::document_contains(self.document, &absolute))
    }

    /// Deep clone of the node at a scope-relative pointer.
    pub fn document_at(&self, relative: &str) -> Option<Node> {
        let absolute = self.resolve_pointer(relative).ok()?;
        self.document.get(&absolute).cloned()
    }

    /// The scope node as it stood when the handler was invoked.
    pub fn scope_node(&self) -> Option<&Node> {
        self.document.get(self.scope_path)
    }

    /// Queues a patch. Its path is absolute; build it with [`HandlerContext::resolve_pointer`].
    pub fn apply_patch(&mut self, patch: JsonPatch) {
        self.effects.push(Effect::Patch(patch));
    }

    pub fn emit_event(&mut self, event: Node) {
        self.effects.push(Effect::Emit(event));
    }

    pub fn terminate(&mut self, cause: TerminationCause, reason: Option<String>) {
        self.effects.push(Effect::Terminate { cause, reason });
    }

    pub fn consume_gas(&mut self, amount: u64) -> Result<(), OutOfGas> {
        self.ledger.charge(amount)
    }

    pub fn gas_remaining(&self) -> u64 {
        self.ledger.remaining()
    }

    /// Environment exposing the current event and the scope node to expressions.
    pub fn expression_env(&self) -> Env {
        let mut env = Env::new().with_event(Value::from_node(self.event));
        if let Some(scope) = self.scope_node() {
            env = env.with_document(Value::from_node(scope));
        }
        env
    }

    /// Runs an expression under the configured sub-budget and charges what it burned to the run.
    pub fn evaluate(&mut self, expr: &Expr, env: &Env) -> Result<Value, HandlerError> {
        let evaluation = evaluate(expr, env, self.expression_gas_limit);
        self.ledger.charge(evaluation.gas_used)?;
        Ok(evaluation.result?)
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}

/// Behavior for one handler type identity.
pub trait HandlerProcessor: Send + Sync {
    /// Extra filtering on top of channel matching. Skipped handlers are not charged.
    fn matches(&self, _contract: &Contract, _event: &Node) -> bool {
        true
    }

    fn execute(&self, contract: &Contract, ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError>;
}

impl<F> HandlerProcessor for F
where
    F: Fn(&Contract, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync,
{
    fn execute(&self, contract: &Contract, ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
        self(contract, ctx)
    }
}

pub type HandlerProcessors = BTreeMap<String, Arc<dyn HandlerProcessor>>;

/// Matching for a custom channel type identity.
pub trait ChannelProcessor: Send + Sync {
    fn matches(&self, contract: &Contract, event: &Node) -> bool;
}

/// Relative path of `absolute` inside `scope`, or the absolute path when it lies outside.
pub(crate) fn scope_relative(scope: &str, absolute: &str) -> String {
    pointer::relativize(scope, absolute).unwrap_or_else(|_| absolute.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_exec::expression_from_node;
    use serde_json::json;

    #[test]
    fn context_reads_are_scope_relative() {
        let document = Node::from_json(&json!({"a": {"x": 1}})).unwrap();
        let event = Node::from_json(&json!({"type": "Ping"})).unwrap();
        let mut ledger = GasLedger::new(1_000);
        let ctx = HandlerContext::new("/a", &event, &document, &mut ledger, 100);
        assert!(ctx.document_contains("/x"));
        assert!(!ctx.document_contains("/y"));
        assert_eq!(ctx.document_at("x"), Some(Node::scalar(1)));
        assert_eq!(ctx.resolve_pointer("/x").unwrap(), "/a/x");
    }

    #[test]
    fn evaluation_gas_is_charged_to_the_run() {
        let document = Node::from_json(&json!({"counter": 4})).unwrap();
        let event = Node::new();
        let mut ledger = GasLedger::new(1_000);
        let mut ctx = HandlerContext::new("/", &event, &document, &mut ledger, 100);
        let expr = expression_from_node(
            &Node::from_json(&json!({
                "type": "Expression",
                "expr": {"op": "add", "args": [{"ref": "@doc/counter"}, {"int": 1}]}
            }))
            .unwrap(),
        )
        .unwrap()
        .unwrap();
        let env = ctx.expression_env();
        assert_eq!(ctx.evaluate(&expr, &env).unwrap(), Value::Int(5));
        assert_eq!(ctx.gas_remaining(), 990);
    }

    #[test]
    fn effects_keep_emission_order() {
        let document = Node::new();
        let event = Node::new();
        let mut ledger = GasLedger::new(10);
        let mut ctx = HandlerContext::new("/", &event, &document, &mut ledger, 10);
        ctx.apply_patch(JsonPatch::add("/a", Node::scalar(1)));
        ctx.emit_event(Node::typed("Done"));
        ctx.terminate(TerminationCause::Graceful, None);
        let effects = ctx.into_effects();
        assert!(matches!(effects[0], Effect::Patch(_)));
        assert!(matches!(effects[1], Effect::Emit(_)));
        assert!(matches!(effects[2], Effect::Terminate { .. }));
    }
}
