//! Built-in `SequentialWorkflow` handler: a list of steps run in order against one event.
//!
//! ```json
//! {
//!   "type": "SequentialWorkflow",
//!   "channel": "inc",
//!   "event": {"type": "Increment"},
//!   "steps": [
//!     {"type": "Compute", "name": "next", "expr": {"op": "add", "args": [{"ref": "@doc/counter"}, {"int": 1}]}},
//!     {"type": "UpdateDocument", "changeset": [{"op": "REPLACE", "path": "/counter", "val": {"type": "Expression", "expr": {"ref": "@steps.next"}}}]},
//!     {"type": "TriggerEvent", "event": {"type": "Incremented"}},
//!     {"type": "Terminate", "mode": "graceful", "reason": "done"}
//!   ]
//! }
//! ```
//!
//! Expressions read the scope node as it stood before the handler ran; patches from earlier steps
//! are committed only after the whole workflow returns.

use docflow_exec::{Env, Expr, EvalError, expression_from_node};
use docflow_types::{Contract, JsonPatch, Node, PatchOp, TerminationCause};

use crate::error::HandlerError;
use crate::gas::document_update_cost;
use crate::handler::{HandlerContext, HandlerProcessor};

pub const UPDATE_DOCUMENT_STEP: &str = "UpdateDocument";
pub const TRIGGER_EVENT_STEP: &str = "TriggerEvent";
pub const COMPUTE_STEP: &str = "Compute";
pub const TERMINATE_STEP: &str = "Terminate";

#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialWorkflow;

impl HandlerProcessor for SequentialWorkflow {
    fn matches(&self, contract: &Contract, event: &Node) -> bool {
        match contract.node.property("event") {
            Some(filter) => event.contains_structurally(filter),
            None => true,
        }
    }

    fn execute(&self, contract: &Contract, ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
        let Some(steps) = contract.node.property("steps") else {
            return Ok(());
        };
        let steps = steps
            .items
            .as_ref()
            .ok_or_else(|| invalid(contract, "'steps' must be a list"))?;
        let mut env = ctx.expression_env();
        for step in steps {
            run_step(contract, step, ctx, &mut env)?;
        }
        Ok(())
    }
}

fn run_step(
    contract: &Contract,
    step: &Node,
    ctx: &mut HandlerContext<'_>,
    env: &mut Env,
) -> Result<(), HandlerError> {
    match step.type_ref() {
        Some(UPDATE_DOCUMENT_STEP) => {
            let changeset = step
                .property("changeset")
                .and_then(|changes| changes.items.as_ref())
                .ok_or_else(|| invalid(contract, "UpdateDocument needs a 'changeset' list"))?;
            ctx.consume_gas(document_update_cost(changeset.len()))?;
            for change in changeset {
                let patch = change_to_patch(contract, change, ctx, env)?;
                ctx.apply_patch(patch);
            }
            Ok(())
        }
        Some(TRIGGER_EVENT_STEP) => {
            let event = step
                .property("event")
                .ok_or_else(|| invalid(contract, "TriggerEvent needs an 'event'"))?;
            let event = materialize(event, ctx, env)?;
            ctx.emit_event(event);
            Ok(())
        }
        Some(COMPUTE_STEP) => {
            let name = step
                .text_property("name")
                .ok_or_else(|| invalid(contract, "Compute needs a 'name'"))?
                .to_string();
            let body = step
                .property("expr")
                .ok_or_else(|| invalid(contract, "Compute needs an 'expr'"))?;
            let expr = parse_expression(body)?;
            let value = ctx.evaluate(&expr, env)?;
            env.insert_step(name, value);
            Ok(())
        }
        Some(TERMINATE_STEP) => {
            let cause = match step.text_property("mode") {
                None => TerminationCause::Graceful,
                Some(mode) => TerminationCause::parse(mode)
                    .ok_or_else(|| invalid(contract, "Terminate mode must be 'graceful' or 'fatal'"))?,
            };
            let reason = step.text_property("reason").map(str::to_string);
            ctx.terminate(cause, reason);
            Ok(())
        }
        Some(other) => Err(invalid(contract, &format!("unknown step type '{other}'"))),
        None => Err(invalid(contract, "step has no type")),
    }
}

fn change_to_patch(
    contract: &Contract,
    change: &Node,
    ctx: &mut HandlerContext<'_>,
    env: &Env,
) -> Result<JsonPatch, HandlerError> {
    let op = change
        .text_property("op")
        .and_then(PatchOp::parse)
        .ok_or_else(|| invalid(contract, "change needs an op of ADD, REPLACE or REMOVE"))?;
    let relative = change
        .text_property("path")
        .ok_or_else(|| invalid(contract, "change needs a 'path'"))?;
    let path = ctx
        .resolve_pointer(relative)
        .map_err(|err| invalid(contract, &err.to_string()))?;
    let val = match change.property("val") {
        Some(val) => Some(materialize(val, ctx, env)?),
        None => None,
    };
    Ok(JsonPatch { op, path, val })
}

/// Replaces every `Expression` node in `node` with its evaluated value.
fn materialize(node: &Node, ctx: &mut HandlerContext<'_>, env: &Env) -> Result<Node, HandlerError> {
    if let Some(expr) = expression_from_node(node) {
        let value = ctx.evaluate(&expr?, env)?;
        return Ok(value.to_node()?);
    }
    let mut out = Node {
        type_ref: node.type_ref.clone(),
        value: node.value.clone(),
        ..Node::default()
    };
    for (name, child) in &node.properties {
        out.set_property(name.clone(), materialize(child, ctx, env)?);
    }
    if let Some(items) = &node.items {
        let mut materialized = Vec::with_capacity(items.len());
        for item in items {
            materialized.push(materialize(item, ctx, env)?);
        }
        out.items = Some(materialized);
    }
    Ok(out)
}

/// Accepts either an `Expression` node or a bare expression body.
fn parse_expression(body: &Node) -> Result<Expr, EvalError> {
    match expression_from_node(body) {
        Some(parsed) => parsed,
        None => serde_json::from_value(body.to_json())
            .map_err(|err| EvalError::InvalidExpression(err.to_string())),
    }
}

fn invalid(contract: &Contract, message: &str) -> HandlerError {
    HandlerError::Invalid(format!("workflow '{}': {message}", contract.key))
}
