//! Shared fixtures for engine integration tests.
//!
//! Each test binary compiles this module separately, so some helpers look unused in some of them.

#![allow(dead_code)]

use docflow_engine::{DocumentProcessor, HandlerContext, HandlerError};
use docflow_types::{Contract, JsonPatch, Node};
use serde_json::Value as JsonValue;

pub const COUNTER: &str = "Counter";
pub const WRITER: &str = "Writer";
pub const EMITTER: &str = "Emitter";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn node(json: JsonValue) -> Node {
    Node::from_json(&json).expect("fixture must be a valid node")
}

/// Adds `/counter = 1` inside its scope whenever the event carries a `key`.
pub fn counter(_contract: &Contract, ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    if ctx.event().property("key").is_some() {
        let path = ctx.resolve_pointer("/counter").map_err(|err| HandlerError::Invalid(err.to_string()))?;
        ctx.apply_patch(JsonPatch::add(path, Node::scalar(1)));
    }
    Ok(())
}

/// Writes `1` at the contract's absolute `target` pointer.
pub fn writer(contract: &Contract, ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let target = contract
        .node
        .text_property("target")
        .ok_or_else(|| HandlerError::Invalid("writer needs a target".into()))?;
    ctx.apply_patch(JsonPatch::add(target, Node::scalar(1)));
    Ok(())
}

/// Emits the contract's `emit` node.
pub fn emitter(contract: &Contract, ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    if let Some(event) = contract.node.property("emit") {
        ctx.emit_event(event.clone());
    }
    Ok(())
}

pub fn processor() -> DocumentProcessor {
    processor_with_gas(10_000_000)
}

pub fn processor_with_gas(gas_limit: u64) -> DocumentProcessor {
    DocumentProcessor::builder()
        .with_gas_limit(gas_limit)
        .with_handler_processor(COUNTER, counter)
        .with_handler_processor(WRITER, writer)
        .with_handler_processor(EMITTER, emitter)
        .build()
}

/// The document with every `contracts` map removed, i.e. only business data.
pub fn business_data(document: &Node) -> Node {
    let mut out = document.clone();
    strip_contracts(&mut out);
    out
}

fn strip_contracts(node: &mut Node) {
    node.remove_property("contracts");
    for child in node.properties.values_mut() {
        strip_contracts(child);
    }
}
