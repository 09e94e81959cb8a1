use anyhow::{Context, Result, ensure};
use docflow_engine::gas::{self, patch_cost};
use docflow_engine::{
    DocumentProcessor, FailureCode, HandlerContext, HandlerError, TerminationStore,
};
use docflow_types::{Contract, JsonPatch, Node, TerminationCause};
use serde_json::json;

mod helpers;
use helpers::{business_data, init_logger, node, processor, processor_with_gas};

fn counter_document() -> Node {
    node(json!({
        "contracts": {
            "inc": {"type": "EventChannel"},
            "h": {"type": "Counter", "channel": "inc"}
        }
    }))
}

fn increment() -> Node {
    node(json!({"type": "Increment", "key": "k1"}))
}

fn counter_run_cost() -> Result<u64> {
    let written = Node::scalar(1).canonical_size()?;
    Ok(gas::ROUTE_TRAVERSAL + gas::ROUTE_MATCH + gas::HANDLER_INVOCATION + patch_cost(written, 1))
}

#[test]
fn single_event_adds_counter_with_exact_gas() -> Result<()> {
    init_logger();
    let result = processor().process_event(counter_document(), &increment())?;

    ensure!(!result.run_terminated, "run should complete");
    ensure!(result.failures.is_empty(), "unexpected failures: {:?}", result.failures);
    assert_eq!(result.document.get("/counter"), Some(&Node::scalar(1)));
    assert_eq!(business_data(&result.document), node(json!({"counter": 1})));
    assert_eq!(result.total_gas, counter_run_cost()?);
    assert!(result.triggered_events.is_empty());
    Ok(())
}

#[test]
fn identical_runs_are_deterministic() -> Result<()> {
    let first = processor().process_event(counter_document(), &increment())?;
    let second = processor().process_event(counter_document(), &increment())?;
    assert_eq!(first.document.signature()?, second.document.signature()?);
    assert_eq!(first.total_gas, second.total_gas);
    assert_eq!(
        serde_json::to_value(&first)?,
        serde_json::to_value(&second)?
    );
    Ok(())
}

#[test]
fn redelivery_is_a_free_no_op() -> Result<()> {
    let processor = processor();
    let first = processor.process_event(counter_document(), &increment())?;
    let checkpoint = first
        .document
        .get("/contracts/checkpoint/lastSignatures/inc")
        .and_then(Node::as_text)
        .context("checkpoint signature missing")?;
    assert_eq!(checkpoint, increment().signature()?);

    let second = processor.process_event(first.document.clone(), &increment())?;
    assert_eq!(second.total_gas, 0);
    assert_eq!(second.document, first.document);
    assert!(!second.run_terminated);

    let other = node(json!({"type": "Increment", "key": "k2"}));
    let third = processor.process_event(second.document, &other)?;
    ensure!(third.total_gas > 0, "a new event must be processed");
    Ok(())
}

#[test]
fn failed_patches_are_atomic_and_scoped() -> Result<()> {
    init_logger();
    let document = node(json!({
        "data": {"kept": true},
        "contracts": {
            "inc": {"type": "EventChannel"},
            "w": {"type": "Writer", "channel": "inc", "target": "/missing/x"}
        }
    }));
    let result = processor().process_event(document.clone(), &increment())?;

    ensure!(!result.run_terminated, "patch failures are not fatal");
    assert_eq!(result.failures.len(), 1);
    let failure = &result.failures[0];
    assert_eq!(failure.code, FailureCode::PatchFailed);
    assert!(!failure.fatal);
    assert_eq!(business_data(&result.document), business_data(&document));
    assert_eq!(
        result
            .document
            .get("/contracts/failure/code")
            .and_then(Node::as_text),
        Some("PatchFailed")
    );
    ensure!(
        result.document.get("/contracts/checkpoint").is_some(),
        "checkpoint is recorded even when the handler failed"
    );
    assert_eq!(
        result.total_gas,
        gas::ROUTE_TRAVERSAL + gas::ROUTE_MATCH + gas::HANDLER_INVOCATION
    );
    Ok(())
}

#[test]
fn batch_is_rolled_back_when_a_later_patch_fails() -> Result<()> {
    let processor = DocumentProcessor::builder()
        .with_handler_processor(
            "Remover",
            |_contract: &Contract, ctx: &mut HandlerContext<'_>| -> Result<(), HandlerError> {
                ctx.apply_patch(JsonPatch::add("/first", Node::scalar(1)));
                ctx.apply_patch(JsonPatch::remove("/nope"));
                Ok(())
            },
        )
        .build();
    let document = node(json!({
        "contracts": {
            "inc": {"type": "EventChannel"},
            "r": {"type": "Remover", "channel": "inc"}
        }
    }));
    let result = processor.process_event(document, &increment())?;
    assert_eq!(result.document.get("/first"), None);
    assert_eq!(result.failures[0].code, FailureCode::PatchFailed);
    Ok(())
}

#[test]
fn gas_exhaustion_stops_at_the_exact_step() -> Result<()> {
    let full = counter_run_cost()?;
    let patch = full - gas::ROUTE_TRAVERSAL - gas::ROUTE_MATCH - gas::HANDLER_INVOCATION;

    let result = processor_with_gas(full - 1).process_event(counter_document(), &increment())?;
    ensure!(result.run_terminated, "out of gas must end the run");
    let fatal = result.fatal_failure().context("fatal failure missing")?;
    assert_eq!(fatal.code, FailureCode::OutOfGas);
    assert_eq!(result.total_gas, full - patch);
    assert_eq!(result.document.get("/counter"), None);
    assert_eq!(result.document.get("/contracts/checkpoint"), None);
    assert_eq!(TerminationStore::persisted(&result.document, "/"), None);

    let exact = processor_with_gas(full).process_event(counter_document(), &increment())?;
    ensure!(!exact.run_terminated, "an exact budget is enough");
    assert_eq!(exact.total_gas, full);
    Ok(())
}

#[test]
fn unmatched_must_understand_event_is_fatal() -> Result<()> {
    let document = node(json!({
        "contracts": {"alice": {"type": "TimelineChannel", "timelineId": "alice"}}
    }));
    let event = node(json!({"type": "Ping", "timelineId": "bob", "mustUnderstand": true}));
    let result = processor().process_event(document.clone(), &event)?;

    ensure!(result.run_terminated, "must-understand failures are fatal");
    let fatal = result.fatal_failure().context("fatal failure missing")?;
    assert_eq!(fatal.code, FailureCode::MustUnderstand);
    assert_eq!(
        TerminationStore::persisted(&result.document, "/"),
        Some(TerminationCause::Fatal)
    );
    assert_eq!(result.terminated_scopes.len(), 1);

    let after = processor().process_event(result.document, &increment())?;
    ensure!(after.run_terminated, "a terminated document ignores events");
    assert_eq!(after.total_gas, 0);

    let optional = node(json!({"type": "Ping", "timelineId": "bob"}));
    let dropped = processor().process_event(document, &optional)?;
    ensure!(!dropped.run_terminated, "ordinary unmatched events are dropped");
    assert_eq!(dropped.total_gas, gas::ROUTE_TRAVERSAL + gas::ROUTE_MATCH);
    Ok(())
}

#[test]
fn unknown_contract_types_must_be_understood() -> Result<()> {
    let document = node(json!({"contracts": {"x": {"type": "Teleporter"}}}));
    let result = processor().process_event(document, &increment())?;
    ensure!(result.run_terminated, "unknown contracts abort the run");
    assert_eq!(
        result.fatal_failure().map(|failure| failure.code),
        Some(FailureCode::MustUnderstand)
    );
    Ok(())
}
