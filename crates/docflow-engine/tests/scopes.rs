use anyhow::{Context, Result, ensure};
use docflow_engine::gas::{self, patch_cost};
use docflow_engine::{
    DocumentProcessor, FailureCode, HandlerContext, HandlerError, TerminationStore,
};
use docflow_types::{Contract, JsonPatch, Node, TerminationCause};
use serde_json::json;

mod helpers;
use helpers::{COUNTER, EMITTER, WRITER, counter, emitter, init_logger, node, processor, writer};

fn increment() -> Node {
    node(json!({"type": "Increment", "key": "k1"}))
}

fn nested_writer_document(target: &str) -> Node {
    node(json!({
        "contracts": {"embedded": {"type": "ProcessEmbedded", "paths": ["/a"]}},
        "a": {
            "contracts": {
                "embedded": {"type": "ProcessEmbedded", "paths": ["/child"]},
                "inc": {"type": "EventChannel"},
                "w": {"type": "Writer", "channel": "inc", "target": target}
            },
            "child": {}
        },
        "b": {}
    }))
}

#[test]
fn writes_outside_the_scope_are_scoped_violations() -> Result<()> {
    init_logger();
    let result = processor().process_event(nested_writer_document("/b/x"), &increment())?;

    ensure!(!result.run_terminated, "non-root violations are not fatal");
    assert_eq!(result.document.get("/b/x"), None);
    let failure = result.failures.first().context("violation not recorded")?;
    assert_eq!(failure.code, FailureCode::BoundaryViolation);
    assert_eq!(failure.scope_path, "/a");
    assert!(!failure.fatal);
    assert_eq!(
        result
            .document
            .get("/a/contracts/failure/code")
            .and_then(Node::as_text),
        Some("BoundaryViolation")
    );
    Ok(())
}

#[test]
fn writes_into_declared_embedded_children_are_within_scope() -> Result<()> {
    let result = processor().process_event(nested_writer_document("/a/child/x"), &increment())?;
    ensure!(result.failures.is_empty(), "unexpected failures: {:?}", result.failures);
    assert_eq!(result.document.get("/a/child/x"), Some(&Node::scalar(1)));
    Ok(())
}

#[test]
fn root_writes_to_reserved_storage_are_fatal() -> Result<()> {
    let document = node(json!({
        "contracts": {
            "inc": {"type": "EventChannel"},
            "w": {"type": "Writer", "channel": "inc", "target": "/contracts/checkpoint"}
        }
    }));
    let result = processor().process_event(document, &increment())?;
    ensure!(result.run_terminated, "root violations abort the run");
    let fatal = result.fatal_failure().context("fatal failure missing")?;
    assert_eq!(fatal.code, FailureCode::BoundaryViolation);
    assert_eq!(
        TerminationStore::persisted(&result.document, "/"),
        Some(TerminationCause::Fatal)
    );
    Ok(())
}

#[test]
fn scoped_writes_to_reserved_storage_are_violations() -> Result<()> {
    let result = processor().process_event(
        nested_writer_document("/a/contracts/terminated"),
        &increment(),
    )?;
    ensure!(!result.run_terminated, "non-root violations are not fatal");
    let failure = result.failures.first().context("violation not recorded")?;
    assert_eq!(failure.code, FailureCode::BoundaryViolation);
    assert_eq!(failure.scope_path, "/a");
    assert_eq!(TerminationStore::persisted(&result.document, "/a"), None);
    Ok(())
}

#[test]
fn replacing_a_contract_map_cannot_forge_markers() -> Result<()> {
    let processor = DocumentProcessor::builder()
        .with_handler_processor(
            "Forger",
            |_contract: &Contract, ctx: &mut HandlerContext<'_>| -> Result<(), HandlerError> {
                let path = ctx
                    .resolve_pointer("/contracts")
                    .map_err(|err| HandlerError::Invalid(err.to_string()))?;
                let forged = node(json!({
                    "inc": {"type": "EventChannel"},
                    "h": {"type": "Forger", "channel": "inc"},
                    "terminated": {"type": "ProcessingTerminatedMarker", "cause": "graceful", "reason": "forged"}
                }));
                ctx.apply_patch(JsonPatch::replace(path, forged));
                Ok(())
            },
        )
        .build();
    let document = node(json!({
        "contracts": {"embedded": {"type": "ProcessEmbedded", "paths": ["/a"]}},
        "a": {
            "contracts": {
                "inc": {"type": "EventChannel"},
                "h": {"type": "Forger", "channel": "inc"}
            }
        }
    }));
    let result = processor.process_event(document, &increment())?;

    ensure!(!result.run_terminated, "non-root violations are not fatal");
    assert!(result.terminated_scopes.is_empty());
    let failure = result.failures.first().context("violation not recorded")?;
    assert_eq!(failure.code, FailureCode::BoundaryViolation);
    assert_eq!(failure.scope_path, "/a");
    assert_eq!(TerminationStore::persisted(&result.document, "/a"), None);
    Ok(())
}

#[test]
fn replacing_an_embedded_child_wholesale_is_a_violation() -> Result<()> {
    let result = processor().process_event(nested_writer_document("/a/child"), &increment())?;
    ensure!(!result.run_terminated, "non-root violations are not fatal");
    assert_eq!(
        result.failures.first().map(|failure| failure.code),
        Some(FailureCode::BoundaryViolation)
    );
    assert_eq!(result.document.get("/a/child"), Some(&Node::new()));
    Ok(())
}

#[test]
fn invalid_contracts_from_a_child_batch_are_rolled_back() -> Result<()> {
    let document = node(json!({
        "contracts": {"embedded": {"type": "ProcessEmbedded", "paths": ["/child"]}},
        "child": {
            "contracts": {
                "inc": {"type": "EventChannel"},
                "w": {"type": "Writer", "channel": "inc", "target": "/child/contracts/rogue"}
            }
        }
    }));
    let result = processor().process_event(document, &increment())?;

    ensure!(!result.run_terminated, "a child fault must not end the run");
    let failure = result.failures.first().context("failure not recorded")?;
    assert_eq!(failure.code, FailureCode::IllegalState);
    assert_eq!(failure.scope_path, "/child");
    assert!(!failure.fatal);
    assert_eq!(result.document.get("/child/contracts/rogue"), None);
    assert_eq!(TerminationStore::persisted(&result.document, "/"), None);
    Ok(())
}

#[test]
fn embedded_events_bridge_to_the_parent() -> Result<()> {
    init_logger();
    let document = node(json!({
        "contracts": {
            "embedded": {"type": "ProcessEmbedded", "paths": ["/child"]},
            "fromChild": {"type": "EmbeddedNodeChannel", "childPath": "/child"},
            "relay": {"type": "Writer", "channel": "fromChild", "target": "/bridged"}
        },
        "child": {
            "contracts": {
                "inc": {"type": "EventChannel"},
                "emit": {"type": "Emitter", "channel": "inc", "emit": {"type": "ChildDone"}},
                "own": {"type": "TriggeredEventChannel"},
                "echo": {"type": "Writer", "channel": "own", "target": "/child/echoed"}
            }
        }
    }));
    let result = processor().process_event(document, &increment())?;

    ensure!(result.failures.is_empty(), "unexpected failures: {:?}", result.failures);
    assert_eq!(result.document.get("/child/echoed"), Some(&Node::scalar(1)));
    assert_eq!(result.document.get("/bridged"), Some(&Node::scalar(1)));
    assert!(
        result.triggered_events.is_empty(),
        "only root emissions leave the run"
    );
    ensure!(
        result.document.get("/child/contracts/checkpoint").is_some(),
        "the child scope checkpoints its own channel"
    );
    Ok(())
}

#[test]
fn root_emissions_are_returned_in_order() -> Result<()> {
    let document = node(json!({
        "contracts": {
            "inc": {"type": "EventChannel"},
            "first": {"type": "Emitter", "channel": "inc", "emit": {"type": "First"}},
            "second": {"type": "Emitter", "channel": "inc", "emit": {"type": "Second"}},
            "last": {"type": "Emitter", "channel": "inc", "order": 5, "emit": {"type": "Last"}}
        }
    }));
    let result = processor().process_event(document, &increment())?;
    let types: Vec<Option<&str>> = result
        .triggered_events
        .iter()
        .map(Node::type_ref)
        .collect();
    assert_eq!(types, vec![Some("First"), Some("Second"), Some("Last")]);
    assert_eq!(
        result.total_gas,
        gas::ROUTE_TRAVERSAL + gas::ROUTE_MATCH + 3 * (gas::HANDLER_INVOCATION + gas::EMIT_EVENT)
    );
    Ok(())
}

#[test]
fn document_updates_reach_watching_channels() -> Result<()> {
    let processor = DocumentProcessor::builder()
        .with_handler_processor(WRITER, writer)
        .with_handler_processor(
            "Recorder",
            |_contract: &Contract, ctx: &mut HandlerContext<'_>| -> Result<(), HandlerError> {
                let update = ctx.event().clone();
                ctx.apply_patch(JsonPatch::add("/lastUpdate", update));
                Ok(())
            },
        )
        .build();
    let document = node(json!({
        "contracts": {
            "inc": {"type": "EventChannel"},
            "w": {"type": "Writer", "channel": "inc", "target": "/data/x"},
            "watch": {"type": "DocumentUpdateChannel", "path": "/data"},
            "record": {"type": "Recorder", "channel": "watch"}
        },
        "data": {}
    }));
    let result = processor.process_event(document, &increment())?;

    let update = result
        .document
        .get("/lastUpdate")
        .context("update was not delivered")?;
    assert_eq!(
        update.to_json(),
        json!({"type": "Document Update", "op": "ADD", "path": "/data/x", "before": null, "after": 1})
    );

    let written = Node::scalar(1).canonical_size()?;
    let recorded = update.canonical_size()?;
    assert_eq!(
        result.total_gas,
        gas::ROUTE_TRAVERSAL
            + gas::ROUTE_MATCH
            + gas::HANDLER_INVOCATION
            + patch_cost(written, 2)
            + gas::EMIT_EVENT
            + gas::HANDLER_INVOCATION
            + patch_cost(recorded, 1)
    );
    Ok(())
}

#[test]
fn graceful_termination_stops_the_scope_only() -> Result<()> {
    let processor = DocumentProcessor::builder()
        .with_handler_processor(COUNTER, counter)
        .with_handler_processor(EMITTER, emitter)
        .with_handler_processor(
            "Stopper",
            |_contract: &Contract, ctx: &mut HandlerContext<'_>| -> Result<(), HandlerError> {
                ctx.terminate(TerminationCause::Graceful, Some("finished".into()));
                Ok(())
            },
        )
        .build();
    let document = node(json!({
        "contracts": {
            "embedded": {"type": "ProcessEmbedded", "paths": ["/child"]},
            "inc": {"type": "EventChannel"},
            "count": {"type": "Counter", "channel": "inc"}
        },
        "child": {
            "contracts": {
                "inc": {"type": "EventChannel"},
                "stop": {"type": "Stopper", "channel": "inc"},
                "after": {"type": "Counter", "channel": "inc"}
            }
        }
    }));
    let result = processor.process_event(document, &increment())?;

    ensure!(!result.run_terminated, "a child terminating does not end the run");
    assert_eq!(result.terminated_scopes.len(), 1);
    assert_eq!(result.terminated_scopes[0].scope_path, "/child");
    assert_eq!(result.terminated_scopes[0].kind, TerminationCause::Graceful);
    assert_eq!(result.document.get("/child/counter"), None);
    assert_eq!(result.document.get("/counter"), Some(&Node::scalar(1)));
    assert_eq!(
        TerminationStore::persisted(&result.document, "/child"),
        Some(TerminationCause::Graceful)
    );

    let next = node(json!({"type": "Increment", "key": "k2"}));
    let later = processor.process_event(result.document, &next)?;
    ensure!(
        later.terminated_scopes.is_empty(),
        "terminated scopes stay inactive without new summaries"
    );
    assert_eq!(later.document.get("/child/counter"), None);
    Ok(())
}

#[test]
fn fatal_termination_aborts_the_run() -> Result<()> {
    let processor = DocumentProcessor::builder()
        .with_handler_processor(COUNTER, counter)
        .with_handler_processor(
            "Crash",
            |_contract: &Contract, ctx: &mut HandlerContext<'_>| -> Result<(), HandlerError> {
                ctx.terminate(TerminationCause::Fatal, Some("boom".into()));
                Ok(())
            },
        )
        .build();
    let document = node(json!({
        "contracts": {
            "inc": {"type": "EventChannel"},
            "crash": {"type": "Crash", "channel": "inc"},
            "count": {"type": "Counter", "channel": "inc"}
        }
    }));
    let result = processor.process_event(document, &increment())?;
    ensure!(result.run_terminated, "fatal termination ends the run");
    assert_eq!(
        result.fatal_failure().map(|failure| failure.code),
        Some(FailureCode::FatalTermination)
    );
    assert_eq!(result.document.get("/counter"), None);
    assert_eq!(result.terminated_scopes[0].reason.as_deref(), Some("boom"));
    Ok(())
}
