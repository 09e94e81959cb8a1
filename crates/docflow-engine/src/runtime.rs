//! The run loop: route, invoke, commit, cascade.
//!
//! A run owns the document and a FIFO queue of deliveries. External events are routed into the
//! queue, and every committed patch or emitted event feeds further deliveries into it until the
//! queue drains or the run halts.

use std::collections::VecDeque;

use docflow_types::builtins::{
    DOCUMENT_UPDATE_CHANNEL, DOCUMENT_UPDATE_EVENT, LIFECYCLE_CHANNEL, LIFECYCLE_INITIATED_EVENT,
    TRIGGERED_EVENT_CHANNEL,
};
use docflow_types::pointer::{self, INITIALIZED_KEY, ROOT};
use docflow_types::{
    ChannelKind, Contract, InitializationMarker, JsonPatch, Node, Scalar, TerminationCause,
};

use crate::checkpoint::CheckpointStore;
use crate::config::{ChannelHint, RunOptions};
use crate::error::{HandlerError, PatchError, RegistryError};
use crate::gas::{self, GasLedger, OutOfGas};
use crate::handler::{Effect, HandlerContext, scope_relative};
use crate::markers::{read_marker, write_marker};
use crate::patch::{AppliedPatch, PatchEngine};
use crate::processor::DocumentProcessor;
use crate::registry::ContractRegistry;
use crate::result::{DocumentProcessingResult, FailureCode, FailureRecord};
use crate::router::EventRouter;
use crate::scope::ScopeResolver;
use crate::termination::{TerminationStore, TerminationSummary};

/// Why a run stopped early.
enum Halt {
    /// Fatal fault in the document itself; the root is marked terminated.
    Terminate(FailureRecord),
    /// Fatal for this run only; the document stays live.
    Abort(FailureRecord),
    /// The root scope terminated gracefully.
    RootTerminated,
}

impl From<OutOfGas> for Halt {
    fn from(err: OutOfGas) -> Self {
        Halt::Abort(FailureRecord::fatal(ROOT, FailureCode::OutOfGas, err.to_string()))
    }
}

/// Outcome of staging one handler's effects.
enum Abort {
    Scoped(FailureRecord),
    Halt(Halt),
}

impl From<OutOfGas> for Abort {
    fn from(err: OutOfGas) -> Self {
        Abort::Halt(err.into())
    }
}

struct Delivery {
    scope: String,
    channel: String,
    event: Node,
    /// Signature to checkpoint once the delivery completes. Only external events carry one.
    checkpoint: Option<String>,
}

enum Staged {
    Applied(AppliedPatch),
    Emitted(Node),
}

pub struct ScopeRuntime<'p> {
    processor: &'p DocumentProcessor,
    options: RunOptions,
    document: Node,
    registry: ContractRegistry,
    ledger: GasLedger,
    queue: VecDeque<Delivery>,
    /// Scopes terminated during this run.
    terminated: Vec<String>,
    triggered_events: Vec<Node>,
    terminated_scopes: Vec<TerminationSummary>,
    failures: Vec<FailureRecord>,
    run_terminated: bool,
}

impl<'p> ScopeRuntime<'p> {
    pub fn new(processor: &'p DocumentProcessor, document: Node, options: RunOptions) -> Self {
        Self {
            processor,
            options,
            document,
            registry: ContractRegistry::default(),
            ledger: GasLedger::new(processor.config.gas_limit),
            queue: VecDeque::new(),
            terminated: Vec::new(),
            triggered_events: Vec::new(),
            terminated_scopes: Vec::new(),
            failures: Vec::new(),
            run_terminated: false,
        }
    }

    /// Processes one external event and its cascade.
    pub fn run_event(mut self, event: &Node, signature: &str) -> DocumentProcessingResult {
        if let Err(halt) = self.process_event(event, signature) {
            self.halt(halt);
        }
        self.finish()
    }

    /// Initializes every uninitialized scope, children first.
    pub fn run_initialization(mut self) -> DocumentProcessingResult {
        if let Err(halt) = self.initialize() {
            self.halt(halt);
        }
        self.finish()
    }

    fn process_event(&mut self, event: &Node, signature: &str) -> Result<(), Halt> {
        self.rebuild_registry()?;
        match self.options.channel_hint.clone() {
            Some(hint) => self.route_hinted(&hint, event, signature)?,
            None => self.route_external(event, signature)?,
        }
        self.drain()
    }

    fn route_external(&mut self, event: &Node, signature: &str) -> Result<(), Halt> {
        let processor = self.processor;
        let router = EventRouter::new(&processor.channels);
        let scopes: Vec<String> = self
            .registry
            .scopes_children_first()
            .into_iter()
            .filter(|scope| !self.is_inactive(scope))
            .collect();

        let mut candidates = Vec::new();
        for scope in &scopes {
            if let Some(bundle) = self.registry.bundle(scope) {
                for contract in router.dry_run(bundle, event) {
                    candidates.push((scope.as_str(), contract.key.as_str()));
                }
            }
        }
        if !candidates.is_empty()
            && candidates.iter().all(|(scope, channel)| {
                CheckpointStore::is_processed(&self.document, scope, channel, signature)
            })
        {
            log::debug!("event {signature} already processed on every matching channel");
            return Ok(());
        }

        let mut matched = false;
        for scope in &scopes {
            let Some(bundle) = self.registry.bundle(scope) else {
                continue;
            };
            self.ledger.charge(gas::ROUTE_TRAVERSAL)?;
            let channels: Vec<String> = router
                .route(bundle, event, &mut self.ledger)?
                .into_iter()
                .map(|contract| contract.key.clone())
                .collect();
            for channel in channels {
                matched = true;
                if CheckpointStore::is_processed(&self.document, scope, &channel, signature) {
                    log::debug!("skipping redelivery on '{scope}' channel '{channel}'");
                    continue;
                }
                self.queue.push_back(Delivery {
                    scope: scope.clone(),
                    channel,
                    event: event.clone(),
                    checkpoint: Some(signature.to_string()),
                });
            }
        }

        if !matched && must_understand(event) {
            return Err(Halt::Terminate(FailureRecord::fatal(
                ROOT,
                FailureCode::MustUnderstand,
                "no channel accepted an event that must be understood",
            )));
        }
        Ok(())
    }

    fn route_hinted(&mut self, hint: &ChannelHint, event: &Node, signature: &str) -> Result<(), Halt> {
        let resolver = ScopeResolver::new(&self.registry);
        let scope = match resolver.scope(&hint.scope) {
            Ok(bundle) => bundle.scope_path().to_string(),
            Err(violation) => {
                return Err(Halt::Abort(FailureRecord::fatal(
                    &hint.scope,
                    FailureCode::BoundaryViolation,
                    violation.to_string(),
                )));
            }
        };
        let is_channel = self
            .registry
            .bundle(&scope)
            .and_then(|bundle| bundle.contract(&hint.channel))
            .is_some_and(|contract| contract.channel().is_some());
        if !is_channel {
            return Err(Halt::Abort(FailureRecord::fatal(
                &scope,
                FailureCode::IllegalState,
                format!("hinted channel '{}' is not declared in scope", hint.channel),
            )));
        }
        if self.is_inactive(&scope)
            || CheckpointStore::is_processed(&self.document, &scope, &hint.channel, signature)
        {
            return Ok(());
        }
        self.ledger.charge(gas::ROUTE_TRAVERSAL)?;
        self.ledger.charge(gas::ROUTE_MATCH)?;
        self.queue.push_back(Delivery {
            scope,
            channel: hint.channel.clone(),
            event: event.clone(),
            checkpoint: Some(signature.to_string()),
        });
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), Halt> {
        self.rebuild_registry()?;
        for scope in self.registry.scopes_children_first() {
            if !self.registry.contains_scope(&scope)
                || self.is_inactive(&scope)
                || read_marker(&self.document, &scope, INITIALIZED_KEY).is_some()
            {
                continue;
            }
            self.ledger.charge(gas::INITIALIZATION)?;
            let document_id = match self.document.get(&scope).map(Node::signature) {
                Some(Ok(signature)) => signature,
                Some(Err(err)) => return Err(illegal_state(err.to_string())),
                None => continue,
            };
            let marker = InitializationMarker {
                document_id: Some(document_id.clone()),
            };
            write_marker(&mut self.document, &scope, INITIALIZED_KEY, marker.to_node());
            log::debug!("initialized scope '{scope}'");

            let lifecycle = Node::typed(LIFECYCLE_INITIATED_EVENT)
                .with_property("documentId", Node::scalar(document_id));
            let channels = self.channel_keys(&scope, LIFECYCLE_CHANNEL);
            for channel in channels {
                self.ledger.charge(gas::LIFECYCLE_DELIVERY)?;
                self.queue.push_back(Delivery {
                    scope: scope.clone(),
                    channel,
                    event: lifecycle.clone(),
                    checkpoint: None,
                });
            }
            self.drain()?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), Halt> {
        while let Some(delivery) = self.queue.pop_front() {
            self.deliver(delivery)?;
        }
        Ok(())
    }

    fn deliver(&mut self, delivery: Delivery) -> Result<(), Halt> {
        let Some(bundle) = self.registry.bundle(&delivery.scope) else {
            log::debug!("scope '{}' vanished before delivery", delivery.scope);
            return Ok(());
        };
        let handlers: Vec<Contract> = bundle
            .handlers_for(&delivery.channel)
            .into_iter()
            .cloned()
            .collect();
        for contract in &handlers {
            if self.options.is_cancelled() {
                return Err(Halt::Abort(FailureRecord::fatal(
                    &delivery.scope,
                    FailureCode::Cancelled,
                    "run cancelled by caller",
                )));
            }
            if self.is_inactive(&delivery.scope) {
                break;
            }
            self.invoke(&delivery.scope, contract, &delivery.event)?;
        }
        if let Some(signature) = &delivery.checkpoint {
            let recorded = CheckpointStore::record(
                &mut self.document,
                &delivery.scope,
                &delivery.channel,
                &delivery.event,
                signature,
            );
            if !recorded {
                log::debug!(
                    "no checkpoint for '{}' channel '{}'; redelivery will run it again",
                    delivery.scope,
                    delivery.channel
                );
            }
        }
        Ok(())
    }

    fn invoke(&mut self, scope: &str, contract: &Contract, event: &Node) -> Result<(), Halt> {
        let Some(handler) = contract.handler() else {
            return Ok(());
        };
        let Some(processor) = self.processor.handlers.get(&handler.type_ref).cloned() else {
            return Err(illegal_state(format!(
                "no processor for handler type '{}'",
                handler.type_ref
            )));
        };
        if !processor.matches(contract, event) {
            return Ok(());
        }
        self.ledger.charge(gas::HANDLER_INVOCATION)?;
        log::debug!("invoking '{}' in scope '{scope}'", contract.key);

        let mut ctx = HandlerContext::new(
            scope,
            event,
            &self.document,
            &mut self.ledger,
            self.processor.config.expression_gas_limit,
        );
        let outcome = processor.execute(contract, &mut ctx);
        let effects = ctx.into_effects();

        match outcome {
            Ok(()) => self.commit(scope, effects),
            Err(HandlerError::OutOfGas(err)) => Err(err.into()),
            Err(err) => {
                let code = match err {
                    HandlerError::Evaluation(_) => FailureCode::EvaluationFailed,
                    _ => FailureCode::HandlerFailed,
                };
                let reason = format!("handler '{}': {err}", contract.key);
                self.record_failure(FailureRecord::scoped(scope, code, reason));
                Ok(())
            }
        }
    }

    /// Applies one handler's effects as a unit.
    fn commit(&mut self, scope: &str, effects: Vec<Effect>) -> Result<(), Halt> {
        let snapshot = self.document.clone();
        let mut termination = None;
        let staged = match self.stage(scope, effects, &mut termination) {
            Ok(staged) => staged,
            Err(abort) => {
                self.document = snapshot;
                return match abort {
                    Abort::Scoped(record) => {
                        self.record_failure(record);
                        Ok(())
                    }
                    Abort::Halt(halt) => Err(halt),
                };
            }
        };

        if staged.iter().any(|item| matches!(item, Staged::Applied(_))) {
            match ContractRegistry::build(&self.document, &self.processor.known) {
                Ok(registry) => self.registry = registry,
                Err(err) => {
                    self.document = snapshot;
                    if scope == ROOT {
                        return Err(registry_halt(err));
                    }
                    let reason = format!("batch left invalid contracts: {err}");
                    self.record_failure(FailureRecord::scoped(scope, registry_code(&err), reason));
                    return Ok(());
                }
            }
        }
        for item in staged {
            match item {
                Staged::Applied(applied) => self.publish_update(&applied)?,
                Staged::Emitted(event) => self.publish_emitted(scope, event),
            }
        }
        if let Some((cause, reason)) = termination {
            self.terminate_scope(scope, cause, reason)?;
        }
        Ok(())
    }

    fn stage(
        &mut self,
        scope: &str,
        effects: Vec<Effect>,
        termination: &mut Option<(TerminationCause, Option<String>)>,
    ) -> Result<Vec<Staged>, Abort> {
        let patch_failed = |err: PatchError| {
            Abort::Scoped(FailureRecord::scoped(scope, FailureCode::PatchFailed, err.to_string()))
        };
        let mut staged = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                Effect::Patch(patch) => {
                    let absolute = pointer::normalize(&patch.path)
                        .map_err(|err| patch_failed(err.into()))?;
                    if let Err(violation) =
                        ScopeResolver::new(&self.registry).check_boundary(scope, &absolute)
                    {
                        log::warn!("{violation}");
                        return Err(if scope == ROOT {
                            Abort::Halt(Halt::Terminate(FailureRecord::fatal(
                                scope,
                                FailureCode::BoundaryViolation,
                                violation.to_string(),
                            )))
                        } else {
                            Abort::Scoped(FailureRecord::scoped(
                                scope,
                                FailureCode::BoundaryViolation,
                                violation.to_string(),
                            ))
                        });
                    }
                    let patch = JsonPatch {
                        path: absolute,
                        ..patch
                    };
                    let size = PatchEngine::snapshot_size(&self.document, &patch)
                        .map_err(patch_failed)?;
                    self.ledger
                        .charge(gas::patch_cost(size, pointer::depth(&patch.path)))?;
                    let applied =
                        PatchEngine::apply_patch(&mut self.document, &patch).map_err(patch_failed)?;
                    staged.push(Staged::Applied(applied));
                }
                Effect::Emit(event) => {
                    self.ledger.charge(gas::EMIT_EVENT)?;
                    staged.push(Staged::Emitted(event));
                }
                Effect::Terminate { cause, reason } => {
                    termination.get_or_insert((cause, reason));
                }
            }
        }
        Ok(staged)
    }

    /// Queues a document-update event for every watching channel in every active scope that
    /// contains the changed path.
    fn publish_update(&mut self, applied: &AppliedPatch) -> Result<(), Halt> {
        let scopes: Vec<String> = ScopeResolver::new(&self.registry)
            .scopes_containing(&applied.path)
            .into_iter()
            .map(str::to_string)
            .collect();
        for scope in scopes {
            if self.is_inactive(&scope) {
                continue;
            }
            let relative = scope_relative(&scope, &applied.path);
            let channels: Vec<String> = self
                .registry
                .bundle(&scope)
                .map(|bundle| {
                    bundle
                        .channels_of_type(DOCUMENT_UPDATE_CHANNEL)
                        .into_iter()
                        .filter(|contract| match contract.channel() {
                            Some(ChannelKind::DocumentUpdate { path }) => {
                                pointer::is_within(path, &relative)
                            }
                            _ => false,
                        })
                        .map(|contract| contract.key.clone())
                        .collect()
                })
                .unwrap_or_default();
            for channel in channels {
                self.ledger.charge(gas::EMIT_EVENT)?;
                self.queue.push_back(Delivery {
                    scope: scope.clone(),
                    channel,
                    event: document_update_event(applied, &relative),
                    checkpoint: None,
                });
            }
        }
        Ok(())
    }

    /// Feeds an emitted event to the scope's triggered-event channels, then outward: root events
    /// become run output, embedded scope events bridge to the parent's embedded-node channels.
    fn publish_emitted(&mut self, scope: &str, event: Node) {
        for channel in self.channel_keys(scope, TRIGGERED_EVENT_CHANNEL) {
            self.queue.push_back(Delivery {
                scope: scope.to_string(),
                channel,
                event: event.clone(),
                checkpoint: None,
            });
        }
        if scope == ROOT {
            self.triggered_events.push(event);
            return;
        }
        let Some(parent) = self.registry.parent_of(scope).map(str::to_string) else {
            return;
        };
        let bridged: Vec<String> = self
            .registry
            .bundle(&parent)
            .map(|bundle| {
                bundle
                    .embedded_node_channels_for(scope)
                    .into_iter()
                    .map(|contract| contract.key.clone())
                    .collect()
            })
            .unwrap_or_default();
        for channel in bridged {
            self.queue.push_back(Delivery {
                scope: parent.clone(),
                channel,
                event: event.clone(),
                checkpoint: None,
            });
        }
    }

    fn terminate_scope(
        &mut self,
        scope: &str,
        cause: TerminationCause,
        reason: Option<String>,
    ) -> Result<(), Halt> {
        self.ledger.charge(gas::TERMINATION_MARKER)?;
        let summary =
            TerminationStore::mark_terminated(&mut self.document, scope, cause, reason.clone());
        log::debug!("scope '{scope}' terminated ({})", cause.as_str());
        self.terminated.push(summary.scope_path.clone());
        self.terminated_scopes.push(summary);
        match cause {
            TerminationCause::Fatal => Err(Halt::Abort(FailureRecord::fatal(
                scope,
                FailureCode::FatalTermination,
                reason.unwrap_or_else(|| "fatal termination requested".to_string()),
            ))),
            TerminationCause::Graceful if scope == ROOT => Err(Halt::RootTerminated),
            TerminationCause::Graceful => Ok(()),
        }
    }

    fn rebuild_registry(&mut self) -> Result<(), Halt> {
        self.registry = ContractRegistry::build(&self.document, &self.processor.known)
            .map_err(registry_halt)?;
        Ok(())
    }

    fn channel_keys(&self, scope: &str, type_ref: &str) -> Vec<String> {
        self.registry
            .bundle(scope)
            .map(|bundle| {
                bundle
                    .channels_of_type(type_ref)
                    .into_iter()
                    .map(|contract| contract.key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_inactive(&self, scope: &str) -> bool {
        self.terminated
            .iter()
            .any(|terminated| pointer::is_within(terminated, scope))
            || TerminationStore::is_terminated(&self.document, &self.registry, scope)
    }

    fn record_failure(&mut self, record: FailureRecord) {
        log::warn!(
            "processing failure in scope '{}': {}",
            record.scope_path,
            record.reason
        );
        TerminationStore::mark_failed(
            &mut self.document,
            &record.scope_path,
            record.code.as_str(),
            &record.reason,
        );
        self.failures.push(record);
    }

    fn halt(&mut self, halt: Halt) {
        self.run_terminated = true;
        self.queue.clear();
        match halt {
            Halt::RootTerminated => {}
            Halt::Abort(record) => {
                log::error!("run aborted: {}", record.reason);
                self.failures.push(record);
            }
            Halt::Terminate(record) => {
                log::error!("run terminated fatally: {}", record.reason);
                let root_terminated = self
                    .terminated_scopes
                    .iter()
                    .any(|summary| summary.scope_path == ROOT);
                if !root_terminated {
                    let summary = TerminationStore::mark_terminated(
                        &mut self.document,
                        ROOT,
                        TerminationCause::Fatal,
                        Some(record.reason.clone()),
                    );
                    self.terminated_scopes.push(summary);
                }
                self.failures.push(record);
            }
        }
    }

    fn finish(self) -> DocumentProcessingResult {
        DocumentProcessingResult {
            document: self.document,
            triggered_events: self.triggered_events,
            total_gas: self.ledger.used(),
            terminated_scopes: self.terminated_scopes,
            run_terminated: self.run_terminated,
            failures: self.failures,
        }
    }
}

fn must_understand(event: &Node) -> bool {
    event
        .property("mustUnderstand")
        .and_then(Node::as_bool)
        .unwrap_or(false)
}

fn document_update_event(applied: &AppliedPatch, relative: &str) -> Node {
    let snapshot = |node: &Option<Node>| node.clone().unwrap_or_else(|| Node::scalar(Scalar::Null));
    Node::typed(DOCUMENT_UPDATE_EVENT)
        .with_property("op", Node::scalar(applied.op.as_str()))
        .with_property("path", Node::scalar(relative))
        .with_property("before", snapshot(&applied.before))
        .with_property("after", snapshot(&applied.after))
}

fn illegal_state(reason: impl Into<String>) -> Halt {
    Halt::Terminate(FailureRecord::fatal(ROOT, FailureCode::IllegalState, reason))
}

fn registry_code(err: &RegistryError) -> FailureCode {
    if err.is_must_understand() {
        FailureCode::MustUnderstand
    } else {
        FailureCode::IllegalState
    }
}

fn registry_halt(err: RegistryError) -> Halt {
    Halt::Terminate(FailureRecord::fatal(ROOT, registry_code(&err), err.to_string()))
}
