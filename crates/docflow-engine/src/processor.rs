//! Public entry points: event processing and document initialization.

use std::sync::Arc;

use docflow_types::builtins::SEQUENTIAL_WORKFLOW;
use docflow_types::pointer::{INITIALIZED_KEY, ROOT};
use docflow_types::{KnownTypes, Node};

use crate::config::{ProcessorConfig, RunOptions};
use crate::error::ProcessorError;
use crate::handler::{ChannelProcessor, HandlerProcessor, HandlerProcessors};
use crate::markers::read_marker;
use crate::processors::SequentialWorkflow;
use crate::result::DocumentProcessingResult;
use crate::router::ChannelProcessors;
use crate::runtime::ScopeRuntime;
use crate::termination::TerminationStore;

/// Holds the registered processors and limits. Keeps no per-document state, so one instance can
/// serve any number of documents.
pub struct DocumentProcessor {
    pub(crate) config: ProcessorConfig,
    pub(crate) handlers: HandlerProcessors,
    pub(crate) channels: ChannelProcessors,
    pub(crate) known: KnownTypes,
}

impl DocumentProcessor {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> DocumentProcessorBuilder {
        DocumentProcessorBuilder::default()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn known_types(&self) -> &KnownTypes {
        &self.known
    }

    pub fn process_event(
        &self,
        document: Node,
        event: &Node,
    ) -> Result<DocumentProcessingResult, ProcessorError> {
        self.process_event_with(document, event, RunOptions::default())
    }

    /// Runs `event` and its full cascade against `document`.
    ///
    /// Faults inside the run are reported in the result; only unencodable input is an error.
    pub fn process_event_with(
        &self,
        document: Node,
        event: &Node,
        options: RunOptions,
    ) -> Result<DocumentProcessingResult, ProcessorError> {
        if TerminationStore::persisted(&document, ROOT).is_some() {
            log::debug!("document is terminated; event ignored");
            return Ok(DocumentProcessingResult::unchanged(document, true));
        }
        let signature = event.signature()?;
        let runtime = ScopeRuntime::new(self, document, options);
        Ok(runtime.run_event(event, &signature))
    }

    /// Initializes every scope that has no initialization marker yet, children first.
    pub fn initialize_document(
        &self,
        document: Node,
    ) -> Result<DocumentProcessingResult, ProcessorError> {
        if Self::is_initialized(&document) {
            return Err(ProcessorError::AlreadyInitialized);
        }
        if TerminationStore::persisted(&document, ROOT).is_some() {
            return Ok(DocumentProcessingResult::unchanged(document, true));
        }
        document.signature()?;
        let runtime = ScopeRuntime::new(self, document, RunOptions::default());
        Ok(runtime.run_initialization())
    }

    pub fn is_initialized(document: &Node) -> bool {
        read_marker(document, ROOT, INITIALIZED_KEY).is_some()
    }
}

impl Default for DocumentProcessor {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DocumentProcessorBuilder {
    config: ProcessorConfig,
    handlers: HandlerProcessors,
    channels: ChannelProcessors,
}

impl Default for DocumentProcessorBuilder {
    fn default() -> Self {
        let mut handlers = HandlerProcessors::new();
        handlers.insert(
            SEQUENTIAL_WORKFLOW.to_string(),
            Arc::new(SequentialWorkflow) as Arc<dyn HandlerProcessor>,
        );
        Self {
            config: ProcessorConfig::default(),
            handlers,
            channels: ChannelProcessors::new(),
        }
    }
}

impl DocumentProcessorBuilder {
    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.config.gas_limit = gas_limit;
        self
    }

    /// Registers (or replaces) the processor for a handler type identity.
    pub fn with_handler_processor(
        mut self,
        type_ref: impl Into<String>,
        processor: impl HandlerProcessor + 'static,
    ) -> Self {
        self.handlers.insert(type_ref.into(), Arc::new(processor));
        self
    }

    pub fn with_channel_processor(
        mut self,
        type_ref: impl Into<String>,
        processor: impl ChannelProcessor + 'static,
    ) -> Self {
        self.channels.insert(type_ref.into(), Arc::new(processor));
        self
    }

    pub fn build(self) -> DocumentProcessor {
        let mut known = KnownTypes::default();
        for type_ref in self.handlers.keys() {
            known.insert_handler(type_ref.clone());
        }
        for type_ref in self.channels.keys() {
            known.insert_channel(type_ref.clone());
        }
        DocumentProcessor {
            config: self.config,
            handlers: self.handlers,
            channels: self.channels,
            known,
        }
    }
}
