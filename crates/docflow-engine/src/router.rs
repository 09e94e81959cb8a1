//! Matching events to channels within a scope.

use std::collections::BTreeMap;
use std::sync::Arc;

use docflow_types::{ChannelKind, Contract, Node};

use crate::gas::{GasLedger, OutOfGas, ROUTE_MATCH};
use crate::handler::ChannelProcessor;
use crate::registry::ContractBundle;

pub type ChannelProcessors = BTreeMap<String, Arc<dyn ChannelProcessor>>;

pub struct EventRouter<'p> {
    channel_processors: &'p ChannelProcessors,
}

impl<'p> EventRouter<'p> {
    pub fn new(channel_processors: &'p ChannelProcessors) -> Self {
        Self { channel_processors }
    }

    /// External channels of `bundle` that accept `event`, in execution order. Every channel
    /// tested is charged [`ROUTE_MATCH`].
    pub fn route<'b>(
        &self,
        bundle: &'b ContractBundle,
        event: &Node,
        ledger: &mut GasLedger,
    ) -> Result<Vec<&'b Contract>, OutOfGas> {
        let mut matched = Vec::new();
        for contract in bundle.external_channels() {
            ledger.charge(ROUTE_MATCH)?;
            if self.channel_matches(contract, event) {
                matched.push(contract);
            }
        }
        Ok(matched)
    }

    /// Same as [`EventRouter::route`] without charging anything.
    pub fn dry_run<'b>(&self, bundle: &'b ContractBundle, event: &Node) -> Vec<&'b Contract> {
        bundle
            .external_channels()
            .into_iter()
            .filter(|contract| self.channel_matches(contract, event))
            .collect()
    }

    pub fn channel_matches(&self, contract: &Contract, event: &Node) -> bool {
        match contract.channel() {
            Some(ChannelKind::Timeline { timeline_id }) => {
                event.text_property("timelineId") == Some(timeline_id.as_str())
            }
            Some(ChannelKind::Event { event_type }) => match event_type {
                Some(expected) => event.type_ref() == Some(expected.as_str()),
                None => true,
            },
            Some(ChannelKind::Custom { type_ref }) => self
                .channel_processors
                .get(type_ref)
                .is_some_and(|processor| processor.matches(contract, event)),
            _ => false,
        }
    }
}
