//! Deterministic gas schedule and the per-run ledger.
//!
//! Every cost is a pure function of structural sizes so two executors run out at the same step.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per scope visited while routing an external event.
pub const ROUTE_TRAVERSAL: u64 = 50;
/// Per channel tested against an event.
pub const ROUTE_MATCH: u64 = 5;
/// Per handler invocation, charged before the handler runs.
pub const HANDLER_INVOCATION: u64 = 50;
pub const PATCH_BASE: u64 = 20;
pub const PATCH_BYTES_PER_UNIT: u64 = 100;
/// Per event emitted by a handler or synthesized for a document update.
pub const EMIT_EVENT: u64 = 20;
pub const DOCUMENT_UPDATE_BASE: u64 = 40;
pub const DOCUMENT_UPDATE_PER_CHANGE: u64 = 5;
pub const INITIALIZATION: u64 = 1000;
pub const LIFECYCLE_DELIVERY: u64 = 30;
pub const TERMINATION_MARKER: u64 = 20;

/// `20 + ceil(snapshotBytes / 100) + depth`.
pub fn patch_cost(snapshot_bytes: usize, depth: usize) -> u64 {
    PATCH_BASE + (snapshot_bytes as u64).div_ceil(PATCH_BYTES_PER_UNIT) + depth as u64
}

/// `40 + 5 × changesetLength`.
pub fn document_update_cost(changeset_len: usize) -> u64 {
    DOCUMENT_UPDATE_BASE + DOCUMENT_UPDATE_PER_CHANGE * changeset_len as u64
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("out of gas: requested {requested}, remaining {remaining}")]
pub struct OutOfGas {
    pub requested: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GasLedger {
    limit: u64,
    used: u64,
}

impl GasLedger {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Consumes `amount`, or refuses it and leaves the ledger untouched.
    pub fn charge(&mut self, amount: u64) -> Result<(), OutOfGas> {
        let remaining = self.remaining();
        if amount > remaining {
            return Err(OutOfGas {
                requested: amount,
                remaining,
            });
        }
        self.used += amount;
        Ok(())
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}
