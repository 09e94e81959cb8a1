use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Processor-wide limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessorConfig {
    /// Gas available to one run.
    pub gas_limit: u64,
    /// Sub-budget for each expression evaluation.
    pub expression_gas_limit: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            gas_limit: 10_000_000,
            expression_gas_limit: 40_000,
        }
    }
}

/// Pins an event to one channel of one scope, bypassing routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHint {
    pub scope: String,
    pub channel: String,
}

impl ChannelHint {
    pub fn new(scope: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            channel: channel.into(),
        }
    }
}

/// Caller-held signal checked between handler invocations.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelToken")
            .field(&self.is_cancelled())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub channel_hint: Option<ChannelHint>,
    pub cancel: Option<CancelToken>,
}

impl RunOptions {
    pub fn with_channel_hint(mut self, hint: ChannelHint) -> Self {
        self.channel_hint = Some(hint);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: ProcessorConfig = serde_json::from_value(json!({"gasLimit": 500})).unwrap();
        assert_eq!(config.gas_limit, 500);
        assert_eq!(config.expression_gas_limit, 40_000);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let options = RunOptions::default().with_cancel(token.clone());
        assert!(!options.is_cancelled());
        token.cancel();
        assert!(options.is_cancelled());
    }
}
