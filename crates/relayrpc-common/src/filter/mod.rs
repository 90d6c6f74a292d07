//! Filter chains.
//!
//! Filters observe and may veto an invocation at four points: before the
//! client sends a call, after the client receives a successful reply, before
//! the server dispatches a call, and after the server produced a reply.
//! Filters in a chain run in registration order and the first failure stops
//! the chain.

mod builtin;

pub use builtin::{AccessLogFilter, ClientTokenFilter, ServerRateLimitFilter, ServerTokenFilter};

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::protocol::{Attachments, Call, Reply, Result};

/// Attachment key carrying the shared-secret token.
pub const TOKEN_ATTACHMENT: &str = "token";

/// Per-invocation data handed to filters.
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub interface_name: String,
    pub method_name: String,
    pub param_types: Vec<String>,
    pub args: Vec<Value>,
    pub attachments: Attachments,
    /// Set for after-filters.
    pub reply: Option<Reply>,
    pub started_at: Instant,
}

impl FilterContext {
    pub fn from_call(call: &Call) -> Self {
        FilterContext {
            interface_name: call.interface_name.clone(),
            method_name: call.method_name.clone(),
            param_types: call.param_types.clone(),
            args: call.params.clone(),
            attachments: call.attachments.clone(),
            reply: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn attachment_str(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).and_then(Value::as_str)
    }
}

pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, ctx: &mut FilterContext) -> Result<()>;
}

/// Ordered list of filters.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn with(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Runs every filter in order, stopping at the first error.
    pub fn run(&self, ctx: &mut FilterContext) -> Result<()> {
        for filter in &self.filters {
            if let Err(e) = filter.apply(ctx) {
                tracing::debug!(
                    filter = filter.name(),
                    interface = %ctx.interface_name,
                    method = %ctx.method_name,
                    error = %e,
                    "filter rejected invocation"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }
}

/// The four chains of a runtime.
#[derive(Clone, Default)]
pub struct FilterChains {
    pub client_before: FilterChain,
    pub client_after: FilterChain,
    pub server_before: FilterChain,
    pub server_after: FilterChain,
}

impl FilterChains {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token authentication on both sides plus per-interface rate limiting on
    /// the server.
    pub fn secured(token: impl Into<String>, qps: f64) -> Self {
        let token = token.into();
        FilterChains {
            client_before: FilterChain::new().with(ClientTokenFilter::new(token.clone())),
            client_after: FilterChain::new(),
            server_before: FilterChain::new()
                .with(ServerRateLimitFilter::new(qps))
                .with(ServerTokenFilter::new(token)),
            server_after: FilterChain::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RpcError;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Filter for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn apply(&self, _ctx: &mut FilterContext) -> Result<()> {
            self.log.lock().push(self.name);
            if self.fail {
                Err(RpcError::Unauthorized(self.name.to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn ctx() -> FilterContext {
        FilterContext::from_call(&Call::new("S", "m", vec!["x".into()]))
    }

    #[test]
    fn test_filters_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new()
            .with(Recorder { name: "a", log: log.clone(), fail: false })
            .with(Recorder { name: "b", log: log.clone(), fail: false });

        chain.run(&mut ctx()).unwrap();
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(chain.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_first_failure_stops_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new()
            .with(Recorder { name: "a", log: log.clone(), fail: true })
            .with(Recorder { name: "b", log: log.clone(), fail: false });

        assert!(matches!(chain.run(&mut ctx()), Err(RpcError::Unauthorized(_))));
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[test]
    fn test_empty_chain_passes() {
        assert!(FilterChain::new().run(&mut ctx()).is_ok());
    }

    #[test]
    fn test_secured_chains() {
        let chains = FilterChains::secured("secret", 100.0);
        assert_eq!(chains.client_before.names(), vec!["client-token"]);
        assert_eq!(chains.server_before.names(), vec!["server-rate-limit", "server-token"]);
        assert!(chains.client_after.is_empty());
    }

    #[test]
    fn test_secured_chains_without_rate() {
        let chains = FilterChains::secured("secret", 0.0);
        let mut ctx = FilterContext::from_call(&Call::new("S", "m", vec![]));
        chains.client_before.run(&mut ctx).unwrap();
        for _ in 0..3 {
            assert!(chains.server_before.run(&mut ctx).is_ok());
        }
    }
}
