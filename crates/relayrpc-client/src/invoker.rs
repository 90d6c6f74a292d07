use std::sync::Arc;
use std::time::Duration;

use relayrpc_common::discovery::Discovery;
use relayrpc_common::filter::{FilterChains, FilterContext};
use relayrpc_common::protocol::error::{Result, RpcError};
use relayrpc_common::protocol::{Call, NodeAddress};
use serde_json::Value;

use crate::circuit_breaker::CircuitBreakers;
use crate::load_balancer::LoadBalancer;
use crate::transport::Transport;

/// Retry configuration for invocations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, each on a node not tried before
    ///
    /// Default: 5
    pub max_attempts: u32,
    /// How long a single attempt waits for its reply
    ///
    /// Default: 2000ms
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: Duration::from_millis(2000),
        }
    }
}

/// Result of an invocation together with how it got there.
#[derive(Debug)]
pub struct InvocationOutcome {
    pub result: Result<Value>,
    /// Nodes that failed during this invocation, in the order they failed
    pub blacklist: Vec<NodeAddress>,
    pub attempts: u32,
}

enum Attempt {
    Done(Value),
    /// Fails the same way on any node; stop now.
    Terminal(RpcError),
    /// Every known node is blacklisted, open or was not picked.
    OutOfNodes,
    /// The node failed; try another one.
    Failed(NodeAddress, RpcError),
}

/// Client-side invocation orchestrator.
///
/// Each attempt looks the service up, drops blacklisted nodes and nodes whose
/// circuit is open, runs the client before-filters, lets the balancer pick a
/// node and sends the call. A node that fails (transport error, timeout, or a
/// failure reply) is recorded in its circuit breaker and blacklisted for the
/// rest of the invocation, and the next attempt starts right away.
#[derive(Clone)]
pub struct Invoker {
    discovery: Arc<dyn Discovery>,
    balancer: Arc<dyn LoadBalancer>,
    breakers: Arc<CircuitBreakers>,
    transport: Arc<dyn Transport>,
    filters: FilterChains,
    retry: RetryConfig,
}

impl Invoker {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        balancer: Arc<dyn LoadBalancer>,
        breakers: Arc<CircuitBreakers>,
        transport: Arc<dyn Transport>,
        filters: FilterChains,
        retry: RetryConfig,
    ) -> Self {
        Self {
            discovery,
            balancer,
            breakers,
            transport,
            filters,
            retry,
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Invokes `call`, returning the remote method's return value.
    ///
    /// # Errors
    ///
    /// - [`RpcError::NoAvailableNode`] when there was no node to try at all
    /// - filter errors from the client before-filters, unchanged
    /// - [`RpcError::AttemptsExhausted`] carrying the last failure once
    ///   attempts or nodes run out after at least one node failed
    pub async fn invoke(&self, call: Call) -> Result<Value> {
        self.invoke_traced(call).await.result
    }

    /// Like [`invoke`](Self::invoke), also reporting the attempts made and
    /// the nodes blacklisted along the way.
    pub async fn invoke_traced(&self, mut call: Call) -> InvocationOutcome {
        let mut blacklist = Vec::new();
        let mut last_error = None;
        let mut attempts = 0;

        while attempts < self.retry.max_attempts {
            attempts += 1;

            match self.attempt(&mut call, &blacklist).await {
                Attempt::Done(value) => {
                    return InvocationOutcome {
                        result: Ok(value),
                        blacklist,
                        attempts,
                    };
                }
                Attempt::Terminal(e) => {
                    return InvocationOutcome {
                        result: Err(e),
                        blacklist,
                        attempts,
                    };
                }
                Attempt::OutOfNodes => {
                    // Nothing was sent on this pass
                    attempts -= 1;
                    let result = match last_error.take() {
                        Some(last) => Err(RpcError::AttemptsExhausted {
                            attempts,
                            last: Box::new(last),
                        }),
                        None => Err(RpcError::NoAvailableNode(call.interface_name.clone())),
                    };
                    return InvocationOutcome {
                        result,
                        blacklist,
                        attempts,
                    };
                }
                Attempt::Failed(addr, e) => {
                    tracing::warn!(
                        interface = %call.interface_name,
                        method = %call.method_name,
                        addr = %addr,
                        attempt = attempts,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "call failed, trying another node"
                    );
                    blacklist.push(addr);
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.unwrap_or_else(|| {
            RpcError::InvalidRequest("invocation allows zero attempts".to_string())
        });
        InvocationOutcome {
            result: Err(RpcError::AttemptsExhausted {
                attempts,
                last: Box::new(last),
            }),
            blacklist,
            attempts,
        }
    }

    async fn attempt(&self, call: &mut Call, blacklist: &[NodeAddress]) -> Attempt {
        let nodes = match self.discovery.lookup_all(&call.interface_name).await {
            Ok(nodes) => nodes,
            Err(e) => return Attempt::Terminal(e),
        };

        let candidates: Vec<NodeAddress> = nodes
            .into_iter()
            .filter(|n| !blacklist.contains(n))
            .filter(|n| self.breakers.allow_request(n))
            .collect();

        if candidates.is_empty() {
            return Attempt::OutOfNodes;
        }

        let mut ctx = FilterContext::from_call(call);
        if let Err(e) = self.filters.client_before.run(&mut ctx) {
            return Attempt::Terminal(e);
        }
        call.attachments = ctx.attachments;
        call.renew_request_id();

        let addr = match self.balancer.select(&candidates, call) {
            Some(addr) => addr,
            None => return Attempt::OutOfNodes,
        };

        tracing::debug!(
            interface = %call.interface_name,
            method = %call.method_name,
            request_id = %call.request_id,
            addr = %addr,
            "sending call"
        );

        let error = match self
            .transport
            .send(&addr, call.clone(), self.retry.attempt_timeout)
            .await
        {
            Ok(reply) if reply.is_success() => {
                self.breakers.record_success(&addr);

                let payload = reply.payload.clone().unwrap_or(Value::Null);
                let mut ctx = FilterContext::from_call(call).with_reply(reply);
                if let Err(e) = self.filters.client_after.run(&mut ctx) {
                    return Attempt::Terminal(e);
                }
                return Attempt::Done(payload);
            }
            Ok(reply) => RpcError::RemoteInvocation(reply.message),
            Err(e) if !e.is_retryable() => return Attempt::Terminal(e),
            Err(e) => e,
        };

        self.breakers.record_failure(&addr);
        Attempt::Failed(addr, error)
    }
}
