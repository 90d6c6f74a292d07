use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use relayrpc_common::protocol::NodeAddress;

/// Circuit breaker state for each node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests flow through
    Closed,
    /// Circuit is tripped, the node is skipped without being contacted
    Open,
    /// Cooldown elapsed, a probe is testing whether the node has recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before tripping the circuit
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before letting a probe through
    pub cooldown: Duration,
    /// Admit only one probe per cooldown window while half-open
    pub single_probe: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            cooldown: Duration::from_millis(5000),
            single_probe: true,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_started_at: Option<Instant>,
}

/// Failure tracker for a single node.
///
/// ```text
/// Closed --(failures >= threshold)--> Open
/// Open --(cooldown elapsed, next admission check)--> HalfOpen
/// HalfOpen --(success)--> Closed
/// HalfOpen --(failure)--> Open (cooldown restarts)
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    addr: NodeAddress,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(addr: NodeAddress, config: CircuitBreakerConfig) -> Self {
        Self {
            addr,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_started_at: None,
            }),
        }
    }

    /// Returns whether a call may be sent to this node now.
    ///
    /// The first check after the cooldown moves an open circuit to half-open
    /// and admits that call as the probe. With `single_probe`, further checks
    /// are rejected until the probe reports back or another cooldown passes.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|t| now.duration_since(t) >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started_at = Some(now);
                    tracing::info!(addr = %self.addr, "circuit half-open, probing node");
                }
                cooled_down
            }
            CircuitState::HalfOpen => {
                if !self.config.single_probe {
                    return true;
                }
                // A probe that never reported back stops blocking after one cooldown
                let probe_expired = inner
                    .probe_started_at
                    .map(|t| now.duration_since(t) >= self.config.cooldown)
                    .unwrap_or(true);
                if probe_expired {
                    inner.probe_started_at = Some(now);
                }
                probe_expired
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_started_at = None;
                tracing::info!(addr = %self.addr, "circuit closed, node recovered");
            }
            // Late result of a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        addr = %self.addr,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_started_at = None;
                tracing::warn!(addr = %self.addr, "probe failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn addr(&self) -> &NodeAddress {
        &self.addr
    }
}

/// Circuit breakers for every node a client has talked to, created lazily.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    breakers: DashMap<NodeAddress, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, addr: &NodeAddress) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(addr) {
            return breaker.value().clone();
        }
        self.breakers
            .entry(addr.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(addr.clone(), self.config.clone())))
            .value()
            .clone()
    }

    pub fn allow_request(&self, addr: &NodeAddress) -> bool {
        self.get(addr).allow_request()
    }

    pub fn record_success(&self, addr: &NodeAddress) {
        self.get(addr).record_success();
    }

    pub fn record_failure(&self, addr: &NodeAddress) {
        self.get(addr).record_failure();
    }

    /// State of the breaker for `addr`; nodes never seen are closed.
    pub fn state(&self, addr: &NodeAddress) -> CircuitState {
        self.breakers
            .get(addr)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }
}
