use serde_json::Value;

use super::{Filter, FilterContext, TOKEN_ATTACHMENT};
use crate::auth::AuthConfig;
use crate::protocol::{Result, RpcError};
use crate::rate_limit::{RateLimitConfig, RateLimiter};

/// Adds the shared-secret token to every outgoing call.
pub struct ClientTokenFilter {
    token: String,
}

impl ClientTokenFilter {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl Filter for ClientTokenFilter {
    fn name(&self) -> &str {
        "client-token"
    }

    fn apply(&self, ctx: &mut FilterContext) -> Result<()> {
        ctx.attachments
            .insert(TOKEN_ATTACHMENT.to_string(), Value::String(self.token.clone()));
        Ok(())
    }
}

/// Rejects calls whose token attachment is missing or wrong.
pub struct ServerTokenFilter {
    auth: AuthConfig,
}

impl ServerTokenFilter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            auth: AuthConfig::with_token(token),
        }
    }

    pub fn from_config(auth: AuthConfig) -> Self {
        Self { auth }
    }
}

impl Filter for ServerTokenFilter {
    fn name(&self) -> &str {
        "server-token"
    }

    fn apply(&self, ctx: &mut FilterContext) -> Result<()> {
        if !self.auth.requires_auth() {
            return Ok(());
        }
        match ctx.attachment_str(TOKEN_ATTACHMENT) {
            Some(token) if self.auth.validate_token(token) => Ok(()),
            Some(_) => Err(RpcError::Unauthorized("invalid token".to_string())),
            None => Err(RpcError::Unauthorized("missing token".to_string())),
        }
    }
}

/// Non-blocking per-interface rate limit.
pub struct ServerRateLimitFilter {
    limiter: RateLimiter,
}

impl ServerRateLimitFilter {
    /// Allows `qps` calls per second per interface, with up to one second of
    /// unused capacity saved up for bursts.
    ///
    /// A `qps` of zero or less, or NaN, lets every call through.
    pub fn new(qps: f64) -> Self {
        let burst = qps.ceil().max(1.0) as u32;
        Self {
            limiter: RateLimiter::new(RateLimitConfig::new(qps, burst)),
        }
    }

    pub fn from_config(config: RateLimitConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config),
        }
    }
}

impl Filter for ServerRateLimitFilter {
    fn name(&self) -> &str {
        "server-rate-limit"
    }

    fn apply(&self, ctx: &mut FilterContext) -> Result<()> {
        let result = self.limiter.check_rate_limit(&ctx.interface_name);
        if result.is_allowed() {
            Ok(())
        } else {
            tracing::warn!(
                interface = %ctx.interface_name,
                retry_after_ms = result.retry_after().map(|d| d.as_millis() as u64).unwrap_or(0),
                "rate limit exceeded"
            );
            Err(RpcError::RateLimited("Rate limit exceeded".to_string()))
        }
    }
}

/// Logs every completed invocation with its latency.
///
/// Meant for the after-chains, where the reply is available.
#[derive(Default)]
pub struct AccessLogFilter;

impl Filter for AccessLogFilter {
    fn name(&self) -> &str {
        "access-log"
    }

    fn apply(&self, ctx: &mut FilterContext) -> Result<()> {
        let status = ctx.reply.as_ref().map(|r| r.status).unwrap_or(0);
        tracing::debug!(
            interface = %ctx.interface_name,
            method = %ctx.method_name,
            status,
            elapsed_us = ctx.started_at.elapsed().as_micros() as u64,
            "invocation completed"
        );
        Ok(())
    }
}
