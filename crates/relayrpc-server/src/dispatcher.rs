//! Request dispatching.
//!
//! Turns one incoming frame into at most one outgoing frame. Heartbeats are
//! answered without touching filters or services; calls go through the
//! server filter chains and the service provider.

use std::sync::Arc;

use relayrpc_common::filter::{FilterChains, FilterContext};
use relayrpc_common::protocol::error::{Result, RpcError};
use relayrpc_common::protocol::{Call, Frame, Message, Reply};
use serde_json::Value;

use crate::provider::ServiceProvider;

#[derive(Clone)]
pub struct Dispatcher {
    provider: Arc<ServiceProvider>,
    filters: FilterChains,
}

impl Dispatcher {
    pub fn new(provider: Arc<ServiceProvider>, filters: FilterChains) -> Self {
        Self { provider, filters }
    }

    pub fn provider(&self) -> &Arc<ServiceProvider> {
        &self.provider
    }

    /// Handles one frame and returns the frame to write back, if any.
    ///
    /// Replies carry the serializer code of the frame they answer.
    pub async fn dispatch(&self, frame: Frame) -> Option<Frame> {
        let code = frame.serializer_code;
        match frame.message {
            Message::HeartbeatRequest => {
                tracing::debug!("heartbeat request, answering PONG");
                Some(Frame::heartbeat_response(code))
            }
            Message::Request(call) => {
                let reply = self.handle_call(call).await;
                Some(Frame::response(code, reply))
            }
            Message::HeartbeatResponse => {
                tracing::debug!("heartbeat response from client, ignoring");
                None
            }
            Message::Response(reply) => {
                tracing::warn!(request_id = %reply.request_id, "unexpected response frame, ignoring");
                None
            }
        }
    }

    /// Runs a call through the server filters and its handler.
    ///
    /// Never fails: every error becomes a failure reply carrying its message.
    pub async fn handle_call(&self, call: Call) -> Reply {
        let request_id = call.request_id.clone();
        let mut ctx = FilterContext::from_call(&call);

        let reply = match self.execute(call, &mut ctx).await {
            Ok(payload) => Reply::success(request_id.clone(), Some(payload)),
            Err(e) => {
                tracing::warn!(
                    interface = %ctx.interface_name,
                    method = %ctx.method_name,
                    request_id = %request_id,
                    error = %e,
                    "call failed"
                );
                return Reply::failure(request_id, failure_message(&e));
            }
        };

        let mut ctx = ctx.with_reply(reply.clone());
        match self.filters.server_after.run(&mut ctx) {
            Ok(()) => reply,
            Err(e) => Reply::failure(request_id, failure_message(&e)),
        }
    }

    async fn execute(&self, call: Call, ctx: &mut FilterContext) -> Result<Value> {
        self.filters.server_before.run(ctx)?;

        let service = self.provider.get_service_provider(&call.interface_name)?;
        let handler = service.handler(&call.method_name, &call.param_types)?;

        tracing::debug!(
            interface = %call.interface_name,
            method = %call.method_name,
            request_id = %call.request_id,
            "invoking handler"
        );

        match tokio::task::spawn_blocking(move || handler(call.params)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(RpcError::RemoteInvocation(
                "service handler panicked".to_string(),
            )),
            Err(e) => Err(RpcError::RemoteInvocation(e.to_string())),
        }
    }
}

/// Handler failures are reported with the handler's own message; everything
/// else with the error's description.
fn failure_message(err: &RpcError) -> String {
    match err {
        RpcError::RemoteInvocation(msg) => msg.clone(),
        other => other.to_string(),
    }
}
