use crate::error::GatewayError;
use crate::rate_limiter::{CooldownLimiter, Decision};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Where the client IP used for cooldown bookkeeping comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientIpSource {
    /// The TCP peer address.
    #[default]
    Peer,
    /// `X-Forwarded-For` / `X-Real-IP`, falling back to the peer address.
    /// Only safe behind a proxy that overwrites these headers.
    Forwarded,
}

impl ClientIpSource {
    pub fn from_trust_flag(trust_forwarded: bool) -> Self {
        if trust_forwarded {
            ClientIpSource::Forwarded
        } else {
            ClientIpSource::Peer
        }
    }
}

/// Client IP resolved by [`logging_middleware`], available to handlers as a
/// request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Logging middleware for request/response tracking
pub async fn logging_middleware(
    State(ip_source): State<ClientIpSource>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = client_ip(&request, ip_source);
    let request_id = uuid::Uuid::new_v4();

    info!(
        target: "route_gateway::middleware",
        %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    request.extensions_mut().insert(ClientIp(client_ip));
    let response = next.run(request).await;

    info!(
        target: "route_gateway::middleware",
        %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        "Request completed"
    );

    response
}

pub fn client_ip(request: &Request, source: ClientIpSource) -> String {
    if source == ClientIpSource::Forwarded {
        if let Some(forwarded) = request.headers().get("x-forwarded-for") {
            if let Ok(forwarded_str) = forwarded.to_str() {
                if let Some(first_ip) = forwarded_str.split(',').next() {
                    let first_ip = first_ip.trim();
                    if !first_ip.is_empty() {
                        return first_ip.to_string();
                    }
                }
            }
        }

        if let Some(real_ip) = request.headers().get("x-real-ip") {
            if let Ok(ip_str) = real_ip.to_str() {
                return ip_str.trim().to_string();
            }
        }
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// Per-route cooldown configuration handed to [`cooldown_gate`].
#[derive(Clone)]
pub struct CooldownGate {
    pub route: Arc<str>,
    pub cooldown_secs: u64,
    pub limiter: CooldownLimiter,
    pub ip_source: ClientIpSource,
}

/// Runs the limiter before the wrapped handler; a limited request never
/// reaches it.
pub async fn cooldown_gate(State(gate): State<CooldownGate>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request, gate.ip_source);

    match gate.limiter.check_and_record(&ip, gate.cooldown_secs) {
        Ok(Decision::Allowed) => next.run(request).await,
        Ok(Decision::Limited { retry_after_secs }) => {
            info!(
                target: "route_gateway::middleware",
                route = %gate.route,
                client_ip = %ip,
                retry_after_secs,
                "Request rate-limited"
            );
            GatewayError::RateLimited { retry_after_secs }.into_response()
        }
        Err(e) => GatewayError::from(e).into_response(),
    }
}

/// Wrap `handler` so every call first passes the cooldown gate. A zero
/// cooldown returns the handler untouched. Requests with an undeclared method
/// are answered with 405 before the gate and leave no timestamp behind.
pub fn with_cooldown<S>(handler: MethodRouter<S>, gate: CooldownGate) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    if gate.cooldown_secs == 0 {
        return handler;
    }
    handler.route_layer(middleware::from_fn_with_state(gate, cooldown_gate))
}
