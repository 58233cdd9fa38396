use crate::error::{GatewayError, Result, StoreError};
use crate::registry::{AppState, RouteDescriptor, RouteRecord, RouteRegistry};
use crate::response::json_response;
use axum::{extract::State, response::Response, Json};
use serde::Serialize;
use serde_json::json;

pub fn register(registry: &mut RouteRegistry) -> Result<()> {
    registry.register_route(
        RouteDescriptor::new("routes", "To get all available methods").anti_spam(2),
        list_routes,
    )?;
    registry.register_route(
        RouteDescriptor::new("health", "Service and store health"),
        health,
    )?;
    Ok(())
}

async fn list_routes(State(state): State<AppState>) -> std::result::Result<Response, GatewayError> {
    let routes: Vec<RouteRecord> = state.stores.routes().all()?;
    let routes = serde_json::to_value(routes).map_err(StoreError::from)?;

    Ok(json_response([
        ("message", json!("running...")),
        ("routes", routes),
    ]))
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub store: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let store_ok = match state.stores.ping() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(target: "route_gateway::plugins", error = %e, "Store health check failed");
            false
        }
    };

    Json(HealthStatus {
        status: if store_ok { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        store: if store_ok { "ok" } else { "unavailable" },
    })
}
