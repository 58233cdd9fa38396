use crate::error::{ParamError, Result};
use crate::params::Params;
use crate::registry::{RouteDescriptor, RouteRegistry};
use crate::response::json_response;
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

pub fn register(registry: &mut RouteRegistry) -> Result<()> {
    registry.register_route(
        RouteDescriptor::new("test", "Testing plugin route...").anti_spam(4),
        test_route,
    )?;
    registry.register_route(
        RouteDescriptor::new("echo", "Echo back the `text` parameter")
            .methods([Method::GET, Method::POST])
            .params(["text"]),
        echo,
    )?;
    Ok(())
}

async fn test_route() -> Response {
    json_response([("message", json!("example plugin route created..."))])
}

async fn echo(params: std::result::Result<Params, ParamError>) -> Response {
    match params {
        Ok(params) => json_response([(
            "text",
            params.get("text").cloned().unwrap_or(Value::Null),
        )]),
        Err(e) => {
            tracing::debug!(target: "route_gateway::plugins", error = %e, "echo rejected");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}
