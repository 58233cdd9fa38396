//! Route registry.
//!
//! Plugins describe a route with a [`RouteDescriptor`] and hand over an axum
//! handler. Registration upserts the route's metadata by name, then binds the
//! handler at `/<name>` behind the cooldown gate.

use crate::error::{GatewayError, Result};
use crate::middleware::{with_cooldown, ClientIpSource, CooldownGate};
use crate::params::RequiredParams;
use crate::rate_limiter::CooldownLimiter;
use crate::store::{Query, Stores};
use axum::{
    handler::Handler,
    http::Method,
    routing::{MethodFilter, MethodRouter},
    Extension, Router,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use validator::Validate;

static ROUTE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.~-]+(/[A-Za-z0-9_.~-]+)*$").expect("route name pattern is valid")
});

/// Stored metadata for one route, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub name: String,
    pub info: String,
    pub anti_spam: u64,
    pub is_private: bool,
    pub methods: Vec<String>,
    pub params: Vec<String>,
}

/// Declarative description of a route a plugin wants bound.
#[derive(Debug, Clone, Validate)]
pub struct RouteDescriptor {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    pub info: String,
    pub methods: Vec<Method>,
    pub anti_spam: u64,
    pub params: Vec<String>,
    pub is_private: bool,
}

impl RouteDescriptor {
    /// A public GET route with no cooldown and no required parameters.
    pub fn new(name: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            info: info.into(),
            methods: vec![Method::GET],
            anti_spam: 0,
            params: Vec::new(),
            is_private: false,
        }
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// Cooldown in seconds between admitted requests from one IP. Zero disables it.
    pub fn anti_spam(mut self, secs: u64) -> Self {
        self.anti_spam = secs;
        self
    }

    pub fn params<I, P>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn private(mut self, is_private: bool) -> Self {
        self.is_private = is_private;
        self
    }

    pub fn path(&self) -> String {
        format!("/{}", self.name)
    }

    pub fn endpoint_id(&self) -> String {
        format!("{}_endpoint", self.name)
    }

    pub fn to_record(&self) -> RouteRecord {
        RouteRecord {
            name: self.name.clone(),
            info: self.info.clone(),
            anti_spam: self.anti_spam,
            is_private: self.is_private,
            methods: self.methods.iter().map(|m| m.as_str().to_string()).collect(),
            params: self.params.clone(),
        }
    }

    fn check(&self) -> Result<MethodFilter> {
        self.validate()
            .map_err(|e| GatewayError::InvalidRoute(format!("{}: {}", self.name, e)))?;

        if !ROUTE_NAME.is_match(&self.name) {
            return Err(GatewayError::InvalidRoute(format!(
                "'{}' is not a valid route name",
                self.name
            )));
        }

        let mut filter: Option<MethodFilter> = None;
        for method in &self.methods {
            let next = MethodFilter::try_from(method.clone()).map_err(|e| {
                GatewayError::InvalidRoute(format!("{}: {}", self.name, e))
            })?;
            filter = Some(match filter {
                Some(acc) => acc.or(next),
                None => next,
            });
        }
        filter.ok_or_else(|| GatewayError::InvalidRoute(format!("{}: no methods", self.name)))
    }
}

/// State shared by every bound route.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub limiter: CooldownLimiter,
    pub ip_source: ClientIpSource,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(stores: Stores, limiter: CooldownLimiter, ip_source: ClientIpSource) -> Self {
        Self {
            stores,
            limiter,
            ip_source,
            started_at: Instant::now(),
        }
    }
}

/// A route bound into the registry's router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub path: String,
}

struct BoundRoute {
    path: String,
    router: MethodRouter<AppState>,
}

pub struct RouteRegistry {
    state: AppState,
    endpoints: BTreeMap<String, BoundRoute>,
}

impl RouteRegistry {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            endpoints: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Persist `route`'s metadata (insert or overwrite by name) and bind
    /// `handler` at `/<name>`. Registering a name again replaces both the
    /// stored record and the bound handler.
    pub fn register_route<H, T>(&mut self, route: RouteDescriptor, handler: H) -> Result<Endpoint>
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        let filter = route.check()?;
        let record = route.to_record();
        let routes = self.state.stores.routes::<RouteRecord>();
        let by_name = Query::eq("name", route.name.as_str());

        if routes.get(&by_name)?.is_none() {
            routes.insert(&record)?;
        } else {
            routes.upsert(&record, &by_name)?;
        }

        let required = RequiredParams(route.params.iter().cloned().collect());
        let method_router = MethodRouter::new()
            .on(filter, handler)
            .layer(Extension(required));
        let gate = CooldownGate {
            route: Arc::from(route.name.as_str()),
            cooldown_secs: route.anti_spam,
            limiter: self.state.limiter.clone(),
            ip_source: self.state.ip_source,
        };

        let endpoint = Endpoint {
            id: route.endpoint_id(),
            path: route.path(),
        };
        let replaced = self
            .endpoints
            .insert(
                endpoint.id.clone(),
                BoundRoute {
                    path: endpoint.path.clone(),
                    router: with_cooldown(method_router, gate),
                },
            )
            .is_some();

        tracing::info!(
            target: "route_gateway::registry",
            name = %route.name,
            path = %endpoint.path,
            methods = ?record.methods,
            anti_spam = route.anti_spam,
            replaced,
            "Registered route"
        );
        Ok(endpoint)
    }

    /// Remove every stored route record. Returns how many were deleted.
    /// Bound handlers stay in place until the next restart.
    pub fn clear_all_routes(&self) -> Result<usize> {
        let routes = self.state.stores.routes::<RouteRecord>();
        let names: Vec<String> = routes.all()?.into_iter().map(|r| r.name).collect();

        let mut removed = 0;
        for name in &names {
            removed += routes.remove(&Query::eq("name", name.as_str()))?.len();
        }

        tracing::info!(target: "route_gateway::registry", removed, "Cleared stored routes");
        Ok(removed)
    }

    pub fn records(&self) -> Result<Vec<RouteRecord>> {
        Ok(self.state.stores.routes().all()?)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = Endpoint> + '_ {
        self.endpoints.iter().map(|(id, bound)| Endpoint {
            id: id.clone(),
            path: bound.path.clone(),
        })
    }

    pub fn into_router(self) -> Router {
        self.endpoints
            .into_values()
            .fold(Router::new(), |router, bound| router.route(&bound.path, bound.router))
            .with_state(self.state)
    }
}
