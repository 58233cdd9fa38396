pub mod config;
pub mod error;
pub mod middleware;
pub mod params;
pub mod plugins;
pub mod rate_limiter;
pub mod registry;
pub mod response;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{GatewayError, ParamError, Result, StoreError};
pub use params::Params;
pub use registry::{AppState, RouteDescriptor, RouteRecord, RouteRegistry};
pub use response::{json_response, RawResponse};
pub use server::create_app;
