use anyhow::{Context, Result};
use route_gateway::config::Config;
use route_gateway::middleware::ClientIpSource;
use route_gateway::rate_limiter::{spawn_visitor_sweeper, CooldownLimiter, SystemClock};
use route_gateway::registry::{AppState, RouteRegistry};
use route_gateway::server::Server;
use route_gateway::plugins;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("route_gateway={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting route gateway");
    tracing::info!(
        "Configuration: bind_addr={}, store={:?}, data_dir={}",
        config.bind_addr,
        config.store,
        config.data_dir.display()
    );

    let stores = config.open_stores().context("Failed to open document stores")?;
    let limiter = CooldownLimiter::new(&stores, Arc::new(SystemClock));
    let state = AppState::new(
        stores,
        limiter.clone(),
        ClientIpSource::from_trust_flag(config.trust_forwarded_headers),
    );

    let mut registry = RouteRegistry::new(state);
    if config.reset_routes {
        registry
            .clear_all_routes()
            .context("Failed to clear stored routes")?;
    }
    plugins::register_all(&mut registry).context("Failed to register plugin routes")?;

    if let Some(ttl) = config.visitor_ttl {
        tracing::info!(?ttl, interval = ?config.sweep_interval, "Visitor sweep enabled");
        spawn_visitor_sweeper(limiter, ttl, config.sweep_interval);
    }

    Server::new(config.bind_addr, registry)
        .run()
        .await
        .context("Server error")?;

    Ok(())
}
