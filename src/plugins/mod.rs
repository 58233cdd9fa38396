//! Built-in plugins.
//!
//! A plugin is a function that registers one or more routes. Third-party
//! plugins follow the same shape and are registered from `main` after these.

pub mod admin;
pub mod example;

use crate::error::Result;
use crate::registry::RouteRegistry;

pub type RegisterFn = fn(&mut RouteRegistry) -> Result<()>;

pub const BUILTIN: &[(&str, RegisterFn)] = &[
    ("admin", admin::register),
    ("example", example::register),
];

/// Register every built-in plugin, stopping at the first failure.
pub fn register_all(registry: &mut RouteRegistry) -> Result<()> {
    for (name, register) in BUILTIN {
        register(registry)?;
        tracing::debug!(target: "route_gateway::plugins", plugin = name, "Plugin loaded");
    }
    Ok(())
}
