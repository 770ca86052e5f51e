//! Profiles the gateway serves itself, without any plugin.
//!
//! Handlers are resolved from a static map built once at startup; profile
//! names not in the map fall through to plugin delivery.

mod authorization;
mod availability;
mod discovery;
mod system;

pub use authorization::AuthorizationHandler;
pub use availability::AvailabilityHandler;
pub use discovery::ServiceDiscoveryHandler;
pub use system::SystemHandler;

/// Profile names served by the gateway (lowercase).
pub const BUILTIN_PROFILES: [&str; 4] =
    ["availability", "servicediscovery", "authorization", "system"];
