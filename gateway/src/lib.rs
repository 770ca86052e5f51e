pub mod auth;
pub mod config;
pub mod errors;
pub mod event;
pub mod plugin;
pub mod router;
pub mod routes;
pub mod state;
pub mod transport;

// Re-export commonly used items for convenience
pub use config::GatewayConfig;
pub use errors::GatewayError;
pub use plugin::{PluginEndpoint, PluginRegistry};
pub use state::AppState;
pub use transport::NativeChannel;
