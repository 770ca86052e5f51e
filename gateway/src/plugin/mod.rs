//! Plugin system for the devicehub gateway
//!
//! Plugins are out-of-process peers that register a [`PluginDescriptor`] and
//! an addressable message channel. The gateway delivers canonical requests
//! over that channel and receives responses and events back through its own
//! inbox.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ transport ──▶ router ──▶ registry.resolve(serviceId)
//!                                        │
//!                                        ▼
//!                               PluginChannel::send(Request)
//!                                        │
//!                     gateway inbox ◀────┘ (Response / Event)
//! ```
//!
//! Service ids are qualified on the way out (`localId.pluginId`) and split
//! from the right on the way in, so two plugins exposing the same local
//! service id never collide.

mod channel;
mod registry;

pub use channel::{MpscChannel, PluginChannel, PluginEndpoint};
pub use registry::{PluginRegistry, RegisteredPlugin, SERVICE_ID_SEPARATOR};
