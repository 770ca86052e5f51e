//! Transport adapters
//!
//! Every transport normalizes its traffic into the canonical model and runs
//! it through the same router pipeline; nothing transport-specific survives
//! past this module. HTTP and WebSocket are axum routes; the native channel
//! binds an in-process mpsc pair for embedded plugin hosts and tests.

mod files;
pub mod http;
mod native;
pub mod ws;

pub use files::FileStore;
pub use native::NativeChannel;
