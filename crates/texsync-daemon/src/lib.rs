//! texsync-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod connection;
pub mod native_fs;
pub mod server;

// Re-export key types for convenience
pub use config::{ConfigError, DaemonConfig};
pub use connection::{ClientConnection, ConnectionEvent};
pub use native_fs::NativeFs;
pub use server::{ServerEvent, WebSocketServer};
