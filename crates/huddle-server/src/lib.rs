//! # huddle-server
//!
//! The HTTP + WebSocket surface: configuration, health, graceful shutdown,
//! the `/ws` session loop, and the REST triggers for workflow execution and
//! message fan-out.

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, HuddleServer};
pub use shutdown::ShutdownCoordinator;
