//! HTTP and WebSocket surface for the parlor chat backend.
//!
//! A [`ParlorServer`] owns one [`ConnectionRegistry`] and one
//! [`BroadcastEngine`]. Every accepted socket is driven by a
//! [`ConnectionHandler`]; `POST /messages` goes through the same engine.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AuthError, AuthService, TokenIssuer};
pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;
pub use server::{AppState, ParlorServer};
pub use shutdown::ShutdownCoordinator;
pub use websocket::broadcast::{BroadcastEngine, FanOut};
pub use websocket::handler::{CloseReason, ConnectionHandler, HandlerSettings, HandlerState};
pub use websocket::registry::ConnectionRegistry;
