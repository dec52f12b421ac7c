//! Live channels: the connection registry, broadcast fan-out and the
//! per-client connection handler.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod registry;
