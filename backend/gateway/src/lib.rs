//! Persona Gateway HTTP API Server
//!
//! Exposes the plugin hot-reload manager as a REST API with structured
//! success/error payloads.

pub mod plugins_api;
pub mod server;

pub use server::{router, start_server, GatewayState};
