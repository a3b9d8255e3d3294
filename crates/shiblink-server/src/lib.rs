//! `shiblink` HTTP server.
//!
//! Wires together the core library, the record store backend and the HTTP
//! routes into a running Axum server. Every route except `/health` passes
//! through the authentication middleware first.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
