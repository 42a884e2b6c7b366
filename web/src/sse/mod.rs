//! SSE HTTP handler for the web layer.
//!
//! This module contains only the Axum handler for the subscribe endpoint.
//! The connection pool and message types live in the `sse` crate.

pub mod handler;
