//! HTTP gateway for Conductor.
//!
//! Serves the session API and the streaming chat endpoint. A chat request
//! starts a workflow run, encodes its events in the requested protocol and
//! streams the frames back as they are produced.

pub mod error;
pub mod routes;
pub mod server;
pub mod state;
pub mod transport;

pub use server::{build_router, start_gateway};
pub use state::GatewayState;
