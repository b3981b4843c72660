//! Core types, config, errors, agent events, and session model for Conductor.

pub mod config;
pub mod error;
pub mod event;
pub mod session;
pub mod session_store;
pub mod types;
