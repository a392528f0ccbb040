//! Shared types and the cluster plugin boundary, used by every other jobmon
//! crate: status vocabularies, wire DTOs, the `Requester` HTTP client, and
//! configuration loading.

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod plugin;
pub mod wire;

pub use client::Requester;
pub use config::JobmonConfig;
