//! Chat relay.
//!
//! Forwards browser chat messages to an OpenAI-compatible completion API and
//! streams the reply back as Server-Sent Events.

pub mod backend;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod streaming;

pub use config::Config;
pub use error::RelayError;
