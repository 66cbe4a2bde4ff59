//! Orra control plane server.
//!
//! HTTP surface and worker channel endpoint on top of the orchestration
//! engine.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use routes::{router, VERSION_HEADER};
pub use state::{build_state, AppState};
