//! Owned in-memory stores for projects and registered services.
//!
//! Each registry guards its state with one internal lock; callers never hold
//! two registry locks at once.

mod projects;
mod services;

pub use projects::ProjectRegistry;
pub use services::ServiceRegistry;
