//! Request-time security pipeline: client identification, IP blocklist and
//! DDoS traffic-anomaly detection in front of an axum application.

pub mod admin;
pub mod config;
pub mod core;
pub mod error;
pub mod middleware;
pub mod service;
pub mod store;
pub mod utils;

pub use error::ServiceError;
pub use middleware::{SecurityContext, SecurityMiddleware};
pub use service::{build_router, build_state, AppState};
