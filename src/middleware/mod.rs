//! Request-time security pipeline and its axum adapter.

mod security;

pub use security::{security_layer, PipelineOutcome, SecurityContext, SecurityMiddleware, Stage, Verdict};
