//! Utility modules for the request security pipeline.
//! This module contains the error type, logging and metrics helpers
//! shared across the application.

mod error;
mod logging;
pub mod metrics;

pub use logging::{
    init_logging,
    create_request_span,
    log_block_hit,
    log_ddos_detection,
    log_auto_block,
    log_stage_failure,
    log_admin_event,
};

pub use error::{SecurityError, SecurityResult};
