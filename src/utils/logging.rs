use std::env;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Initialize the logging system with the level taken from `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_level(true)
        .try_init();

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Create a new span for one run of the security pipeline
pub fn create_request_span(request_id: &str, client_key: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        request_id = %request_id,
        client = %client_key,
        path = %path,
    )
}

/// Log a request rejected by the blocklist
pub fn log_block_hit(client_key: &str, reason: &str) {
    tracing::warn!(
        client = %client_key,
        reason = %reason,
        event = "blocklist_hit",
        timestamp = %chrono::Utc::now()
    );
}

/// Log a DDoS detection event
pub fn log_ddos_detection(client_key: &str, burst_count: u64, sustained_count: u64, score: f64) {
    tracing::error!(
        client = %client_key,
        burst_count = %burst_count,
        sustained_count = %sustained_count,
        score = %score,
        event = "ddos_detected",
        timestamp = %chrono::Utc::now()
    );
}

/// Log the installation or extension of an auto-block
pub fn log_auto_block(client_key: &str, offenses: u32, ttl_secs: u64) {
    tracing::warn!(
        client = %client_key,
        offenses = %offenses,
        ttl_secs = %ttl_secs,
        event = "auto_block",
        timestamp = %chrono::Utc::now()
    );
}

/// Log a pipeline stage that failed and was settled as "allow"
pub fn log_stage_failure(stage: &str, client_key: &str, error: &dyn std::fmt::Display) {
    tracing::error!(
        stage = %stage,
        client = %client_key,
        error = %error,
        event = "stage_failed_open",
        timestamp = %chrono::Utc::now()
    );
}

/// Log an administrative blocklist event
pub fn log_admin_event(event_type: &str, success: bool, details: Option<&str>) {
    if success {
        tracing::info!(
            event_type = %event_type,
            success = %success,
            details = ?details,
            timestamp = %chrono::Utc::now()
        );
    } else {
        tracing::error!(
            event_type = %event_type,
            success = %success,
            details = ?details,
            timestamp = %chrono::Utc::now()
        );
    }
}
