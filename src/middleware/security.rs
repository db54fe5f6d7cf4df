use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::{
    ClientIdentifier, DdosProtectionService, Detector, IpBlockingService, SecurityHeadersService, SocketPeer,
};
use crate::error::{ServiceError, DDOS_BLOCKED_REASON};
use crate::utils::{create_request_span, log_block_hit, log_stage_failure, metrics, SecurityResult};

/// Per-request security metadata attached for downstream handlers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub client_ip: String,
    pub user_agent: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Fallible pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BlocklistCheck,
    TrafficMonitor,
    DdosBlockCheck,
}

impl Stage {
    pub const PIPELINE: [Stage; 3] = [Stage::BlocklistCheck, Stage::TrafficMonitor, Stage::DdosBlockCheck];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BlocklistCheck => "blocklist_check",
            Stage::TrafficMonitor => "traffic_monitor",
            Stage::DdosBlockCheck => "ddos_block_check",
        }
    }
}

/// Decision of one stage
#[derive(Debug)]
pub enum Verdict {
    Allow,
    Reject(ServiceError),
}

/// Result of a whole pipeline run
#[derive(Debug)]
pub enum PipelineOutcome {
    Forward(SecurityContext),
    Reject(ServiceError),
}

/// Runs the security checks in front of every request.
///
/// Stage errors never reach the caller: a stage that fails is settled as
/// [`Verdict::Allow`], logged, and the pipeline moves on.
pub struct SecurityMiddleware {
    identifier: ClientIdentifier,
    blocking: Arc<IpBlockingService>,
    ddos: Arc<DdosProtectionService>,
    headers: Arc<SecurityHeadersService>,
}

impl SecurityMiddleware {
    /// Assemble the pipeline from its services
    pub fn new(
        identifier: ClientIdentifier,
        blocking: Arc<IpBlockingService>,
        ddos: Arc<DdosProtectionService>,
        headers: Arc<SecurityHeadersService>,
    ) -> Self {
        Self {
            identifier,
            blocking,
            ddos,
            headers,
        }
    }

    /// Headers applied to forwarded responses
    pub fn headers(&self) -> &SecurityHeadersService {
        &self.headers
    }

    /// Run the pipeline for one request
    pub async fn evaluate(
        &self,
        headers: &HeaderMap,
        path: &str,
        connection_remote: Option<&str>,
        socket_remote: Option<&str>,
    ) -> PipelineOutcome {
        metrics::record_request();

        let client_key = self.identifier.resolve(headers, connection_remote, socket_remote);
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let span = create_request_span(&Uuid::new_v4().to_string(), &client_key, path);
        async move {
            for stage in Stage::PIPELINE {
                let result = self.run_stage(stage, &client_key, &user_agent, path).await;
                if let Verdict::Reject(error) = self.settle(stage, &client_key, result) {
                    metrics::record_rejection(error.kind());
                    return PipelineOutcome::Reject(error);
                }
            }

            PipelineOutcome::Forward(SecurityContext {
                client_ip: client_key,
                user_agent,
                timestamp: Utc::now().timestamp_millis(),
            })
        }
        .instrument(span)
        .await
    }

    async fn run_stage(&self, stage: Stage, client_key: &str, user_agent: &str, path: &str) -> SecurityResult<Verdict> {
        match stage {
            Stage::BlocklistCheck => {
                let check = self.blocking.should_block_request(client_key, user_agent, path).await?;
                if !check.should_block {
                    return Ok(Verdict::Allow);
                }
                if check.detector == Some(Detector::TrafficAnomaly) {
                    log_block_hit(client_key, DDOS_BLOCKED_REASON);
                    return Ok(Verdict::Reject(ServiceError::DdosBlocked));
                }
                let reason = check.reason.unwrap_or_else(|| "Blocked".to_string());
                log_block_hit(client_key, &reason);
                Ok(Verdict::Reject(ServiceError::Blocked { reason }))
            }
            Stage::TrafficMonitor => {
                let decision = self.ddos.monitor_traffic(client_key, path, user_agent).await?;
                Ok(if decision.is_attack {
                    Verdict::Reject(ServiceError::DdosDetected)
                } else {
                    Verdict::Allow
                })
            }
            Stage::DdosBlockCheck => Ok(if self.ddos.is_ip_blocked_for_ddos(client_key).await? {
                Verdict::Reject(ServiceError::DdosBlocked)
            } else {
                Verdict::Allow
            }),
        }
    }

    /// Default-allow policy applied to every stage result
    fn settle(&self, stage: Stage, client_key: &str, result: SecurityResult<Verdict>) -> Verdict {
        match result {
            Ok(verdict) => verdict,
            Err(e) => {
                log_stage_failure(stage.as_str(), client_key, &e);
                metrics::record_stage_failure(stage.as_str());
                Verdict::Allow
            }
        }
    }
}

/// axum adapter for [`SecurityMiddleware`].
///
/// Rejections are answered directly; forwarded requests get a
/// [`SecurityContext`] extension and their response gets the security headers.
pub async fn security_layer(
    State(shield): State<Arc<SecurityMiddleware>>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let connection = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    let socket = parts
        .extensions
        .get::<SocketPeer>()
        .map(|SocketPeer(addr)| addr.to_string());

    let outcome = shield
        .evaluate(&parts.headers, parts.uri.path(), connection.as_deref(), socket.as_deref())
        .await;

    match outcome {
        PipelineOutcome::Reject(error) => error.into_response(),
        PipelineOutcome::Forward(context) => {
            parts.extensions.insert(context);
            let mut response = next.run(Request::from_parts(parts, body)).await;
            shield.headers().apply(response.headers_mut());
            response
        }
    }
}
