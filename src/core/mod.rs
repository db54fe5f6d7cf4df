//! Core components of the request security pipeline: client identification,
//! the blocklist, traffic-anomaly detection and the response header set.

pub mod client_ip;
pub mod ddos_protection;
pub mod headers;
pub mod ip_blocking;
pub mod traffic_window;
pub mod types;

pub use client_ip::{normalize_address, ClientIdentifier, HeaderProbe, SocketPeer, UNKNOWN_CLIENT};
pub use ddos_protection::{DdosProtectionService, DDOS_BLOCK_REASON};
pub use headers::SecurityHeadersService;
pub use ip_blocking::IpBlockingService;
pub use types::{AttackDecision, BlockCheckResult, BlockEntry, BlockSource, Detector, Horizon, TrafficStats};
