use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::identity;

/// Network configuration granted by an Ack, extracted once at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseResult {
    pub ip: Ipv4Addr,
    pub server_id: Ipv4Addr,
    pub lease_time_secs: Option<u32>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub routers: Vec<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// All attempts consumed; timeouts and malformed responses counted
    /// separately.
    RetriesExhausted { timeouts: usize, malformed: usize },
    /// Definitive server rejection, never retried.
    Nak { message: Option<String> },
    /// Transport failure, never retried.
    Io { message: String },
    /// The run was interrupted before this client reached a terminal state.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted {
                timeouts,
                malformed,
            } => write!(
                f,
                "retries exhausted (timeouts={timeouts}, malformed={malformed})"
            ),
            Self::Nak {
                message: Some(message),
            } => write!(f, "server sent NAK: {message}"),
            Self::Nak { message: None } => write!(f, "server sent NAK"),
            Self::Io { message } => write!(f, "transport error: {message}"),
            Self::Cancelled => write!(f, "cancelled before completion"),
        }
    }
}

/// Terminal state of one simulated client: exactly a lease or a reason.
/// `Planned` appears only in dry runs, where no handshake executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum HandshakeStatus {
    Success(LeaseResult),
    Failed(FailureReason),
    Planned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOutcome {
    pub client_index: usize,
    pub mac: String,
    /// Discover cycles started, including the successful one.
    pub attempts: usize,
    pub offer_latency_ms: Option<u128>,
    pub ack_latency_ms: Option<u128>,
    pub status: HandshakeStatus,
}

impl ClientOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, HandshakeStatus::Success(_))
    }

    pub fn lease(&self) -> Option<&LeaseResult> {
        match &self.status {
            HandshakeStatus::Success(lease) => Some(lease),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            HandshakeStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub passed: bool,
    pub checks: Vec<ValidationCheck>,
}

impl ValidationSummary {
    pub fn dry_run() -> Self {
        Self {
            passed: true,
            checks: vec![ValidationCheck {
                name: "dry_run".to_string(),
                passed: true,
                details: "No packets sent; config and identity generation only.".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub iface: Option<String>,
    pub server: SocketAddr,
    pub clients: usize,
    pub concurrency: usize,
    pub ramp_per_sec: usize,
    pub timeout_ms: u64,
    pub retries: usize,
    pub mac_prefix: String,
    pub seed: Option<u64>,
    pub dry_run: bool,
    pub max_failure_rate: f64,
}

impl From<&SimConfig> for RunConfigSnapshot {
    fn from(config: &SimConfig) -> Self {
        Self {
            iface: config.iface.clone(),
            server: config.server,
            clients: config.clients,
            concurrency: config.concurrency,
            ramp_per_sec: config.ramp_per_sec,
            timeout_ms: config.timeout_ms,
            retries: config.retries,
            mac_prefix: identity::format_prefix(&config.mac_prefix),
            seed: config.seed,
            dry_run: config.dry_run,
            max_failure_rate: config.max_failure_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Totals {
    pub planned_clients: usize,
    pub completed_clients: usize,
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timeout_attempts: usize,
    pub malformed_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub duration_ms: u128,
    pub throughput_per_sec: f64,
    pub latency_p50_ms: Option<u128>,
    pub latency_p95_ms: Option<u128>,
    pub latency_p99_ms: Option<u128>,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub config: RunConfigSnapshot,
    pub dry_run: bool,
    pub passed: bool,
    pub totals: Totals,
    pub stats: RuntimeStats,
    pub validation: ValidationSummary,
    pub clients: Vec<ClientOutcome>,
}

impl RunSummary {
    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        output.push_str("DHCP swarm report\n");
        output.push_str(&format!(
            "status: {}\n",
            if self.passed { "PASS" } else { "FAIL" }
        ));
        output.push_str(&format!(
            "target: {} via {}\n",
            self.config.server,
            self.config.iface.as_deref().unwrap_or("default route")
        ));
        output.push_str(&format!(
            "clients: planned={}, completed={}, success={}, failed={}, cancelled={}\n",
            self.totals.planned_clients,
            self.totals.completed_clients,
            self.totals.success,
            self.totals.failed,
            self.totals.cancelled
        ));
        output.push_str(&format!(
            "attempt errors: timeouts={}, malformed={} (failure rate {:.2}%)\n",
            self.totals.timeout_attempts,
            self.totals.malformed_attempts,
            self.stats.failure_rate * 100.0
        ));
        output.push_str(&format!(
            "timing: duration={}ms throughput={:.2}/s p50={:?}ms p95={:?}ms p99={:?}ms\n",
            self.stats.duration_ms,
            self.stats.throughput_per_sec,
            self.stats.latency_p50_ms,
            self.stats.latency_p95_ms,
            self.stats.latency_p99_ms
        ));

        for check in &self.validation.checks {
            output.push_str(&format!(
                "check [{}] {}: {}\n",
                if check.passed { "PASS" } else { "FAIL" },
                check.name,
                check.details
            ));
        }

        for client in &self.clients {
            match &client.status {
                HandshakeStatus::Success(lease) => {
                    output.push_str(&format!(
                        "  {} OK ip={} server={} lease={} mask={} routers={} dns={} attempts={}\n",
                        client.mac,
                        lease.ip,
                        lease.server_id,
                        lease
                            .lease_time_secs
                            .map_or_else(|| "n/a".to_string(), |t| format!("{t}s")),
                        lease
                            .subnet_mask
                            .map_or_else(|| "n/a".to_string(), |m| m.to_string()),
                        join_ips(&lease.routers),
                        join_ips(&lease.dns_servers),
                        client.attempts
                    ));
                }
                HandshakeStatus::Failed(reason) => {
                    output.push_str(&format!(
                        "  {} FAIL {} attempts={}\n",
                        client.mac, reason, client.attempts
                    ));
                }
                HandshakeStatus::Planned => {
                    output.push_str(&format!("  {} planned\n", client.mac));
                }
            }
        }
        output
    }
}

fn join_ips(ips: &[Ipv4Addr]) -> String {
    if ips.is_empty() {
        return "n/a".to_string();
    }
    ips.iter()
        .map(|ip| ip.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
