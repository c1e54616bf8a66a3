use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SimConfig;
use crate::handshake;
use crate::identity::{ClientIdentity, IdentityGenerator};
use crate::report::{
    ClientOutcome, FailureReason, HandshakeStatus, RunConfigSnapshot, RunSummary, RuntimeStats,
    Totals, ValidationSummary,
};
use crate::transport::udp::UdpTransport;
use crate::validation;

/// Run the full simulation: generate the identity roster, fan out one
/// handshake task per client under the concurrency cap, and aggregate the
/// outcomes. Cancelling `shutdown` stops new launches and interrupts
/// in-flight waits; interrupted clients are marked `Cancelled`.
pub async fn run(config: SimConfig, shutdown: CancellationToken) -> Result<RunSummary> {
    let started = Instant::now();
    let identities = roster(&config).context("generate client identities")?;

    if config.dry_run {
        return Ok(build_dry_run_summary(&config, identities));
    }

    let transport = Arc::new(
        UdpTransport::bind(config.iface.as_deref(), config.client_port)
            .context("bind DHCP transport")?,
    );

    info!(
        clients = config.clients,
        concurrency = config.concurrency,
        server = %config.server,
        "starting simulation"
    );

    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let ramp_delay = ramp_delay(config.ramp_per_sec);

    let mut tasks = JoinSet::new();
    for identity in identities {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("cancellation requested, not launching further clients");
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => {
                permit.context("acquire concurrency permit")?
            }
        };

        let config = config.clone();
        let transport = Arc::clone(&transport);
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => None,
                outcome = handshake::run(&identity, &config, &transport) => Some(outcome),
            };
            outcome.unwrap_or_else(|| cancelled_outcome(&identity))
        });

        if let Some(delay) = ramp_delay {
            tokio::time::sleep(delay).await;
        }
    }

    let mut clients = Vec::with_capacity(config.clients);
    while let Some(joined) = tasks.join_next().await {
        clients.push(joined.context("client task join failed")?);
    }
    clients.sort_by_key(|client| client.client_index);

    let totals = compute_totals(&clients, config.clients);
    let stats = compute_stats(&clients, started.elapsed(), &totals);
    let validation = validation::run_validations(&clients, &config);
    let passed = validation.passed;

    Ok(RunSummary {
        config: RunConfigSnapshot::from(&config),
        dry_run: false,
        passed,
        totals,
        stats,
        validation,
        clients,
    })
}

fn roster(config: &SimConfig) -> Result<Vec<ClientIdentity>> {
    if let Some(mac) = config.mac {
        // explicit single-client identity, used verbatim
        return Ok(vec![ClientIdentity {
            client_index: 0,
            mac,
        }]);
    }
    let identities = IdentityGenerator::new(config.mac_prefix.clone(), config.seed)
        .generate(config.clients)?;
    Ok(identities)
}

fn cancelled_outcome(identity: &ClientIdentity) -> ClientOutcome {
    ClientOutcome {
        client_index: identity.client_index,
        mac: identity.mac_string(),
        attempts: 0,
        offer_latency_ms: None,
        ack_latency_ms: None,
        status: HandshakeStatus::Failed(FailureReason::Cancelled),
    }
}

fn build_dry_run_summary(config: &SimConfig, identities: Vec<ClientIdentity>) -> RunSummary {
    let clients = identities
        .into_iter()
        .map(|identity| ClientOutcome {
            client_index: identity.client_index,
            mac: identity.mac_string(),
            attempts: 0,
            offer_latency_ms: None,
            ack_latency_ms: None,
            status: HandshakeStatus::Planned,
        })
        .collect::<Vec<_>>();

    RunSummary {
        config: RunConfigSnapshot::from(config),
        dry_run: true,
        passed: true,
        totals: Totals {
            planned_clients: config.clients,
            completed_clients: 0,
            success: 0,
            failed: 0,
            cancelled: 0,
            timeout_attempts: 0,
            malformed_attempts: 0,
        },
        stats: RuntimeStats {
            duration_ms: 0,
            throughput_per_sec: 0.0,
            latency_p50_ms: None,
            latency_p95_ms: None,
            latency_p99_ms: None,
            failure_rate: 0.0,
        },
        validation: ValidationSummary::dry_run(),
        clients,
    }
}

fn ramp_delay(ramp_per_sec: usize) -> Option<Duration> {
    if ramp_per_sec == 0 {
        None
    } else {
        Some(Duration::from_secs_f64(1.0 / ramp_per_sec as f64))
    }
}

fn compute_totals(clients: &[ClientOutcome], planned_clients: usize) -> Totals {
    let success = clients.iter().filter(|client| client.is_success()).count();
    let cancelled = clients
        .iter()
        .filter(|client| matches!(client.failure(), Some(FailureReason::Cancelled)))
        .count();
    let failed = clients.len() - success - cancelled;

    let (timeout_attempts, malformed_attempts) =
        clients
            .iter()
            .fold((0, 0), |(t, m), client| match client.failure() {
                Some(FailureReason::RetriesExhausted {
                    timeouts,
                    malformed,
                }) => (t + timeouts, m + malformed),
                _ => (t, m),
            });

    Totals {
        planned_clients,
        completed_clients: clients.len(),
        success,
        failed,
        cancelled,
        timeout_attempts,
        malformed_attempts,
    }
}

fn compute_stats(clients: &[ClientOutcome], duration: Duration, totals: &Totals) -> RuntimeStats {
    let duration_ms = duration.as_millis();
    let duration_secs = duration.as_secs_f64().max(1e-9);

    let throughput_per_sec = totals.completed_clients as f64 / duration_secs;
    let failure_rate = if totals.completed_clients == 0 {
        0.0
    } else {
        (totals.completed_clients - totals.success) as f64 / totals.completed_clients as f64
    };

    let mut latencies = clients
        .iter()
        .flat_map(|client| [client.offer_latency_ms, client.ack_latency_ms])
        .flatten()
        .collect::<Vec<_>>();
    latencies.sort_unstable();

    RuntimeStats {
        duration_ms,
        throughput_per_sec,
        latency_p50_ms: percentile(&latencies, 0.50),
        latency_p95_ms: percentile(&latencies, 0.95),
        latency_p99_ms: percentile(&latencies, 0.99),
        failure_rate,
    }
}

fn percentile(values: &[u128], p: f64) -> Option<u128> {
    if values.is_empty() {
        return None;
    }
    let index = ((values.len() - 1) as f64 * p).round() as usize;
    values.get(index).copied()
}
