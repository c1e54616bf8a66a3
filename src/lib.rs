pub mod config;
pub mod engine;
pub mod handshake;
pub mod identity;
pub mod iface;
pub mod report;
pub mod transport;
pub mod validation;

use tokio_util::sync::CancellationToken;

pub use config::{Cli, SimConfig};
pub use report::RunSummary;

/// Run one simulation to completion. Cancelling `shutdown` stops issuing
/// new handshakes and interrupts in-flight ones without hanging.
pub async fn run_simulation(
    config: SimConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<RunSummary> {
    engine::run(config, shutdown).await
}
