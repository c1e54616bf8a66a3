use clap::Parser;
use tokio_util::sync::CancellationToken;

use dhcp_swarm::{Cli, SimConfig, run_simulation};

#[tokio::test]
async fn dry_run_smoke() {
    let cli = Cli::try_parse_from([
        "dhcp-swarm",
        "--clients",
        "10",
        "--seed",
        "7",
        "--dry-run",
    ])
    .expect("cli parse");

    let config = SimConfig::try_from(cli).expect("config parse");
    let summary = run_simulation(config, CancellationToken::new())
        .await
        .expect("dry run report");

    assert!(summary.passed);
    assert!(summary.dry_run);
    assert_eq!(summary.clients.len(), 10);
    assert_eq!(summary.totals.planned_clients, 10);
    assert_eq!(summary.totals.completed_clients, 0);

    let macs: std::collections::HashSet<_> =
        summary.clients.iter().map(|c| c.mac.clone()).collect();
    assert_eq!(macs.len(), 10, "identities must be distinct");
}

#[tokio::test]
async fn dry_run_is_reproducible_with_seed() {
    let parse = || {
        let cli = Cli::try_parse_from([
            "dhcp-swarm",
            "--clients",
            "16",
            "--seed",
            "42",
            "--mac-prefix",
            "02:ab",
            "--dry-run",
        ])
        .expect("cli parse");
        SimConfig::try_from(cli).expect("config parse")
    };

    let first = run_simulation(parse(), CancellationToken::new())
        .await
        .expect("first dry run");
    let second = run_simulation(parse(), CancellationToken::new())
        .await
        .expect("second dry run");

    let macs = |summary: &dhcp_swarm::RunSummary| {
        summary
            .clients
            .iter()
            .map(|c| c.mac.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(macs(&first), macs(&second));
    assert!(first.clients.iter().all(|c| c.mac.starts_with("02:ab")));
}
