use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dhcp_swarm::config::trace;
use dhcp_swarm::{Cli, SimConfig, iface, run_simulation};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let output_json = cli.json;

    if let Err(err) = trace::init(&cli.log) {
        eprintln!("failed to initialize logging: {err:#}");
        std::process::exit(2);
    }

    if cli.list_interfaces {
        for info in iface::list() {
            let mut flags = Vec::new();
            if info.up {
                flags.push("up");
            }
            if info.loopback {
                flags.push("loopback");
            }
            println!(
                "{} (index {}) mac={} ips={} {}",
                info.name,
                info.index,
                info.mac.as_deref().unwrap_or("n/a"),
                if info.ips.is_empty() {
                    "n/a".to_string()
                } else {
                    info.ips.join(",")
                },
                flags.join(",")
            );
        }
        return;
    }

    let config = match SimConfig::try_from(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    match run_simulation(config, shutdown).await {
        Ok(summary) => {
            if output_json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        eprintln!("failed to serialize report: {err:#}");
                        std::process::exit(2);
                    }
                }
            } else {
                println!("{}", summary.human_summary());
            }

            if summary.passed {
                std::process::exit(0);
            }

            std::process::exit(1);
        }
        Err(err) => {
            error!(?err, "run failed");
            eprintln!("run failed: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("interrupt received, winding down");
    }
    shutdown.cancel();
}
