use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::identity;

pub const DEFAULT_CONCURRENCY: usize = 64;
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_RETRIES: usize = 3;
pub const DEFAULT_MAC_PREFIX: &str = "02";
pub const DEFAULT_MAX_FAILURE_RATE: f64 = 1.0;
pub const DEFAULT_LOG: &str = "info";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "dhcp-swarm",
    about = "Concurrent DHCPv4 handshake simulator for functional and load testing"
)]
pub struct Cli {
    /// network interface to send through (SO_BINDTODEVICE); kernel routing decides if unset
    #[arg(long)]
    pub iface: Option<String>,
    /// number of simulated clients
    #[arg(long, default_value_t = 1)]
    pub clients: usize,
    /// DHCP server address; broadcasts to 255.255.255.255:67 if unset
    #[arg(long)]
    pub server: Option<SocketAddr>,

    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,
    /// client launches per second, 0 = no ramp
    #[arg(long, default_value_t = 0)]
    pub ramp_per_sec: usize,
    /// per-attempt response timeout
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,
    /// retries after the initial attempt on timeout or malformed response
    #[arg(long, default_value_t = DEFAULT_RETRIES)]
    pub retries: usize,

    /// colon-separated hex octets (at most 5) fixed at the start of every generated MAC
    #[arg(long, default_value = DEFAULT_MAC_PREFIX)]
    pub mac_prefix: String,
    /// seed for reproducible identity generation
    #[arg(long)]
    pub seed: Option<u64>,
    /// use this exact hardware address instead of generating one (requires --clients 1)
    #[arg(long)]
    pub mac: Option<String>,

    /// local UDP port to bind; 0 picks an ephemeral port
    #[arg(long, default_value_t = dhcproto::v4::CLIENT_PORT)]
    pub client_port: u16,

    #[arg(long)]
    pub json: bool,
    #[arg(long)]
    pub dry_run: bool,
    /// print available network interfaces and exit
    #[arg(long)]
    pub list_interfaces: bool,

    /// fraction of failed clients above which the run is marked failed
    #[arg(long, default_value_t = DEFAULT_MAX_FAILURE_RATE)]
    pub max_failure_rate: f64,
    /// log filter directives, e.g. "debug" or "dhcp_swarm=trace"
    #[arg(long, env = "SWARM_LOG", default_value = DEFAULT_LOG)]
    pub log: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub iface: Option<String>,
    pub clients: usize,
    pub server: SocketAddr,
    pub client_port: u16,
    pub concurrency: usize,
    pub ramp_per_sec: usize,
    pub timeout_ms: u64,
    pub retries: usize,
    pub mac_prefix: Vec<u8>,
    pub seed: Option<u64>,
    pub mac: Option<[u8; 6]>,
    pub dry_run: bool,
    pub max_failure_rate: f64,
}

impl SimConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TryFrom<Cli> for SimConfig {
    type Error = anyhow::Error;

    fn try_from(args: Cli) -> Result<Self> {
        if args.clients == 0 {
            bail!("--clients must be greater than 0");
        }
        if args.concurrency == 0 {
            bail!("--concurrency must be greater than 0");
        }
        if args.timeout_ms == 0 {
            bail!("--timeout-ms must be greater than 0");
        }
        if !(0.0..=1.0).contains(&args.max_failure_rate) {
            bail!("--max-failure-rate must be between 0.0 and 1.0");
        }

        let mac_prefix = identity::parse_mac_prefix(&args.mac_prefix)
            .with_context(|| format!("invalid --mac-prefix `{}`", args.mac_prefix))?;

        let mac = args
            .mac
            .as_deref()
            .map(identity::parse_mac)
            .transpose()
            .with_context(|| format!("invalid --mac `{}`", args.mac.as_deref().unwrap_or("")))?;
        if mac.is_some() && args.clients != 1 {
            bail!("--mac implies a single client; use --mac-prefix for multi-client runs");
        }

        let server = match args.server {
            Some(SocketAddr::V4(addr)) => SocketAddr::V4(addr),
            Some(SocketAddr::V6(_)) => bail!("--server must be an IPv4 socket address"),
            None => SocketAddr::from((Ipv4Addr::BROADCAST, dhcproto::v4::SERVER_PORT)),
        };

        Ok(Self {
            iface: args.iface,
            clients: args.clients,
            server,
            client_port: args.client_port,
            concurrency: args.concurrency,
            ramp_per_sec: args.ramp_per_sec,
            timeout_ms: args.timeout_ms,
            retries: args.retries,
            mac_prefix,
            seed: args.seed,
            mac,
            dry_run: args.dry_run,
            max_failure_rate: args.max_failure_rate,
        })
    }
}

pub mod trace {
    //! tracing configuration

    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
    };

    /// Install the global subscriber. Logs go to stderr so report output on
    /// stdout stays machine-readable.
    pub fn init(directives: &str) -> Result<()> {
        let filter = EnvFilter::try_new(directives).or_else(|_| EnvFilter::try_new("info"))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        Ok(())
    }
}
