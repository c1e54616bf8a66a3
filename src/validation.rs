use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::config::SimConfig;
use crate::report::{ClientOutcome, ValidationCheck, ValidationSummary};

/// Server-verification checks over a completed run. Each check is
/// independent; the run passes only when all of them do.
pub fn run_validations(clients: &[ClientOutcome], config: &SimConfig) -> ValidationSummary {
    let mut checks = Vec::new();

    let total = clients.len();
    let success = clients.iter().filter(|client| client.is_success()).count();
    checks.push(ValidationCheck {
        name: "allocation_correctness".to_string(),
        passed: success == total,
        details: format!("{success}/{total} clients completed the DHCPv4 handshake"),
    });

    let duplicate_leases = duplicate_leases(clients);
    checks.push(ValidationCheck {
        name: "no_duplicate_active_leases".to_string(),
        passed: duplicate_leases.is_empty(),
        details: if duplicate_leases.is_empty() {
            "No duplicate leases detected".to_string()
        } else {
            format!("Duplicate leases: {duplicate_leases}")
        },
    });

    let duplicate_macs = duplicate_macs(clients);
    checks.push(ValidationCheck {
        name: "distinct_client_identities".to_string(),
        passed: duplicate_macs.is_empty(),
        details: if duplicate_macs.is_empty() {
            "All clients used distinct hardware addresses".to_string()
        } else {
            format!("Duplicate hardware addresses: {duplicate_macs}")
        },
    });

    let failure_rate = if total == 0 {
        0.0
    } else {
        (total - success) as f64 / total as f64
    };
    checks.push(ValidationCheck {
        name: "failure_rate".to_string(),
        passed: failure_rate <= config.max_failure_rate,
        details: format!(
            "failure rate {:.4} (threshold {:.4})",
            failure_rate, config.max_failure_rate
        ),
    });

    let passed = checks.iter().all(|check| check.passed);
    ValidationSummary { passed, checks }
}

fn duplicate_leases(clients: &[ClientOutcome]) -> String {
    let mut by_ip: HashMap<Ipv4Addr, Vec<usize>> = HashMap::new();
    for client in clients {
        if let Some(lease) = client.lease() {
            by_ip.entry(lease.ip).or_default().push(client.client_index);
        }
    }

    let mut rows = Vec::new();
    for (ip, mut client_ids) in by_ip {
        if client_ids.len() > 1 {
            client_ids.sort_unstable();
            rows.push(format!("{ip}=>{client_ids:?}"));
        }
    }
    rows.sort();
    rows.join(", ")
}

fn duplicate_macs(clients: &[ClientOutcome]) -> String {
    let mut by_mac: HashMap<&str, Vec<usize>> = HashMap::new();
    for client in clients {
        by_mac
            .entry(client.mac.as_str())
            .or_default()
            .push(client.client_index);
    }

    let mut rows = Vec::new();
    for (mac, mut client_ids) in by_mac {
        if client_ids.len() > 1 {
            client_ids.sort_unstable();
            rows.push(format!("{mac}=>{client_ids:?}"));
        }
    }
    rows.sort();
    rows.join(", ")
}
