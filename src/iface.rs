use pnet::datalink;
use serde::{Deserialize, Serialize};

/// Descriptor for one local network interface, for the CLI listing feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub index: u32,
    pub mac: Option<String>,
    pub ips: Vec<String>,
    pub up: bool,
    pub loopback: bool,
}

pub fn list() -> Vec<InterfaceInfo> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| InterfaceInfo {
            name: iface.name.clone(),
            index: iface.index,
            mac: iface.mac.map(|mac| mac.to_string()),
            ips: iface.ips.iter().map(|net| net.to_string()).collect(),
            up: iface.is_up(),
            loopback: iface.is_loopback(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #[test]
    fn listing_does_not_panic() {
        // environment-dependent contents; only the shape is stable
        let _ = super::list();
    }
}
