use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A 6-octet MAC leaves room for at most 5 fixed prefix octets; the explicit
/// `--mac` path covers the fully-specified case.
pub const MAX_PREFIX_OCTETS: usize = 5;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("mac prefix may contain at most {MAX_PREFIX_OCTETS} octets, got {0}")]
    PrefixTooLong(usize),
    #[error("invalid mac octet `{0}`")]
    InvalidOctet(String),
    #[error("invalid mac address `{0}`, expected 6 colon-separated hex octets")]
    InvalidMac(String),
    #[error("prefix leaves room for {available} unique addresses, {requested} requested")]
    Exhaustion { available: u64, requested: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub client_index: usize,
    pub mac: [u8; 6],
}

impl ClientIdentity {
    pub fn mac_string(&self) -> String {
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.mac[0], self.mac[1], self.mac[2], self.mac[3], self.mac[4], self.mac[5]
        )
    }
}

/// Derives distinct hardware addresses under a fixed prefix. With a seed the
/// sequence is fully reproducible; without one it draws from OS entropy.
#[derive(Debug, Clone)]
pub struct IdentityGenerator {
    prefix: Vec<u8>,
    seed: Option<u64>,
}

impl IdentityGenerator {
    pub fn new(prefix: Vec<u8>, seed: Option<u64>) -> Self {
        Self { prefix, seed }
    }

    /// Produce `count` distinct identities, or fail before issuing any when
    /// the suffix space under the prefix cannot hold them.
    pub fn generate(&self, count: usize) -> Result<Vec<ClientIdentity>, IdentityError> {
        if self.prefix.len() > 6 {
            return Err(IdentityError::PrefixTooLong(self.prefix.len()));
        }
        let free_octets = 6 - self.prefix.len();
        let available = 1u64 << (8 * free_octets as u32);
        if count as u64 > available {
            return Err(IdentityError::Exhaustion {
                available,
                requested: count,
            });
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut seen = HashSet::with_capacity(count);
        let mut identities = Vec::with_capacity(count);
        for client_index in 0..count {
            let mac = loop {
                let mut mac = [0u8; 6];
                mac[..self.prefix.len()].copy_from_slice(&self.prefix);
                rng.fill_bytes(&mut mac[self.prefix.len()..]);
                if seen.insert(mac) {
                    break mac;
                }
            };
            identities.push(ClientIdentity { client_index, mac });
        }
        Ok(identities)
    }
}

/// Parse a colon-separated hex prefix of 0 to [`MAX_PREFIX_OCTETS`] octets.
/// The empty string is the empty prefix.
pub fn parse_mac_prefix(raw: &str) -> Result<Vec<u8>, IdentityError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() > MAX_PREFIX_OCTETS {
        return Err(IdentityError::PrefixTooLong(parts.len()));
    }
    parts.into_iter().map(parse_octet).collect()
}

/// Parse a full 6-octet hardware address.
pub fn parse_mac(raw: &str) -> Result<[u8; 6], IdentityError> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 6 {
        return Err(IdentityError::InvalidMac(raw.to_string()));
    }
    let mut mac = [0u8; 6];
    for (slot, part) in mac.iter_mut().zip(parts) {
        *slot = parse_octet(part)?;
    }
    Ok(mac)
}

fn parse_octet(part: &str) -> Result<u8, IdentityError> {
    if part.is_empty() || part.len() > 2 {
        return Err(IdentityError::InvalidOctet(part.to_string()));
    }
    u8::from_str_radix(part, 16).map_err(|_| IdentityError::InvalidOctet(part.to_string()))
}

pub fn format_prefix(prefix: &[u8]) -> String {
    prefix
        .iter()
        .map(|octet| format!("{octet:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{IdentityError, IdentityGenerator, parse_mac, parse_mac_prefix};

    #[test]
    fn deterministic_for_same_seed() {
        let prefix = parse_mac_prefix("02:ab").expect("prefix parses");
        let gen_a = IdentityGenerator::new(prefix.clone(), Some(42));
        let gen_b = IdentityGenerator::new(prefix, Some(42));

        let ids_a = gen_a.generate(64).expect("generate");
        let ids_b = gen_b.generate(64).expect("generate");

        assert_eq!(
            ids_a.iter().map(|id| id.mac).collect::<Vec<_>>(),
            ids_b.iter().map(|id| id.mac).collect::<Vec<_>>()
        );
    }

    #[test]
    fn seeds_diverge() {
        let gen_a = IdentityGenerator::new(vec![0x02], Some(1));
        let gen_b = IdentityGenerator::new(vec![0x02], Some(2));

        let macs_a: Vec<_> = gen_a.generate(8).unwrap().iter().map(|id| id.mac).collect();
        let macs_b: Vec<_> = gen_b.generate(8).unwrap().iter().map(|id| id.mac).collect();
        assert_ne!(macs_a, macs_b);
    }

    #[test]
    fn unique_within_run() {
        let generator = IdentityGenerator::new(vec![0x02], Some(7));
        let identities = generator.generate(1000).expect("generate");

        let mut seen = HashSet::new();
        for id in &identities {
            assert!(seen.insert(id.mac), "duplicate mac {}", id.mac_string());
            assert_eq!(id.mac[0], 0x02);
        }
        assert_eq!(identities.len(), 1000);
    }

    #[test]
    fn prefix_is_honored() {
        let prefix = parse_mac_prefix("de:ad:be").expect("prefix parses");
        let generator = IdentityGenerator::new(prefix, Some(3));
        for id in generator.generate(100).expect("generate") {
            assert_eq!(&id.mac[..3], &[0xde, 0xad, 0xbe]);
        }
    }

    #[test]
    fn exhaustion_fails_fast() {
        // 5 fixed octets leave one free octet: 256 addresses
        let prefix = parse_mac_prefix("02:00:00:00:01").expect("prefix parses");
        let generator = IdentityGenerator::new(prefix, Some(1));

        let err = generator.generate(300).expect_err("space too small");
        assert!(matches!(
            err,
            IdentityError::Exhaustion {
                available: 256,
                requested: 300
            }
        ));
    }

    #[test]
    fn full_suffix_space_can_be_drained() {
        let prefix = parse_mac_prefix("02:00:00:00:01").expect("prefix parses");
        let generator = IdentityGenerator::new(prefix, Some(9));

        let identities = generator.generate(256).expect("exactly fits");
        let seen: HashSet<_> = identities.iter().map(|id| id.mac).collect();
        assert_eq!(seen.len(), 256);
    }

    #[test]
    fn prefix_parse_errors() {
        assert!(matches!(
            parse_mac_prefix("02:aa:bb:cc:dd:ee"),
            Err(IdentityError::PrefixTooLong(6))
        ));
        assert!(matches!(
            parse_mac_prefix("02:zz"),
            Err(IdentityError::InvalidOctet(_))
        ));
        assert!(matches!(
            parse_mac_prefix("02::aa"),
            Err(IdentityError::InvalidOctet(_))
        ));
        assert_eq!(parse_mac_prefix("").expect("empty prefix"), Vec::<u8>::new());
    }

    #[test]
    fn parse_full_mac() {
        assert_eq!(
            parse_mac("02:aa:bb:cc:dd:ee").expect("mac parses"),
            [0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]
        );
        assert!(parse_mac("02:aa:bb").is_err());
        assert!(parse_mac("02:aa:bb:cc:dd:gg").is_err());
    }
}
