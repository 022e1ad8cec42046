//! Host reservation model and registry.
//!
//! A reservation binds a hardware address to a fixed host address inside
//! some subnet's block. Ownership by a subnet is never stored; it is derived
//! from address containment at serialize time, so deleting a subnet orphans
//! its reservations instead of purging them.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use log::info;
use regex::Regex;

use crate::error::{Error, Result};
use crate::subnet::Subnet;

static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}$").expect("invalid MAC regex")
});

/// Whether `s` is a colon-separated six-octet hardware address.
pub fn is_valid_mac(s: &str) -> bool {
    MAC_PATTERN.is_match(s)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub hostname: String,
    pub mac: String,
    /// Absent only when the owning subnet had no IPv4 block. Such a
    /// reservation never appears in the serialized output.
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl fmt::Display for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\tHostname:     {}", self.hostname)?;
        writeln!(f, "\tMac Address:  {}", self.mac)?;
        match self.ipv4 {
            Some(addr) => writeln!(f, "\tIPv4 Address: {addr}")?,
            None => writeln!(f, "\tIPv4 Address:")?,
        }
        match self.ipv6 {
            Some(addr) => write!(f, "\tIPv6 Address: {addr}"),
            None => write!(f, "\tIPv6 Address:"),
        }
    }
}

/// In-memory collection of reservations, in file order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReservationRegistry {
    reservations: Vec<Reservation>,
}

impl ReservationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter()
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Register a reservation parsed from an existing file.
    pub fn insert(&mut self, reservation: Reservation) {
        self.reservations.push(reservation);
    }

    /// Search by token shape: MAC syntax matches by hardware address,
    /// IPv4/IPv6 syntax by exact assigned address, anything else is a
    /// substring match against hostnames.
    pub fn search(&self, token: &str) -> Vec<&Reservation> {
        self.reservations
            .iter()
            .filter(|reservation| Self::matches(reservation, token))
            .collect()
    }

    fn matches(reservation: &Reservation, token: &str) -> bool {
        if is_valid_mac(token) {
            reservation.mac.eq_ignore_ascii_case(token)
        } else if let Ok(v4) = token.parse::<Ipv4Addr>() {
            reservation.ipv4 == Some(v4)
        } else if token.contains(':') && token.parse::<Ipv6Addr>().is_ok() {
            reservation.ipv6 == token.parse::<Ipv6Addr>().ok()
        } else {
            reservation.hostname.contains(token)
        }
    }

    fn is_ipv4_reserved(&self, addr: Ipv4Addr) -> bool {
        self.reservations.iter().any(|r| r.ipv4 == Some(addr))
    }

    fn is_ipv6_reserved(&self, addr: Ipv6Addr) -> bool {
        self.reservations.iter().any(|r| r.ipv6 == Some(addr))
    }

    /// Reserve the first free host address of `subnet` for `mac`. Each
    /// family is scanned independently in ascending order, skipping the
    /// gateway and every already-reserved address. All checks run against
    /// pre-mutation state.
    pub fn create(
        &mut self,
        mac: &str,
        subnet: &Subnet,
        name: Option<String>,
    ) -> Result<Reservation> {
        if let Some(existing) = self.search(mac).first() {
            return Err(Error::DuplicateMac {
                mac: mac.to_string(),
                existing: format!(
                    "'{}' at {}",
                    existing.hostname,
                    existing
                        .ipv4
                        .map(|a| a.to_string())
                        .or_else(|| existing.ipv6.map(|a| a.to_string()))
                        .unwrap_or_else(|| "no address".to_string())
                ),
            });
        }

        let ipv4 = subnet.ipv4.as_ref().and_then(|a| {
            a.block
                .hosts()
                .find(|addr| *addr != a.gateway && !self.is_ipv4_reserved(*addr))
        });
        let ipv6 = subnet.ipv6.as_ref().and_then(|a| {
            a.block
                .hosts()
                .find(|addr| *addr != a.gateway && !self.is_ipv6_reserved(*addr))
        });

        let assigned_text = ipv4
            .map(|addr| addr.to_string())
            .or_else(|| ipv6.map(|addr| addr.to_string()))
            .ok_or_else(|| Error::NoFreeAddress(subnet.name.clone()))?;
        let hostname = name.unwrap_or(assigned_text);

        let reservation = Reservation {
            hostname,
            mac: mac.to_string(),
            ipv4,
            ipv6,
        };
        info!(
            "Registered reservation '{}' for {} in subnet '{}'",
            reservation.hostname, reservation.mac, subnet.name
        );
        self.reservations.push(reservation.clone());
        Ok(reservation)
    }

    /// Remove every reservation matching `token` and return them.
    pub fn remove(&mut self, token: &str) -> Result<Vec<Reservation>> {
        let (removed, kept): (Vec<Reservation>, Vec<Reservation>) =
            std::mem::take(&mut self.reservations)
                .into_iter()
                .partition(|reservation| Self::matches(reservation, token));
        self.reservations = kept;
        if removed.is_empty() {
            return Err(Error::NothingToRemove(token.to_string()));
        }
        for reservation in &removed {
            info!(
                "Removed reservation '{}' ({})",
                reservation.hostname, reservation.mac
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subnet::{GatewayPlacement, SubnetRegistry};

    fn test_subnet(size: u32) -> Subnet {
        let mut subnets = SubnetRegistry::new();
        subnets
            .create(
                "10.0.0.0/16".parse().unwrap(),
                size,
                Some("office".to_string()),
                GatewayPlacement::First,
            )
            .unwrap()
    }

    #[test]
    fn test_mac_syntax() {
        assert!(is_valid_mac("aa:bb:cc:dd:ee:ff"));
        assert!(is_valid_mac("AA:BB:CC:DD:EE:0F"));
        assert!(!is_valid_mac("aa:bb:cc:dd:ee"));
        assert!(!is_valid_mac("aa:bb:cc:dd:ee:gg"));
        assert!(!is_valid_mac("aabbccddeeff"));
        assert!(!is_valid_mac("aa-bb-cc-dd-ee-ff"));
    }

    #[test]
    fn test_create_skips_gateway() {
        let subnet = test_subnet(50);
        let mut registry = ReservationRegistry::new();
        let reservation = registry
            .create("aa:bb:cc:dd:ee:ff", &subnet, None)
            .unwrap();
        // 10.0.0.1 is the gateway, so the first free host is 10.0.0.2.
        assert_eq!(reservation.ipv4, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(reservation.hostname, "10.0.0.2");
    }

    #[test]
    fn test_create_skips_reserved_addresses() {
        let subnet = test_subnet(50);
        let mut registry = ReservationRegistry::new();
        registry.create("aa:bb:cc:dd:ee:01", &subnet, None).unwrap();
        registry.create("aa:bb:cc:dd:ee:02", &subnet, None).unwrap();
        let third = registry.create("aa:bb:cc:dd:ee:03", &subnet, None).unwrap();
        assert_eq!(third.ipv4, Some(Ipv4Addr::new(10, 0, 0, 4)));
    }

    #[test]
    fn test_assigned_addresses_stay_inside_block() {
        let subnet = test_subnet(5);
        let v4 = subnet.ipv4.unwrap();
        let mut registry = ReservationRegistry::new();
        for octet in 1..=5 {
            let reservation = registry
                .create(&format!("aa:bb:cc:dd:ee:{octet:02x}"), &subnet, None)
                .unwrap();
            let addr = reservation.ipv4.unwrap();
            assert!(v4.block.contains(addr));
            assert_ne!(addr, v4.gateway);
            assert_ne!(addr, v4.block.network());
            assert_ne!(addr, v4.block.broadcast());
        }
    }

    #[test]
    fn test_last_free_address_then_duplicate_mac() {
        // A /30 has hosts .1 and .2; .1 is the gateway, so exactly one
        // address is free and it is the block's last usable one.
        let mut subnets = SubnetRegistry::new();
        let subnet = subnets
            .create(
                "10.0.0.0/30".parse().unwrap(),
                1,
                Some("tiny".to_string()),
                GatewayPlacement::First,
            )
            .unwrap();
        let mut registry = ReservationRegistry::new();
        let reservation = registry
            .create("aa:bb:cc:dd:ee:ff", &subnet, None)
            .unwrap();
        assert_eq!(reservation.ipv4, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(
            reservation.ipv4.unwrap(),
            subnet.ipv4.unwrap().block.last_usable()
        );

        let err = registry
            .create("aa:bb:cc:dd:ee:ff", &subnet, None)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateMac { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_subnet_exhaustion() {
        let mut subnets = SubnetRegistry::new();
        let subnet = subnets
            .create(
                "10.0.0.0/30".parse().unwrap(),
                1,
                Some("tiny".to_string()),
                GatewayPlacement::First,
            )
            .unwrap();
        let mut registry = ReservationRegistry::new();
        registry.create("aa:bb:cc:dd:ee:01", &subnet, None).unwrap();
        let err = registry
            .create("aa:bb:cc:dd:ee:02", &subnet, None)
            .unwrap_err();
        assert!(matches!(err, Error::NoFreeAddress(name) if name == "tiny"));
    }

    #[test]
    fn test_explicit_hostname() {
        let subnet = test_subnet(50);
        let mut registry = ReservationRegistry::new();
        let reservation = registry
            .create("aa:bb:cc:dd:ee:ff", &subnet, Some("printer".to_string()))
            .unwrap();
        assert_eq!(reservation.hostname, "printer");
    }

    #[test]
    fn test_search_dispatch() {
        let subnet = test_subnet(50);
        let mut registry = ReservationRegistry::new();
        registry
            .create("aa:bb:cc:dd:ee:ff", &subnet, Some("printer".to_string()))
            .unwrap();

        assert_eq!(registry.search("aa:bb:cc:dd:ee:ff").len(), 1);
        assert_eq!(registry.search("AA:BB:CC:DD:EE:FF").len(), 1);
        assert_eq!(registry.search("10.0.0.2").len(), 1);
        assert_eq!(registry.search("10.0.0.3").len(), 0);
        assert_eq!(registry.search("print").len(), 1);
        assert_eq!(registry.search("router").len(), 0);
    }

    #[test]
    fn test_remove() {
        let subnet = test_subnet(50);
        let mut registry = ReservationRegistry::new();
        registry
            .create("aa:bb:cc:dd:ee:ff", &subnet, Some("printer".to_string()))
            .unwrap();
        let removed = registry.remove("printer").unwrap();
        assert_eq!(removed.len(), 1);
        assert!(registry.is_empty());
        assert!(registry.remove("printer").unwrap_err().is_benign());
    }
}
