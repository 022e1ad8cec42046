//! IPv4/IPv6 block arithmetic for subnet allocation.
//!
//! This module provides the pure address math the registries are built on:
//! the host-count to prefix-length table, block containment and overlap
//! tests, candidate sub-block enumeration, and host enumeration. All
//! derivations work on `std::net` address types.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Usable-host capacity per supported prefix length, tightest block first.
/// One address beyond network and broadcast is reserved for the gateway,
/// so a /24 holds 253 hosts rather than 254.
const HOST_CAPACITY: [(u8, u32); 15] = [
    (30, 1),
    (29, 5),
    (28, 13),
    (27, 29),
    (26, 61),
    (25, 125),
    (24, 253),
    (23, 509),
    (22, 1021),
    (21, 2045),
    (20, 4093),
    (19, 8189),
    (18, 16381),
    (17, 32765),
    (16, 65533),
];

/// Smallest block (numerically largest prefix) whose usable-host capacity
/// is at least `host_count`.
pub fn mask_length_for(host_count: u32) -> Result<u8> {
    if host_count == 0 {
        return Err(Error::UnsupportedSize(host_count));
    }
    HOST_CAPACITY
        .iter()
        .find(|(_, capacity)| *capacity >= host_count)
        .map(|(prefix, _)| *prefix)
        .ok_or(Error::UnsupportedSize(host_count))
}

/// Greatest number of hosts a block at `prefix` can hold, excluding the
/// network, broadcast, and gateway addresses.
pub fn max_hosts_for(prefix: u8) -> Result<u32> {
    HOST_CAPACITY
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, capacity)| *capacity)
        .ok_or(Error::UnsupportedPrefix(prefix))
}

/// True when either block contains the other's base address. Checking both
/// directions catches a smaller block sitting inside a larger one.
pub fn overlaps(a: Ipv4Net, b: Ipv4Net) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// An IPv4 block in CIDR form. The address is normalized to the network
/// address on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Net {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Net {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(Error::MalformedConfig(format!(
                "invalid IPv4 prefix length /{prefix}"
            )));
        }
        let network = Ipv4Addr::from(u32::from(addr) & prefix_mask(prefix));
        Ok(Self {
            addr: network,
            prefix,
        })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn network(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(prefix_mask(self.prefix))
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !prefix_mask(self.prefix))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & prefix_mask(self.prefix) == u32::from(self.addr)
    }

    /// First host address, network + 1. Saturates at the top of the
    /// address space so degenerate /32 blocks cannot overflow.
    pub fn first_usable(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr).saturating_add(1))
    }

    /// Last host address, broadcast - 1. Saturates at the bottom of the
    /// address space.
    pub fn last_usable(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.broadcast()).saturating_sub(1))
    }

    /// Host addresses in ascending order, excluding network and broadcast.
    pub fn hosts(&self) -> Ipv4Hosts {
        Ipv4Hosts {
            next: u64::from(u32::from(self.addr)) + 1,
            end: u64::from(u32::from(self.broadcast())),
        }
    }

    /// All sub-blocks of this block at `prefix`, in ascending order. Empty
    /// when `prefix` is shorter than this block's own prefix.
    pub fn subnets(&self, prefix: u8) -> Ipv4Subnets {
        let remaining = if prefix < self.prefix || prefix > 32 {
            0
        } else {
            1u64 << (prefix - self.prefix)
        };
        Ipv4Subnets {
            current: u64::from(u32::from(self.addr)),
            step: 1u64 << (32 - u32::from(prefix).min(32)),
            remaining,
            prefix,
        }
    }
}

impl FromStr for Ipv4Net {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = split_cidr(s)?;
        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| Error::MalformedConfig(format!("invalid IPv4 CIDR '{s}'")))?;
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Ascending iterator over a block's host addresses.
#[derive(Debug, Clone)]
pub struct Ipv4Hosts {
    next: u64,
    end: u64,
}

impl Iterator for Ipv4Hosts {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        if self.next >= self.end {
            return None;
        }
        let addr = Ipv4Addr::from(self.next as u32);
        self.next += 1;
        Some(addr)
    }
}

/// Ascending iterator over equally-sized sub-blocks of a block.
#[derive(Debug, Clone)]
pub struct Ipv4Subnets {
    current: u64,
    step: u64,
    remaining: u64,
    prefix: u8,
}

impl Iterator for Ipv4Subnets {
    type Item = Ipv4Net;

    fn next(&mut self) -> Option<Ipv4Net> {
        if self.remaining == 0 {
            return None;
        }
        let net = Ipv4Net {
            addr: Ipv4Addr::from(self.current as u32),
            prefix: self.prefix,
        };
        self.current += self.step;
        self.remaining -= 1;
        Some(net)
    }
}

/// An IPv6 block in CIDR form, normalized to its network address. Only the
/// operations the dual-stack subnet fields need are provided; IPv6 blocks
/// are never allocated, only carried through from the parsed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Net {
    addr: Ipv6Addr,
    prefix: u8,
}

impl Ipv6Net {
    pub fn new(addr: Ipv6Addr, prefix: u8) -> Result<Self> {
        if prefix > 128 {
            return Err(Error::MalformedConfig(format!(
                "invalid IPv6 prefix length /{prefix}"
            )));
        }
        let network = Ipv6Addr::from(u128::from(addr) & prefix_mask6(prefix));
        Ok(Self {
            addr: network,
            prefix,
        })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn network(&self) -> Ipv6Addr {
        self.addr
    }

    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        u128::from(addr) & prefix_mask6(self.prefix) == u128::from(self.addr)
    }

    /// First host address, network + 1. Saturates for degenerate /128
    /// blocks at the top of the address space.
    pub fn first_usable(&self) -> Ipv6Addr {
        Ipv6Addr::from(u128::from(self.addr).saturating_add(1))
    }

    /// Last address of the block. IPv6 has no broadcast address.
    pub fn last_usable(&self) -> Ipv6Addr {
        Ipv6Addr::from(u128::from(self.addr) | !prefix_mask6(self.prefix))
    }

    /// Host addresses in ascending order. Lazy; callers stop at the first
    /// free address rather than draining the block.
    pub fn hosts(&self) -> Ipv6Hosts {
        Ipv6Hosts {
            next: u128::from(self.first_usable()),
            last: u128::from(self.last_usable()),
            done: self.prefix == 128,
        }
    }
}

impl FromStr for Ipv6Net {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = split_cidr(s)?;
        let addr = addr
            .parse::<Ipv6Addr>()
            .map_err(|_| Error::MalformedConfig(format!("invalid IPv6 CIDR '{s}'")))?;
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Ipv6Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Ascending iterator over an IPv6 block's host addresses.
#[derive(Debug, Clone)]
pub struct Ipv6Hosts {
    next: u128,
    last: u128,
    done: bool,
}

impl Iterator for Ipv6Hosts {
    type Item = Ipv6Addr;

    fn next(&mut self) -> Option<Ipv6Addr> {
        if self.done || self.next > self.last {
            return None;
        }
        let addr = Ipv6Addr::from(self.next);
        if self.next == self.last {
            self.done = true;
        } else {
            self.next += 1;
        }
        Some(addr)
    }
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

fn split_cidr(s: &str) -> Result<(&str, u8)> {
    let (addr, prefix) = s
        .split_once('/')
        .ok_or_else(|| Error::MalformedConfig(format!("invalid CIDR '{s}', expected addr/prefix")))?;
    let prefix = prefix
        .parse::<u8>()
        .map_err(|_| Error::MalformedConfig(format!("invalid CIDR prefix in '{s}'")))?;
    Ok((addr, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_length_table() {
        assert_eq!(mask_length_for(1).unwrap(), 30);
        assert_eq!(mask_length_for(5).unwrap(), 29);
        assert_eq!(mask_length_for(6).unwrap(), 28);
        assert_eq!(mask_length_for(50).unwrap(), 26);
        assert_eq!(mask_length_for(253).unwrap(), 24);
        assert_eq!(mask_length_for(254).unwrap(), 23);
        assert_eq!(mask_length_for(65533).unwrap(), 16);
    }

    #[test]
    fn test_mask_length_out_of_range() {
        assert!(matches!(mask_length_for(0), Err(Error::UnsupportedSize(0))));
        assert!(matches!(
            mask_length_for(65534),
            Err(Error::UnsupportedSize(65534))
        ));
    }

    #[test]
    fn test_max_hosts_out_of_range() {
        assert!(matches!(max_hosts_for(31), Err(Error::UnsupportedPrefix(31))));
        assert!(matches!(max_hosts_for(15), Err(Error::UnsupportedPrefix(15))));
    }

    #[test]
    fn test_table_boundaries_are_tight() {
        // For every supported host count, the chosen prefix fits and the
        // next-smaller block does not.
        for host_count in 1..=65533u32 {
            let prefix = mask_length_for(host_count).unwrap();
            assert!(max_hosts_for(prefix).unwrap() >= host_count);
            if prefix < 30 {
                assert!(
                    max_hosts_for(prefix + 1).unwrap() < host_count,
                    "prefix /{} is not the tightest fit for {} hosts",
                    prefix,
                    host_count
                );
            }
        }
    }

    #[test]
    fn test_net_derivations() {
        let net: Ipv4Net = "10.0.0.0/26".parse().unwrap();
        assert_eq!(net.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(net.netmask(), Ipv4Addr::new(255, 255, 255, 192));
        assert_eq!(net.broadcast(), Ipv4Addr::new(10, 0, 0, 63));
        assert_eq!(net.first_usable(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(net.last_usable(), Ipv4Addr::new(10, 0, 0, 62));
    }

    #[test]
    fn test_parse_normalizes_to_network_address() {
        let net: Ipv4Net = "10.0.0.37/26".parse().unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/26");
    }

    #[test]
    fn test_parse_rejects_bad_cidr() {
        assert!("10.0.0.0".parse::<Ipv4Net>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Net>().is_err());
        assert!("10.0.0.256/24".parse::<Ipv4Net>().is_err());
        assert!("fd00::/129".parse::<Ipv6Net>().is_err());
    }

    #[test]
    fn test_contains() {
        let net: Ipv4Net = "10.0.0.64/26".parse().unwrap();
        assert!(net.contains(Ipv4Addr::new(10, 0, 0, 64)));
        assert!(net.contains(Ipv4Addr::new(10, 0, 0, 127)));
        assert!(!net.contains(Ipv4Addr::new(10, 0, 0, 128)));
        assert!(!net.contains(Ipv4Addr::new(10, 0, 0, 63)));
    }

    #[test]
    fn test_overlaps_both_directions() {
        let outer: Ipv4Net = "10.0.0.0/24".parse().unwrap();
        let inner: Ipv4Net = "10.0.0.128/26".parse().unwrap();
        let disjoint: Ipv4Net = "10.0.1.0/24".parse().unwrap();
        assert!(overlaps(outer, inner));
        assert!(overlaps(inner, outer));
        assert!(!overlaps(outer, disjoint));
        assert!(!overlaps(disjoint, inner));
    }

    #[test]
    fn test_subnets_ascending() {
        let space: Ipv4Net = "10.0.0.0/24".parse().unwrap();
        let blocks: Vec<String> = space.subnets(26).map(|n| n.to_string()).collect();
        assert_eq!(
            blocks,
            vec!["10.0.0.0/26", "10.0.0.64/26", "10.0.0.128/26", "10.0.0.192/26"]
        );
    }

    #[test]
    fn test_subnets_wider_prefix_is_empty() {
        let space: Ipv4Net = "10.0.0.0/24".parse().unwrap();
        assert_eq!(space.subnets(16).count(), 0);
    }

    #[test]
    fn test_hosts_excludes_network_and_broadcast() {
        let net: Ipv4Net = "192.168.1.0/30".parse().unwrap();
        let hosts: Vec<Ipv4Addr> = net.hosts().collect();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2)]
        );
    }

    #[test]
    fn test_usable_addresses_at_address_space_edges() {
        // /32 blocks at the edges of the address space must not overflow.
        let top: Ipv4Net = "255.255.255.255/32".parse().unwrap();
        assert_eq!(top.first_usable(), Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(top.broadcast(), Ipv4Addr::new(255, 255, 255, 255));
        let bottom: Ipv4Net = "0.0.0.0/32".parse().unwrap();
        assert_eq!(bottom.last_usable(), Ipv4Addr::new(0, 0, 0, 0));

        let top6: Ipv6Net = "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff/128".parse().unwrap();
        assert_eq!(top6.first_usable(), top6.network());
    }

    #[test]
    fn test_ipv6_block() {
        let net: Ipv6Net = "fd00:1234::/64".parse().unwrap();
        assert!(net.contains("fd00:1234::42".parse().unwrap()));
        assert!(!net.contains("fd00:1235::1".parse().unwrap()));
        assert_eq!(net.first_usable(), "fd00:1234::1".parse::<Ipv6Addr>().unwrap());
        let first: Vec<Ipv6Addr> = net.hosts().take(2).collect();
        assert_eq!(first[0], "fd00:1234::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(first[1], "fd00:1234::2".parse::<Ipv6Addr>().unwrap());
    }
}
