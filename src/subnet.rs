//! Subnet model and registry.
//!
//! A subnet is a named sub-block of the supernet with a gateway placed at
//! the first or last usable address. The registry owns every parsed or
//! created subnet and enforces the non-overlap and name-uniqueness
//! invariants on create. Subnets are immutable once registered; the only
//! mutation is removal.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use log::info;

use crate::addr::{self, Ipv4Net, Ipv6Net};
use crate::error::{Error, Result};

/// Where the gateway sits inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPlacement {
    First,
    Last,
}

impl FromStr for GatewayPlacement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first" => Ok(GatewayPlacement::First),
            "last" => Ok(GatewayPlacement::Last),
            other => Err(Error::InvalidGatewayPlacement(other.to_string())),
        }
    }
}

impl fmt::Display for GatewayPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayPlacement::First => write!(f, "first"),
            GatewayPlacement::Last => write!(f, "last"),
        }
    }
}

/// One address family's block together with its gateway. The grammar only
/// allows the pair jointly present or jointly absent, so the model does too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Assignment {
    pub block: Ipv4Net,
    pub gateway: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Assignment {
    pub block: Ipv6Net,
    pub gateway: Ipv6Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub name: String,
    pub ipv4: Option<Ipv4Assignment>,
    pub ipv6: Option<Ipv6Assignment>,
}

impl Subnet {
    /// Greatest host capacity of the subnet, from whichever family block is
    /// present.
    pub fn max_hosts(&self) -> Option<u32> {
        let prefix = match (&self.ipv4, &self.ipv6) {
            (Some(v4), _) => v4.block.prefix(),
            (None, Some(v6)) => v6.block.prefix(),
            (None, None) => return None,
        };
        addr::max_hosts_for(prefix).ok()
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Subnet Name: {}", self.name)?;
        match &self.ipv4 {
            Some(v4) => {
                writeln!(f, "IPv4 Address: {}", v4.block)?;
                writeln!(f, "IPv4 Gateway: {}", v4.gateway)?;
            }
            None => {
                writeln!(f, "IPv4 Address:")?;
                writeln!(f, "IPv4 Gateway:")?;
            }
        }
        match &self.ipv6 {
            Some(v6) => {
                writeln!(f, "IPv6 Address: {}", v6.block)?;
                writeln!(f, "IPv6 Gateway: {}", v6.gateway)?;
            }
            None => {
                writeln!(f, "IPv6 Address:")?;
                writeln!(f, "IPv6 Gateway:")?;
            }
        }
        match self.max_hosts() {
            Some(hosts) => write!(f, "Max Hosts: {hosts}"),
            None => write!(f, "Max Hosts:"),
        }
    }
}

/// In-memory collection of subnets, in file order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SubnetRegistry {
    subnets: Vec<Subnet>,
}

impl SubnetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subnet> {
        self.subnets.iter()
    }

    pub fn len(&self) -> usize {
        self.subnets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subnets.is_empty()
    }

    /// Register a subnet parsed from an existing file, bypassing the
    /// allocation checks. Existing files are trusted as written.
    pub fn insert(&mut self, subnet: Subnet) {
        self.subnets.push(subnet);
    }

    /// Search by token shape: a valid IPv4 or IPv6 address matches subnets
    /// whose same-family block contains it, anything else is a substring
    /// match against subnet names.
    pub fn search(&self, token: &str) -> Vec<&Subnet> {
        self.subnets
            .iter()
            .filter(|subnet| Self::matches(subnet, token))
            .collect()
    }

    fn matches(subnet: &Subnet, token: &str) -> bool {
        if let Ok(v4) = token.parse::<Ipv4Addr>() {
            subnet.ipv4.is_some_and(|a| a.block.contains(v4))
        } else if let Ok(v6) = token.parse::<Ipv6Addr>() {
            subnet.ipv6.is_some_and(|a| a.block.contains(v6))
        } else {
            subnet.name.contains(token)
        }
    }

    /// True when `candidate` overlaps no registered IPv4 block.
    pub fn is_available(&self, candidate: Ipv4Net) -> bool {
        !self
            .subnets
            .iter()
            .any(|subnet| subnet.ipv4.is_some_and(|a| addr::overlaps(a.block, candidate)))
    }

    /// Allocate the first free block of the right size out of `space` and
    /// register it. All checks run against pre-mutation state; nothing is
    /// registered unless every step succeeds.
    pub fn create(
        &mut self,
        space: Ipv4Net,
        desired_hosts: u32,
        name: Option<String>,
        placement: GatewayPlacement,
    ) -> Result<Subnet> {
        let prefix = addr::mask_length_for(desired_hosts)?;
        let block = space
            .subnets(prefix)
            .find(|candidate| self.is_available(*candidate))
            .ok_or_else(|| Error::NoFreeSubnet {
                supernet: space.to_string(),
                prefix,
            })?;

        let name = name.unwrap_or_else(|| block.to_string());
        if self.subnets.iter().any(|subnet| subnet.name == name) {
            return Err(Error::NameCollision(name));
        }

        let gateway = match placement {
            GatewayPlacement::First => block.first_usable(),
            GatewayPlacement::Last => block.last_usable(),
        };

        let subnet = Subnet {
            name,
            ipv4: Some(Ipv4Assignment { block, gateway }),
            ipv6: None,
        };
        info!("Registered subnet '{}' at {}", subnet.name, block);
        self.subnets.push(subnet.clone());
        Ok(subnet)
    }

    /// Remove every subnet matching `token` and return them. Reservations
    /// inside removed subnets stay in their registry; they drop out of the
    /// output at serialize time instead.
    pub fn remove(&mut self, token: &str) -> Result<Vec<Subnet>> {
        let (removed, kept): (Vec<Subnet>, Vec<Subnet>) = std::mem::take(&mut self.subnets)
            .into_iter()
            .partition(|subnet| Self::matches(subnet, token));
        self.subnets = kept;
        if removed.is_empty() {
            return Err(Error::NothingToRemove(token.to_string()));
        }
        for subnet in &removed {
            info!("Removed subnet '{}'", subnet.name);
        }
        Ok(removed)
    }
}
