//! Allocation engine: the explicit context tying the registries together.
//!
//! One engine instance holds the global directives plus both registries for
//! a single invocation. It resolves request defaults against the globals and
//! runs the cross-registry checks before delegating to the registries, which
//! only mutate once every check has passed.

use crate::addr::Ipv4Net;
use crate::error::{Error, Result};
use crate::reservation::{Reservation, ReservationRegistry};
use crate::subnet::{GatewayPlacement, Subnet, SubnetRegistry};

/// The three required global directives of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalParameters {
    /// Root bound for all allocation.
    pub supernet: Ipv4Net,
    /// Host count used when a subnet-add omits an explicit size.
    pub default_subnet_size: u32,
    /// Placement used when a subnet-add omits an explicit gateway position.
    pub default_gateway_placement: GatewayPlacement,
}

#[derive(Debug, PartialEq)]
pub struct AllocationEngine {
    pub params: GlobalParameters,
    pub subnets: SubnetRegistry,
    pub reservations: ReservationRegistry,
}

impl AllocationEngine {
    pub fn new(params: GlobalParameters) -> Self {
        Self {
            params,
            subnets: SubnetRegistry::new(),
            reservations: ReservationRegistry::new(),
        }
    }

    /// Allocate a new subnet out of the supernet. `size` and `placement`
    /// fall back to the global defaults.
    pub fn add_subnet(
        &mut self,
        size: Option<u32>,
        name: Option<String>,
        placement: Option<GatewayPlacement>,
    ) -> Result<Subnet> {
        let size = size.unwrap_or(self.params.default_subnet_size);
        let placement = placement.unwrap_or(self.params.default_gateway_placement);
        self.subnets
            .create(self.params.supernet, size, name, placement)
    }

    pub fn remove_subnet(&mut self, token: &str) -> Result<Vec<Subnet>> {
        self.subnets.remove(token)
    }

    /// Reserve an address for `mac` inside the subnet `network` refers to.
    /// The token must resolve to exactly one subnet.
    pub fn add_reservation(
        &mut self,
        mac: &str,
        network: &str,
        name: Option<String>,
    ) -> Result<Reservation> {
        let matches = self.subnets.search(network);
        if matches.len() > 1 {
            return Err(Error::AmbiguousReference(network.to_string()));
        }
        let subnet = matches
            .first()
            .ok_or_else(|| Error::UnknownNetwork(network.to_string()))?;
        self.reservations.create(mac, subnet, name)
    }

    pub fn remove_reservation(&mut self, token: &str) -> Result<Vec<Reservation>> {
        self.reservations.remove(token)
    }

    /// Reservations listed under `subnet` in interactive output. Unlike the
    /// serialize-time ownership filter this checks both families.
    pub fn reservations_in<'a>(&'a self, subnet: &Subnet) -> Vec<&'a Reservation> {
        self.reservations
            .iter()
            .filter(|reservation| {
                let in_v4 = match (subnet.ipv4, reservation.ipv4) {
                    (Some(a), Some(addr)) => a.block.contains(addr),
                    _ => false,
                };
                let in_v6 = match (subnet.ipv6, reservation.ipv6) {
                    (Some(a), Some(addr)) => a.block.contains(addr),
                    _ => false,
                };
                in_v4 || in_v6
            })
            .collect()
    }
}
