//! Configuration document parsing and serialization.
//!
//! The on-disk grammar is the compatibility contract: three `##@` global
//! directives, sentinel-delimited subnet sections with a five-field comma
//! header, and nested `host` stanzas. Parsing is all-or-nothing; a grammar
//! violation yields `MalformedConfig` and no model. Serialization
//! regenerates the grammar from the model, deriving each reservation's
//! router/broadcast/subnet-mask options from its owning subnet's block.
//!
//! Reservation-to-subnet ownership is recomputed here from IPv4 address
//! containment, never stored. A reservation whose address falls inside no
//! registered subnet is silently omitted from the output.

use std::fs;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::addr::{Ipv4Net, Ipv6Net};
use crate::engine::{AllocationEngine, GlobalParameters};
use crate::error::{Error, Result};
use crate::reservation::{is_valid_mac, Reservation, ReservationRegistry};
use crate::subnet::{Ipv4Assignment, Ipv6Assignment, Subnet, SubnetRegistry};

const SUPERNET_KEY: &str = "##@supernet=";
const SIZE_KEY: &str = "##@subnet_size=";
const GATEWAY_KEY: &str = "##@subnet_gateway=";
const SUBNET_BEGIN: &str = "# subnet - ";
const SUBNET_END: &str = "# end";

/// Line cursor over the raw configuration text.
struct LineParser<'a> {
    lines: Vec<&'a str>,
    position: usize,
}

impl<'a> LineParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lines: input.lines().collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<&'a str> {
        self.lines.get(self.position).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    /// 1-based line number of the current line, for error messages.
    fn line_number(&self) -> usize {
        self.position + 1
    }
}

/// Parse raw configuration text into a fully-populated engine.
///
/// Lines that are neither directives nor subnet sections are ignored, and
/// therefore dropped on rewrite, matching the behavior of the tool that
/// produced the format.
pub fn parse(input: &str) -> Result<AllocationEngine> {
    let mut parser = LineParser::new(input);
    let mut supernet: Option<Ipv4Net> = None;
    let mut subnet_size: Option<u32> = None;
    let mut gateway_placement = None;
    let mut subnets = SubnetRegistry::new();
    let mut reservations = ReservationRegistry::new();

    while let Some(raw) = parser.current() {
        let line = raw.trim();
        if let Some(value) = line.strip_prefix(SUPERNET_KEY) {
            let net: Ipv4Net = value.trim().parse()?;
            set_once(&mut supernet, net, "supernet", parser.line_number())?;
            parser.advance();
        } else if let Some(value) = line.strip_prefix(SIZE_KEY) {
            let size: u32 = value.trim().parse().map_err(|_| {
                Error::MalformedConfig(format!(
                    "line {}: invalid subnet_size '{}'",
                    parser.line_number(),
                    value.trim()
                ))
            })?;
            if size == 0 {
                return Err(Error::MalformedConfig(format!(
                    "line {}: subnet_size must be positive",
                    parser.line_number()
                )));
            }
            set_once(&mut subnet_size, size, "subnet_size", parser.line_number())?;
            parser.advance();
        } else if let Some(value) = line.strip_prefix(GATEWAY_KEY) {
            let placement = value.trim().parse()?;
            set_once(
                &mut gateway_placement,
                placement,
                "subnet_gateway",
                parser.line_number(),
            )?;
            parser.advance();
        } else if let Some(header) = line.strip_prefix(SUBNET_BEGIN) {
            let line_no = parser.line_number();
            parser.advance();
            parse_subnet_section(&mut parser, header, line_no, &mut subnets, &mut reservations)?;
        } else {
            parser.advance();
        }
    }

    let params = GlobalParameters {
        supernet: require(supernet, "supernet")?,
        default_subnet_size: require(subnet_size, "subnet_size")?,
        default_gateway_placement: require(gateway_placement, "subnet_gateway")?,
    };
    Ok(AllocationEngine {
        params,
        subnets,
        reservations,
    })
}

fn require<T>(slot: Option<T>, directive: &str) -> Result<T> {
    slot.ok_or_else(|| {
        Error::MalformedConfig(format!("missing required directive ##@{directive}"))
    })
}

fn set_once<T>(slot: &mut Option<T>, value: T, directive: &str, line: usize) -> Result<()> {
    if slot.is_some() {
        return Err(Error::MalformedConfig(format!(
            "line {line}: duplicate directive ##@{directive}"
        )));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_subnet_section(
    parser: &mut LineParser,
    header: &str,
    line_no: usize,
    subnets: &mut SubnetRegistry,
    reservations: &mut ReservationRegistry,
) -> Result<()> {
    let mut fields: Vec<&str> = header.split(',').map(str::trim).collect();
    if fields.len() > 5 {
        return Err(Error::MalformedConfig(format!(
            "line {line_no}: subnet header has {} fields, expected at most 5",
            fields.len()
        )));
    }
    fields.resize(5, "");

    let name = fields[0];
    if name.is_empty() {
        return Err(Error::MalformedConfig(format!(
            "line {line_no}: subnet header is missing a name"
        )));
    }

    let ipv4 = parse_ipv4_family(fields[1], fields[2], line_no)?;
    let ipv6 = parse_ipv6_family(fields[3], fields[4], line_no)?;
    let subnet = Subnet {
        name: name.to_string(),
        ipv4,
        ipv6,
    };

    loop {
        let Some(raw) = parser.current() else {
            return Err(Error::MalformedConfig(format!(
                "subnet section '{name}' starting at line {line_no} is missing its end sentinel"
            )));
        };
        let line = raw.trim();
        if line == SUBNET_END || line.strip_prefix("# end ").is_some() {
            parser.advance();
            break;
        }
        if line.strip_prefix(SUBNET_BEGIN).is_some() {
            return Err(Error::MalformedConfig(format!(
                "subnet section '{name}' starting at line {line_no} is missing its end sentinel"
            )));
        }
        if let Some(rest) = line.strip_prefix("host ") {
            parse_host_stanza(parser, rest, reservations)?;
        } else {
            parser.advance();
        }
    }

    subnets.insert(subnet);
    Ok(())
}

/// IPv4 CIDR and gateway header fields, jointly present or jointly blank.
fn parse_ipv4_family(cidr: &str, gateway: &str, line_no: usize) -> Result<Option<Ipv4Assignment>> {
    match (cidr.is_empty(), gateway.is_empty()) {
        (true, true) => Ok(None),
        (false, false) => {
            let block: Ipv4Net = cidr.parse()?;
            if block.prefix() > 30 {
                return Err(Error::MalformedConfig(format!(
                    "line {line_no}: IPv4 block {block} has no usable host addresses"
                )));
            }
            let gateway: Ipv4Addr = gateway.parse().map_err(|_| {
                Error::MalformedConfig(format!("line {line_no}: invalid IPv4 gateway '{gateway}'"))
            })?;
            if gateway != block.first_usable() && gateway != block.last_usable() {
                return Err(Error::MalformedConfig(format!(
                    "line {line_no}: gateway {gateway} is neither the first nor the last usable address of {block}"
                )));
            }
            Ok(Some(Ipv4Assignment { block, gateway }))
        }
        _ => Err(Error::MalformedConfig(format!(
            "line {line_no}: IPv4 block and gateway must be present together"
        ))),
    }
}

fn parse_ipv6_family(cidr: &str, gateway: &str, line_no: usize) -> Result<Option<Ipv6Assignment>> {
    match (cidr.is_empty(), gateway.is_empty()) {
        (true, true) => Ok(None),
        (false, false) => {
            let block: Ipv6Net = cidr.parse()?;
            if block.prefix() == 128 {
                return Err(Error::MalformedConfig(format!(
                    "line {line_no}: IPv6 block {block} has no usable host addresses"
                )));
            }
            let gateway = gateway.parse().map_err(|_| {
                Error::MalformedConfig(format!("line {line_no}: invalid IPv6 gateway '{gateway}'"))
            })?;
            if gateway != block.first_usable() && gateway != block.last_usable() {
                return Err(Error::MalformedConfig(format!(
                    "line {line_no}: gateway {gateway} is neither the first nor the last usable address of {block}"
                )));
            }
            Ok(Some(Ipv6Assignment { block, gateway }))
        }
        _ => Err(Error::MalformedConfig(format!(
            "line {line_no}: IPv6 block and gateway must be present together"
        ))),
    }
}

fn parse_host_stanza(
    parser: &mut LineParser,
    rest: &str,
    reservations: &mut ReservationRegistry,
) -> Result<()> {
    let line_no = parser.line_number();
    let hostname = rest.trim_end_matches('{').trim();
    if hostname.is_empty() {
        return Err(Error::MalformedConfig(format!(
            "line {line_no}: host stanza is missing a hostname"
        )));
    }
    parser.advance();

    let mut mac: Option<String> = None;
    let mut ipv4: Option<Ipv4Addr> = None;
    loop {
        let Some(raw) = parser.current() else {
            return Err(Error::MalformedConfig(format!(
                "host stanza '{hostname}' at line {line_no} is not terminated"
            )));
        };
        let line = raw.trim();
        if line == "}" {
            parser.advance();
            break;
        }
        if line.starts_with('#') {
            return Err(Error::MalformedConfig(format!(
                "host stanza '{hostname}' at line {line_no} is not terminated"
            )));
        }
        if let Some(value) = line.strip_prefix("hardware ethernet ") {
            // The tool that originally wrote this format appended a stray
            // dot after the MAC; accept it on input.
            let value = value.trim_end_matches(';').trim_end_matches('.');
            if !is_valid_mac(value) {
                return Err(Error::MalformedConfig(format!(
                    "line {}: invalid MAC address '{value}'",
                    parser.line_number()
                )));
            }
            mac = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("fixed-address ") {
            let value = value.trim_end_matches(';');
            let addr: Ipv4Addr = value.parse().map_err(|_| {
                Error::MalformedConfig(format!(
                    "line {}: invalid fixed-address '{value}'",
                    parser.line_number()
                ))
            })?;
            ipv4 = Some(addr);
        }
        // option lines are derived at write time and skipped here
        parser.advance();
    }

    let mac = mac.ok_or_else(|| {
        Error::MalformedConfig(format!(
            "host stanza '{hostname}' at line {line_no} has no hardware ethernet entry"
        ))
    })?;
    let ipv4 = ipv4.ok_or_else(|| {
        Error::MalformedConfig(format!(
            "host stanza '{hostname}' at line {line_no} has no fixed-address entry"
        ))
    })?;
    reservations.insert(Reservation {
        hostname: hostname.to_string(),
        mac,
        ipv4: Some(ipv4),
        ipv6: None,
    });
    Ok(())
}

/// Serialize the model back to configuration text in the canonical grammar.
pub fn serialize(engine: &AllocationEngine) -> String {
    let mut out = String::new();
    out.push_str("###General Configuration\n");
    out.push_str(&format!("{SUPERNET_KEY}{}\n", engine.params.supernet));
    out.push_str(&format!("{SIZE_KEY}{}\n", engine.params.default_subnet_size));
    out.push_str(&format!(
        "{GATEWAY_KEY}{}\n",
        engine.params.default_gateway_placement
    ));
    out.push_str("\n###Subnets and Reservations\n");
    for subnet in engine.subnets.iter() {
        write_subnet(&mut out, subnet, engine);
    }
    out
}

fn write_subnet(out: &mut String, subnet: &Subnet, engine: &AllocationEngine) {
    let header = match (&subnet.ipv4, &subnet.ipv6) {
        (Some(v4), Some(v6)) => format!(
            "{},{},{},{},{}",
            subnet.name, v4.block, v4.gateway, v6.block, v6.gateway
        ),
        (Some(v4), None) => format!("{},{},{},,", subnet.name, v4.block, v4.gateway),
        (None, Some(v6)) => format!("{},,,{},{}", subnet.name, v6.block, v6.gateway),
        (None, None) => format!("{},,,,", subnet.name),
    };
    out.push_str(&format!("\n{SUBNET_BEGIN}{header}\n"));

    if let Some(v4) = &subnet.ipv4 {
        // Ownership is IPv4 containment only, even for dual-stack subnets.
        for reservation in engine.reservations.iter() {
            let Some(addr) = reservation.ipv4 else { continue };
            if !v4.block.contains(addr) {
                continue;
            }
            out.push_str(&format!(
                "\nhost {} {{\n\t\thardware ethernet {};\n\t\tfixed-address {};\n\t\toption routers {};\n\t\toption broadcast-address {};\n\t\toption subnet-mask {};\n\t\t}}\n",
                reservation.hostname,
                reservation.mac,
                addr,
                v4.gateway,
                v4.block.broadcast(),
                v4.block.netmask(),
            ));
        }
    }

    out.push_str(&format!("\n{SUBNET_END} {}\n", subnet.name));
}

/// Write regenerated text over `path`. The original is copied to a `.bak`
/// sibling and verified before the new content is staged to a `.new` file,
/// synced, and renamed into place, so a crash at any point leaves either
/// the old file or the new one intact.
pub fn write_back(path: &Path, contents: &str) -> Result<()> {
    let backup = sibling(path, "bak");
    fs::copy(path, &backup)?;
    if fs::read(&backup)? != fs::read(path)? {
        return Err(Error::Io(std::io::Error::other(format!(
            "backup {} does not match the original",
            backup.display()
        ))));
    }

    let staged = sibling(path, "new");
    let mut file = fs::File::create(&staged)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&staged, path)?;
    Ok(())
}

/// `dhcpd.conf` -> `dhcpd.conf.bak`, keeping any existing extension.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
