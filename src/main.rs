use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};
use env_logger::Env;
use log::{info, warn};

use dhcpmod::document;
use dhcpmod::engine::AllocationEngine;
use dhcpmod::error::Error;
use dhcpmod::reservation::{is_valid_mac, Reservation};
use dhcpmod::subnet::{GatewayPlacement, Subnet};

#[derive(Parser)]
#[command(
    name = "dhcpmod",
    version,
    about = "Edit dhcpd.conf subnet declarations and host reservations"
)]
struct Cli {
    /// Configuration file to edit
    #[arg(short, long, default_value = "dhcpd.conf")]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage subnet declarations
    Subnet {
        #[command(subcommand)]
        action: SubnetAction,
    },
    /// Manage host reservations
    Host {
        #[command(subcommand)]
        action: HostAction,
    },
}

#[derive(Subcommand)]
enum SubnetAction {
    /// Allocate a new subnet out of the supernet
    Add {
        /// Subnet name; defaults to the allocated CIDR
        #[arg(short, long)]
        name: Option<String>,
        /// Number of hosts the subnet must hold; defaults to the
        /// ##@subnet_size directive
        #[arg(short, long)]
        size: Option<u32>,
        /// Gateway position; defaults to the ##@subnet_gateway directive
        #[arg(short, long, value_enum)]
        gateway: Option<GatewayArg>,
    },
    /// Remove subnets matching a name or contained address
    Remove { identifier: String },
    /// Print subnets, optionally with their reservations
    Show {
        identifier: Option<String>,
        /// Also list each subnet's host reservations
        #[arg(short = 'H', long)]
        hosts: bool,
    },
}

#[derive(Subcommand)]
enum HostAction {
    /// Reserve the first free address of a subnet for a hardware address
    Add {
        /// Hardware address, colon-separated
        mac: String,
        /// Target subnet, by name or by a contained address
        network: String,
        /// Hostname; defaults to the assigned address
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Remove reservations matching a MAC, address, or hostname
    Remove { identifier: String },
    /// Print reservations
    Show { identifier: Option<String> },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GatewayArg {
    First,
    Last,
}

impl From<GatewayArg> for GatewayPlacement {
    fn from(arg: GatewayArg) -> Self {
        match arg {
            GatewayArg::First => GatewayPlacement::First,
            GatewayArg::Last => GatewayPlacement::Last,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let text = fs::read_to_string(&cli.file)
        .wrap_err_with(|| format!("failed to read {}", cli.file.display()))?;
    let mut engine = document::parse(&text)
        .wrap_err_with(|| format!("failed to parse {}", cli.file.display()))?;

    let mutated = match run(&mut engine, &cli.command) {
        Ok(mutated) => mutated,
        Err(err) if err.is_benign() => {
            warn!("{err}");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if mutated {
        document::write_back(&cli.file, &document::serialize(&engine))
            .wrap_err_with(|| format!("failed to write {}", cli.file.display()))?;
        info!("Updated {}", cli.file.display());
    }
    Ok(())
}

/// Apply one command to the model. Returns whether the file needs to be
/// rewritten.
fn run(engine: &mut AllocationEngine, command: &Commands) -> dhcpmod::error::Result<bool> {
    match command {
        Commands::Subnet { action } => match action {
            SubnetAction::Add {
                name,
                size,
                gateway,
            } => {
                let subnet =
                    engine.add_subnet(*size, name.clone(), gateway.map(GatewayPlacement::from))?;
                println!("Created subnet:\n{subnet}");
                Ok(true)
            }
            SubnetAction::Remove { identifier } => {
                for subnet in &engine.remove_subnet(identifier)? {
                    println!("Removed subnet:\n{subnet}");
                }
                Ok(true)
            }
            SubnetAction::Show { identifier, hosts } => {
                show_subnets(engine, identifier.as_deref(), *hosts);
                Ok(false)
            }
        },
        Commands::Host { action } => match action {
            HostAction::Add { mac, network, name } => {
                if !is_valid_mac(mac) {
                    return Err(Error::MalformedConfig(format!(
                        "invalid MAC address '{mac}'"
                    )));
                }
                let reservation = engine.add_reservation(mac, network, name.clone())?;
                println!("Created reservation:\n{reservation}");
                Ok(true)
            }
            HostAction::Remove { identifier } => {
                for reservation in &engine.remove_reservation(identifier)? {
                    println!("Removed reservation:\n{reservation}");
                }
                Ok(true)
            }
            HostAction::Show { identifier } => {
                show_reservations(engine, identifier.as_deref());
                Ok(false)
            }
        },
    }
}

fn show_subnets(engine: &AllocationEngine, identifier: Option<&str>, hosts: bool) {
    let selected: Vec<&Subnet> = match identifier {
        Some(token) => engine.subnets.search(token),
        None => engine.subnets.iter().collect(),
    };
    if selected.is_empty() {
        println!("No matching subnets.");
        return;
    }
    for subnet in selected {
        println!("{subnet}");
        if hosts {
            for reservation in engine.reservations_in(subnet) {
                println!("{reservation}");
            }
        }
        println!();
    }
}

fn show_reservations(engine: &AllocationEngine, identifier: Option<&str>) {
    let selected: Vec<&Reservation> = match identifier {
        Some(token) => engine.reservations.search(token),
        None => engine.reservations.iter().collect(),
    };
    if selected.is_empty() {
        println!("No matching reservations.");
        return;
    }
    for reservation in selected {
        println!("{reservation}\n");
    }
}
