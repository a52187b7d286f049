//! `knx-discover` command line tool
//!
//! ```text
//! # Find servers on the local network (3 s window)
//! knx-discover search
//!
//! # Search from port 30000 on eth0, asking servers to answer via NAT
//! knx-discover search --port 30000 --interface eth0 --nat
//!
//! # Ask one server for its description
//! knx-discover describe 192.168.1.10:3671
//! ```
//!
//! Settings not given on the command line are read from `KNX_*` environment
//! variables (see `DiscovererConfig`). `RUST_LOG=debug` shows session activity.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use knx_discover::{Discoverer, DiscovererConfig, KnxError, NetworkInterface};

/// KNXnet/IP server discovery
#[derive(Parser, Debug)]
#[command(name = "knx-discover")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search for KNXnet/IP servers
    Search {
        /// Search window in seconds (0 = until Ctrl-C)
        #[arg(short, long, default_value = "3")]
        timeout: i32,

        /// Send the search to this server instead of the multicast group
        #[arg(long)]
        target: Option<SocketAddrV4>,

        /// Ask every server found for its description
        #[arg(short, long)]
        describe: bool,

        #[command(flatten)]
        local: LocalArgs,
    },
    /// Request the self-description of one server
    Describe {
        /// Control endpoint of the server, e.g. 192.168.1.10:3671
        server: SocketAddrV4,

        /// Timeout in seconds (0 = configured default)
        #[arg(short, long, default_value = "0")]
        timeout: i32,

        #[command(flatten)]
        local: LocalArgs,
    },
    /// List local IPv4 interfaces
    Interfaces,
}

#[derive(Args, Debug)]
struct LocalArgs {
    /// Local UDP port (0 = any)
    #[arg(short, long)]
    port: Option<i32>,

    /// Interface name or IPv4 address to use
    #[arg(short, long)]
    interface: Option<String>,

    /// Let servers reply to the observed sender address (NAT)
    #[arg(long)]
    nat: bool,

    /// Ask servers to answer searches via multicast
    #[arg(long)]
    multicast_responses: bool,
}

fn interface(spec: &str) -> knx_discover::Result<NetworkInterface> {
    match spec.parse::<Ipv4Addr>() {
        Ok(ip) => NetworkInterface::by_address(ip),
        Err(_) => NetworkInterface::by_name(spec),
    }
}

fn discoverer(local: &LocalArgs, target: Option<SocketAddrV4>) -> knx_discover::Result<Discoverer> {
    let mut config = DiscovererConfig::from_env()?;
    if let Some(spec) = &local.interface {
        config.interface = Some(interface(spec)?);
    }
    config.nat |= local.nat;
    config.multicast_responses |= local.multicast_responses;
    if let Some(target) = target {
        config.search_target = target;
    }

    let mut builder = Discoverer::builder().config(config);
    if let Some(port) = local.port {
        builder = builder.local_port(port);
    }
    builder.build()
}

fn search(
    local: &LocalArgs,
    target: Option<SocketAddrV4>,
    timeout: i32,
    describe: bool,
) -> knx_discover::Result<()> {
    let discoverer = discoverer(local, target)?;
    log::info!(
        "Searching via {} for {}",
        discoverer.config().search_target,
        if timeout == 0 {
            "ever".to_string()
        } else {
            format!("{timeout} s")
        }
    );
    discoverer.start_search(timeout, true)?;

    let servers = discoverer.search_responses();
    if servers.is_empty() {
        println!("No KNXnet/IP servers found");
    }
    for server in &servers {
        println!("{server}");
        if describe {
            match discoverer.describe(server, 0) {
                Ok(description) => println!("    {}", description.response()),
                Err(e) => println!("    description failed: {e}"),
            }
        }
    }
    Ok(())
}

fn describe(local: &LocalArgs, server: SocketAddrV4, timeout: i32) -> knx_discover::Result<()> {
    let discoverer = discoverer(local, None)?;
    let description = discoverer.description(server, timeout)?;
    println!("{description}");
    for dib in &description.response().other_dibs {
        println!("    DIB 0x{:02x}: {} bytes", dib.dib_type, dib.data.len());
    }
    Ok(())
}

fn interfaces() -> knx_discover::Result<()> {
    for nif in NetworkInterface::list()? {
        println!("{nif}");
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Search {
            timeout,
            target,
            describe: with_description,
            local,
        } => search(&local, target, timeout, with_description),
        Command::Describe {
            server,
            timeout,
            local,
        } => describe(&local, server, timeout),
        Command::Interfaces => interfaces(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(KnxError::Timeout) => {
            eprintln!("No response within the timeout");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
