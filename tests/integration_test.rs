//! Discovery against a real KNXnet/IP installation
//!
//! These tests need at least one KNXnet/IP server (gateway, router or the
//! `knxd` daemon) reachable by multicast from this host.
//!
//! ## Running Tests
//!
//! ```bash
//! # All live tests
//! cargo test --test integration_test -- --ignored --nocapture
//!
//! # Pick the interface explicitly
//! KNX_INTERFACE=eth0 cargo test --test integration_test -- --ignored
//! ```
//!
//! Note: Tests are marked with #[ignore] to avoid running them in CI without a
//! KNX network.

use std::time::Duration;

use knx_discover::{Discoverer, DiscovererConfig};

const SEARCH_SECONDS: i32 = 3;

fn live_discoverer() -> Discoverer {
    let config = DiscovererConfig::from_env().expect("Invalid KNX_* environment");
    Discoverer::builder()
        .config(config)
        .build()
        .expect("Failed to create discoverer")
}

#[test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
fn test_live_multicast_search() {
    println!("\n=== Test: Multicast Search ===");

    let discoverer = live_discoverer();
    discoverer
        .start_search(SEARCH_SECONDS, true)
        .expect("Search failed");

    let servers = discoverer.search_responses();
    println!("✓ {} server(s) answered", servers.len());
    for server in &servers {
        println!("  {server}");
    }
    assert!(!servers.is_empty(), "No KNXnet/IP server answered");
}

#[test]
#[ignore]
fn test_live_describe_every_server() {
    println!("\n=== Test: Describe Found Servers ===");

    let discoverer = live_discoverer();
    discoverer
        .start_search(SEARCH_SECONDS, true)
        .expect("Search failed");

    for server in discoverer.search_responses() {
        let description = discoverer.describe(&server, 0).expect("Description failed");
        println!("✓ {description}");
        assert_eq!(
            description.response().device.serial_number,
            server.response().device.serial_number
        );
    }
}

#[test]
#[ignore]
fn test_live_async_search() {
    println!("\n=== Test: Async Search ===");

    let discoverer = live_discoverer();
    let handle = discoverer
        .search_async(Duration::from_secs(2))
        .expect("Failed to start search");
    println!("✓ Search started: {handle:?}");

    let servers = handle.get().expect("Search failed");
    println!("✓ {} server(s) after 2 s", servers.len());
    assert!(!discoverer.is_searching());
}

#[test]
#[ignore]
fn test_live_nat_search() {
    println!("\n=== Test: NAT Search ===");

    let discoverer = Discoverer::builder()
        .config(DiscovererConfig::from_env().expect("Invalid KNX_* environment"))
        .nat(true)
        .build()
        .expect("Failed to create discoverer");
    discoverer
        .start_search(SEARCH_SECONDS, true)
        .expect("Search failed");

    println!("✓ {} server(s) answered NAT search", discoverer.search_responses().len());
}
