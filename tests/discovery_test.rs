//! Discoverer behavior against the in-memory mock network.
//!
//! ```bash
//! cargo test --test discovery_test
//! ```

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use knx_discover::net::mock_transport::{MockNetwork, MockServer};
use knx_discover::protocol::{decode_request, Hpai, Request, DISCOVERY_ENDPOINT};
use knx_discover::{Discoverer, KnxError, WorkerPool};

const TICK: Duration = Duration::from_millis(20);

fn addr(s: &str) -> SocketAddrV4 {
    s.parse().unwrap()
}

fn network(servers: usize) -> (MockNetwork, Vec<MockServer>) {
    let net = MockNetwork::new();
    let servers: Vec<_> = (1..=servers)
        .map(|i| {
            MockServer::new(format!("Server {i}"), addr(&format!("192.168.1.{}:3671", 10 + i)))
                .with_address(0x1100 + i as u16)
        })
        .collect();
    for server in &servers {
        net.add_server(server.clone());
    }
    (net, servers)
}

fn discoverer(net: &MockNetwork) -> Discoverer {
    Discoverer::builder()
        .connector(net.clone())
        .receive_tick(TICK)
        .build()
        .unwrap()
}

fn wait_until_idle(discoverer: &Discoverer, limit: Duration) {
    let deadline = Instant::now() + limit;
    while discoverer.is_searching() {
        assert!(Instant::now() < deadline, "search did not end in time");
        thread::sleep(TICK);
    }
}

// =============================================================================
// Construction and argument checks
// =============================================================================

#[test]
fn test_constructor_port_range() {
    assert!(Discoverer::new(0, false).is_ok());
    assert!(Discoverer::new(65535, true).is_ok());
    assert!(Discoverer::with_interface(None, 3671, false, true).is_ok());

    for port in [-1, 0x10000] {
        let err = Discoverer::new(port, false).unwrap_err();
        assert!(err.is_invalid_argument(), "port {port}: {err}");
    }
}

#[test]
fn test_negative_timeouts_rejected_before_network() {
    let (net, servers) = network(1);
    let discoverer = discoverer(&net);

    match discoverer.start_search(-1, true) {
        Err(KnxError::InvalidArgument(e)) => assert!(e.is_negative_timeout()),
        other => panic!("unexpected {other:?}"),
    }
    assert!(discoverer
        .start_search_on(-1, None, 1, false)
        .unwrap_err()
        .is_invalid_argument());
    assert!(discoverer
        .description(servers[0].control_endpoint(), -1)
        .unwrap_err()
        .is_invalid_argument());

    assert!(net.sent_packets().is_empty());
    assert_eq!(net.open_sockets(), 0);
    assert!(!discoverer.is_searching());
}

// =============================================================================
// Blocking search
// =============================================================================

#[test]
fn test_blocking_search_collects_every_server_once() {
    let (net, servers) = network(3);
    let discoverer = discoverer(&net);

    discoverer.start_search(1, true).unwrap();
    assert!(!discoverer.is_searching());
    assert_eq!(net.open_sockets(), 0);

    let found = discoverer.search_responses();
    assert_eq!(found.len(), 3);
    for (found, server) in found.iter().zip(&servers) {
        assert_eq!(found.response().device.name, server.search_response().device.name);
        assert_eq!(found.remote(), server.control_endpoint());
        assert!(found.local().is_some());
    }

    // a second search keeps the list and adds nothing new
    discoverer.start_search(1, true).unwrap();
    assert_eq!(discoverer.search_responses().len(), 3);

    let request = &net.sent_packets()[0];
    assert_eq!(request.to, DISCOVERY_ENDPOINT);
    assert!(matches!(decode_request(&request.data), Ok(Request::Search(_))));
}

#[test]
fn test_clear_search_responses() {
    let (net, _) = network(2);
    let discoverer = discoverer(&net);

    discoverer.start_search(1, true).unwrap();
    assert_eq!(discoverer.search_responses().len(), 2);

    discoverer.clear_search_responses();
    assert!(discoverer.search_responses().is_empty());
}

#[test]
fn test_arrival_offset_reflects_server_delay() {
    let net = MockNetwork::new();
    net.add_server(
        MockServer::new("Slow", addr("192.168.1.20:3671")).with_delay(Duration::from_millis(300)),
    );
    let discoverer = discoverer(&net);

    discoverer.start_search(1, true).unwrap();
    let found = discoverer.search_responses();
    assert_eq!(found.len(), 1);
    assert!(found[0].arrived_after() >= Duration::from_millis(300));
    assert!(found[0].arrived_after() < Duration::from_secs(1));
}

#[test]
fn test_concurrent_searches_do_not_duplicate() {
    let (net, _) = network(4);
    let single = discoverer(&net);
    single.start_search(1, true).unwrap();
    let expected = single.search_responses().len();

    let discoverer = discoverer(&net);
    discoverer.start_search_on(30000, None, 1, false).unwrap();
    discoverer.start_search_on(30001, None, 1, false).unwrap();
    assert!(discoverer.is_searching());
    wait_until_idle(&discoverer, Duration::from_secs(3));

    assert_eq!(discoverer.search_responses().len(), expected);
    assert_eq!(expected, 4);
    let ports: Vec<_> = net.sent_packets().iter().map(|p| p.from.port()).collect();
    assert!(ports.contains(&30000) && ports.contains(&30001));
}

#[test]
fn test_noise_is_discarded() {
    let (net, servers) = network(1);
    net.add_noise(vec![0xDE, 0xAD, 0xBE, 0xEF], addr("192.168.1.99:3671"));
    net.add_noise(
        servers[0].description_response().encode().unwrap(),
        servers[0].control_endpoint(),
    );
    net.add_noise(
        servers[0].search_response().encode().unwrap()[..30].to_vec(),
        servers[0].control_endpoint(),
    );
    let discoverer = discoverer(&net);

    discoverer.start_search(1, true).unwrap();
    assert_eq!(discoverer.search_responses().len(), 1);
}

#[test]
fn test_unicast_search_target() {
    let (net, servers) = network(2);
    let discoverer = Discoverer::builder()
        .connector(net.clone())
        .receive_tick(TICK)
        .search_target(servers[1].control_endpoint())
        .build()
        .unwrap();

    discoverer.start_search(1, true).unwrap();
    let found = discoverer.search_responses();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].remote(), servers[1].control_endpoint());
}

#[test]
fn test_multicast_responses_advertise_group() {
    let (net, _) = network(2);
    let discoverer = Discoverer::builder()
        .connector(net.clone())
        .receive_tick(TICK)
        .nat(true)
        .multicast_responses(true)
        .build()
        .unwrap();

    discoverer.start_search(1, true).unwrap();
    assert_eq!(discoverer.search_responses().len(), 2);

    let sent = &net.sent_packets()[0];
    assert_eq!(sent.from.port(), 3671);
    match decode_request(&sent.data).unwrap() {
        Request::Search(r) => assert_eq!(r.discovery_endpoint, Hpai::from(DISCOVERY_ENDPOINT)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_bind_conflict_surfaces_synchronously() {
    let (net, _) = network(1);
    let discoverer = discoverer(&net);

    discoverer.start_search_on(40000, None, 0, false).unwrap();
    match discoverer.start_search_on(40000, None, 1, false) {
        Err(KnxError::Transport(e)) => assert!(e.is_bind_failed()),
        other => panic!("unexpected {other:?}"),
    }
    assert!(discoverer.is_searching());

    discoverer.stop_search();
    assert!(!discoverer.is_searching());
}

// =============================================================================
// Stopping and interrupting
// =============================================================================

#[test]
fn test_stop_search_is_idempotent_and_final() {
    let net = MockNetwork::new();
    net.add_server(
        MockServer::new("Late", addr("192.168.1.30:3671")).with_delay(Duration::from_millis(500)),
    );
    let discoverer = discoverer(&net);

    discoverer.stop_search(); // no-op while idle
    for _ in 0..3 {
        discoverer.start_search_on(0, None, 2, false).unwrap();
    }
    assert!(discoverer.is_searching());

    thread::sleep(Duration::from_millis(100));
    discoverer.stop_search();
    assert!(!discoverer.is_searching());
    assert_eq!(net.open_sockets(), 0);
    discoverer.stop_search();

    let count = discoverer.search_responses().len();
    thread::sleep(Duration::from_millis(800));
    assert_eq!(discoverer.search_responses().len(), count);
    assert_eq!(count, 0);
}

#[test]
fn test_search_until_stopped_from_other_thread() {
    let (net, _) = network(2);
    let discoverer = Arc::new(discoverer(&net));

    let stopper = {
        let discoverer = Arc::clone(&discoverer);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            assert!(discoverer.is_searching());
            discoverer.stop_search();
        })
    };

    let started = Instant::now();
    discoverer.start_search(0, true).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));
    stopper.join().unwrap();

    assert!(!discoverer.is_searching());
    assert_eq!(discoverer.search_responses().len(), 2);
}

#[test]
fn test_interrupt_blocking_search() {
    let (net, _) = network(1);
    let discoverer = discoverer(&net);
    let interrupter = discoverer.interrupter();

    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        interrupter.interrupt();
    });

    let err = discoverer.start_search(10, true).unwrap_err();
    assert!(err.is_interrupted());
    assert!(!discoverer.is_searching());
    assert_eq!(net.open_sockets(), 0);
    trigger.join().unwrap();

    // the interrupt was consumed
    discoverer.start_search(1, true).unwrap();
}

#[test]
fn test_drop_stops_sessions() {
    let (net, _) = network(1);
    let discoverer = discoverer(&net);
    discoverer.start_search(0, false).unwrap();
    assert_eq!(net.open_sockets(), 1);

    drop(discoverer);
    assert_eq!(net.open_sockets(), 0);
}

// =============================================================================
// Async search
// =============================================================================

#[test]
fn test_async_search_completes_with_snapshot() {
    let (net, _) = network(2);
    let discoverer = discoverer(&net);

    let handle = discoverer.search_async(Duration::from_secs(1)).unwrap();
    let err = handle.get_timeout(Duration::from_millis(200)).unwrap_err();
    assert!(err.is_timeout());
    assert!(!handle.is_done());
    assert!(discoverer.is_searching());

    let found = handle.get_timeout(Duration::from_millis(1500)).unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found, discoverer.search_responses());
    assert!(handle.is_done());
    assert!(!handle.is_completed_exceptionally());
    assert!(!discoverer.is_searching());
}

#[test]
fn test_workers_idle_as_soon_as_search_ends() {
    let (net, _) = network(1);
    let pool = WorkerPool::new("idle-test");
    let discoverer = Discoverer::builder()
        .connector(net.clone())
        .receive_tick(TICK)
        .pool(pool.clone())
        .build()
        .unwrap();

    for _ in 0..20 {
        let handle = discoverer.search_async(Duration::from_secs(10)).unwrap();
        assert!(handle.cancel());
        assert!(!discoverer.is_searching());
        assert!(pool.all_idle());

        discoverer.start_search(0, false).unwrap();
        assert!(discoverer.is_searching());
        discoverer.stop_search();
        assert!(!discoverer.is_searching());
        assert!(pool.all_idle());
    }
    assert_eq!(pool.len(), 1);
}

#[test]
fn test_async_cancel() {
    let (net, _) = network(1);
    let pool = WorkerPool::new("cancel-test");
    let discoverer = Discoverer::builder()
        .connector(net.clone())
        .receive_tick(TICK)
        .pool(pool.clone())
        .build()
        .unwrap();

    let handle = discoverer.search_async(Duration::from_secs(10)).unwrap();
    assert!(handle
        .get_timeout(Duration::from_millis(100))
        .unwrap_err()
        .is_timeout());

    assert!(handle.cancel());
    assert!(handle.get().unwrap_err().is_cancelled());
    assert!(handle.is_done());
    assert!(handle.is_cancelled());
    assert!(handle.is_completed_exceptionally());
    assert!(!discoverer.is_searching());
    assert!(pool.all_idle());
    assert!(pool.workers().iter().all(|w| w.name.starts_with("cancel-test-")));

    // cancelling again changes nothing
    assert!(!handle.cancel());
    assert!(handle.is_cancelled());
}

#[test]
fn test_stop_search_cancels_handles() {
    let (net, _) = network(1);
    let discoverer = discoverer(&net);

    let handle = discoverer.search_async(Duration::ZERO).unwrap();
    thread::sleep(Duration::from_millis(100));
    discoverer.stop_search();

    assert!(handle.get().unwrap_err().is_cancelled());
}

#[test]
fn test_async_handle_is_a_future() {
    let (net, _) = network(3);
    let discoverer = discoverer(&net);

    let handle = discoverer.search_async(Duration::from_millis(500)).unwrap();
    let found = futures::executor::block_on(handle).unwrap();
    assert_eq!(found.len(), 3);
}

// =============================================================================
// Description
// =============================================================================

#[test]
fn test_description_success() {
    let (net, servers) = network(2);
    let discoverer = discoverer(&net);

    let description = discoverer
        .description(servers[1].control_endpoint(), 1)
        .unwrap();
    assert_eq!(description.remote(), servers[1].control_endpoint());
    assert_eq!(description.response(), &servers[1].description_response());
    assert_eq!(net.open_sockets(), 0);
}

#[test]
fn test_description_timeout_waits_full_bound() {
    let net = MockNetwork::new();
    let server = MockServer::new("Mute", addr("192.168.1.40:3671")).silent_to_description();
    net.add_server(server.clone());
    let discoverer = discoverer(&net);

    let started = Instant::now();
    let err = discoverer.description(server.control_endpoint(), 1).unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "{err}");
    assert!(elapsed >= Duration::from_secs(1), "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3));
}

#[test]
fn test_description_malformed_reply() {
    let net = MockNetwork::new();
    let server = MockServer::new("Broken", addr("192.168.1.41:3671")).malformed_description();
    net.add_server(server.clone());
    let discoverer = discoverer(&net);

    let err = discoverer.description(server.control_endpoint(), 1).unwrap_err();
    assert!(err.is_protocol(), "{err}");
}

#[test]
fn test_description_with_nat_sends_sentinel() {
    let (net, servers) = network(1);
    let discoverer = Discoverer::builder()
        .connector(net.clone())
        .receive_tick(TICK)
        .nat(true)
        .build()
        .unwrap();

    discoverer
        .description(servers[0].control_endpoint(), 1)
        .unwrap();

    let sent = net.sent_packets();
    assert_eq!(&sent[0].data[6..], &[0x08, 0x01, 0, 0, 0, 0, 0, 0]);
    match decode_request(&sent[0].data).unwrap() {
        Request::Description(r) => assert_eq!(r.control_endpoint, Hpai::NAT),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_describe_uses_sender_for_nat_servers() {
    let net = MockNetwork::new();
    let server = MockServer::new("Behind NAT", addr("192.168.1.50:3671")).advertising(Hpai::NAT);
    net.add_server(server.clone());
    let discoverer = discoverer(&net);

    discoverer.start_search(1, true).unwrap();
    let found = discoverer.search_responses();
    assert_eq!(found.len(), 1);
    assert!(found[0].response().control_endpoint.is_nat());

    let description = discoverer.describe(&found[0], 1).unwrap();
    assert_eq!(description.response().device.name, "Behind NAT");
    assert_eq!(net.sent_packets().last().unwrap().to, server.control_endpoint());
}
