use dats::prelude::*;
use dats::test::UdpCollector;
use dats::{Family, MetricError, MetricResult, Resolver, StatsdClient, SystemResolver};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod utils;
use utils::{run_arc_threaded_test, TIMEOUT};

fn new_udp_client(collector: &UdpCollector, namespace: &str) -> StatsdClient {
    StatsdClient::builder(&collector.url("udp"))
        .with_namespace(namespace)
        .build()
        .unwrap()
}

fn counting_resolver(
    calls: Arc<AtomicUsize>,
) -> impl Fn(&str, Option<Family>) -> MetricResult<IpAddr> + Send + Sync {
    move |_hostname: &str, _family: Option<Family>| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

#[test]
fn test_udp_counter_with_sampling() {
    let collector = UdpCollector::new().unwrap();
    let client = new_udp_client(&collector, "ns1");

    client.counter_with_rate("some.metric", 1, 10.0);
    assert_eq!(Some("ns1.some.metric:1|c|@10".to_string()), collector.recv_timeout(TIMEOUT));
}

#[test]
fn test_udp_gauge_ignores_sampling() {
    let collector = UdpCollector::new().unwrap();
    let client = new_udp_client(&collector, "ns1");

    client.gauge_with_rate("some.metric", 1.0, 10.0);
    assert_eq!(Some("ns1.some.metric:1|g".to_string()), collector.recv_timeout(TIMEOUT));
}

#[test]
fn test_udp_namespace_leading_dots() {
    let collector = UdpCollector::new().unwrap();
    let client = new_udp_client(&collector, "...s.a.b");

    client.incr("hits");
    assert_eq!(Some("s.a.b.hits:1|c".to_string()), collector.recv_timeout(TIMEOUT));
}

#[test]
fn test_udp_namespace_pid_template() {
    let collector = UdpCollector::new().unwrap();
    let client = new_udp_client(&collector, "ns1.${pid}");

    client.set("users", 4);
    let expected = format!("ns1.{}.users:4|s", std::process::id());
    assert_eq!(Some(expected), collector.recv_timeout(TIMEOUT));
}

#[test]
fn test_udp_unbuffered_one_datagram_per_metric() {
    let collector = UdpCollector::new().unwrap();
    let client = new_udp_client(&collector, "");

    client.incr("a");
    client.incr("b");
    client.incr("c");
    client.close();

    for expected in &["a:1|c", "b:1|c", "c:1|c"] {
        assert_eq!(Some(expected.to_string()), collector.recv_timeout(TIMEOUT));
    }
}

#[test]
fn test_udp_buffer_flushed_by_timer() {
    let collector = UdpCollector::new().unwrap();
    let client = StatsdClient::builder(&collector.url("udp"))
        .with_buffer_size(1024)
        .with_buffer_flush_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let start = Instant::now();
    client.counter("hits", 1);
    client.counter("hits", 1);

    assert_eq!(None, collector.recv_timeout(Duration::from_millis(50)));
    assert_eq!(Some("hits:1|c\nhits:1|c".to_string()), collector.recv_timeout(TIMEOUT));
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[test]
fn test_udp_buffer_overflow_flushes_immediately() {
    let collector = UdpCollector::new().unwrap();
    let client = StatsdClient::builder(&collector.url("udp"))
        .with_buffer_size(20)
        .with_buffer_flush_timeout(Duration::from_secs(30))
        .build()
        .unwrap();

    client.counter("hits", 1);
    client.counter("hits", 1);
    client.counter("hits", 1);

    assert_eq!(Some("hits:1|c\nhits:1|c".to_string()), collector.recv_timeout(TIMEOUT));
    assert_eq!(None, collector.recv_timeout(Duration::from_millis(100)));

    client.close();
    assert_eq!(Some("hits:1|c".to_string()), collector.recv_timeout(TIMEOUT));
}

#[test]
fn test_udp4_hostname() {
    let collector = UdpCollector::new().unwrap();
    let client = StatsdClient::builder(&format!("udp4://localhost:{}", collector.port()))
        .with_dns_cache(true)
        .build()
        .unwrap();

    client.timing("request", 12u64);
    assert_eq!(Some("request:12|ms".to_string()), collector.recv_timeout(TIMEOUT));
}

#[test]
fn test_udp6_literal() {
    // Hosts without IPv6 loopback can't run this one
    let collector = match UdpCollector::new_v6() {
        Ok(c) => c,
        Err(_) => return,
    };
    let client = StatsdClient::builder(&collector.url("udp6")).build().unwrap();

    client.incr("v6");
    assert_eq!(Some("v6:1|c".to_string()), collector.recv_timeout(TIMEOUT));
}

#[test]
fn test_udp4_scheme_with_v6_literal() {
    let collector = match UdpCollector::new_v6() {
        Ok(c) => c,
        Err(_) => return,
    };
    let client = StatsdClient::builder(&collector.url("udp4")).build().unwrap();

    client.incr("literal.wins");
    assert_eq!(Some("literal.wins:1|c".to_string()), collector.recv_timeout(TIMEOUT));
}

#[test]
fn test_udp_scheme_with_v6_literal() {
    let collector = match UdpCollector::new_v6() {
        Ok(c) => c,
        Err(_) => return,
    };
    let client = StatsdClient::builder(&collector.url("udp")).build().unwrap();

    client.incr("unhinted");
    assert_eq!(Some("unhinted:1|c".to_string()), collector.recv_timeout(TIMEOUT));
}

#[test]
fn test_udp6_hostname() {
    let collector = match UdpCollector::new_v6() {
        Ok(c) => c,
        Err(_) => return,
    };
    // Some hosts don't map localhost to ::1
    if SystemResolver.resolve("localhost", Some(Family::V6)).is_err() {
        return;
    }

    for cache_dns in &[false, true] {
        let client = StatsdClient::builder(&format!("udp6://localhost:{}", collector.port()))
            .with_dns_cache(*cache_dns)
            .build()
            .unwrap();

        client.incr("v6.name");
        assert_eq!(Some("v6.name:1|c".to_string()), collector.recv_timeout(TIMEOUT));
        client.close();
    }
}

#[test]
fn test_udp_huge_dns_ttl() {
    let collector = UdpCollector::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = crossbeam_channel::unbounded();
    let client = StatsdClient::builder(&format!("udp://collector.invalid:{}", collector.port()))
        .with_dns_cache(true)
        .with_dns_ttl(Duration::from_secs(u64::MAX))
        .with_resolver(counting_resolver(calls.clone()))
        .with_error_handler(move |e| {
            let _ = tx.send(e.to_string());
        })
        .build()
        .unwrap();

    client.incr("a");
    client.incr("b");
    client.close();

    assert_eq!(Some("a:1|c".to_string()), collector.recv_timeout(TIMEOUT));
    assert_eq!(Some("b:1|c".to_string()), collector.recv_timeout(TIMEOUT));
    assert_eq!(1, calls.load(Ordering::SeqCst));
    assert_eq!(0, client.panics());
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_udp_oversized_line_not_delayed() {
    let collector = UdpCollector::new().unwrap();
    let client = StatsdClient::builder(&collector.url("udp"))
        .with_buffer_size(1)
        .with_buffer_flush_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    client.incr("hits");
    assert_eq!(Some("hits:1|c".to_string()), collector.recv_timeout(Duration::from_millis(500)));
}

#[test]
fn test_udp_dns_cache_resolves_once() {
    let collector = UdpCollector::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let client = StatsdClient::builder(&format!("udp://collector.invalid:{}", collector.port()))
        .with_dns_cache(true)
        .with_dns_ttl(Duration::from_secs(60))
        .with_resolver(counting_resolver(calls.clone()))
        .build()
        .unwrap();

    client.incr("a");
    client.incr("b");
    client.incr("c");
    client.close();

    for expected in &["a:1|c", "b:1|c", "c:1|c"] {
        assert_eq!(Some(expected.to_string()), collector.recv_timeout(TIMEOUT));
    }
    assert_eq!(1, calls.load(Ordering::SeqCst));
}

#[test]
fn test_udp_without_dns_cache_resolves_every_send() {
    let collector = UdpCollector::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let client = StatsdClient::builder(&format!("udp://collector.invalid:{}", collector.port()))
        .with_resolver(counting_resolver(calls.clone()))
        .build()
        .unwrap();

    client.incr("a");
    client.incr("b");
    client.incr("c");
    client.close();

    assert_eq!(3, calls.load(Ordering::SeqCst));
}

#[test]
fn test_udp_resolution_error_goes_to_handler() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let resolver = |hostname: &str, _family: Option<Family>| -> MetricResult<IpAddr> {
        Err(MetricError::from((
            dats::ErrorKind::ResolveError,
            "Unable to resolve host",
            hostname.to_string(),
        )))
    };

    let client = StatsdClient::builder("udp://collector.invalid:8125")
        .with_resolver(resolver)
        .with_error_handler(move |e| {
            let _ = tx.send(e.code());
        })
        .build()
        .unwrap();

    client.incr("lost");
    client.close();

    assert_eq!(Ok("ENOTFOUND"), rx.recv_timeout(TIMEOUT));
}

#[test]
fn test_udp_close_twice() {
    let collector = UdpCollector::new().unwrap();
    let client = new_udp_client(&collector, "");

    client.close();
    client.close();
    client.incr("late");

    assert_eq!(None, collector.recv_timeout(Duration::from_millis(100)));
    assert_eq!(0, client.stats().packets_sent);
}

#[test]
fn test_udp_stats() {
    let collector = UdpCollector::new().unwrap();
    let client = new_udp_client(&collector, "");

    client.incr("a");
    client.close();

    let stats = client.stats();
    assert_eq!(1, stats.packets_sent);
    assert_eq!(5, stats.bytes_sent);
}

#[test]
fn test_statsd_client_udp_single_threaded() {
    let collector = UdpCollector::new().unwrap();
    let client = new_udp_client(&collector, "dats");
    run_arc_threaded_test(client, 1, 1);
}

#[test]
fn test_statsd_client_buffered_udp_multi_threaded() {
    let collector = UdpCollector::new().unwrap();
    let client = StatsdClient::builder(&collector.url("udp"))
        .with_namespace("dats")
        .with_buffer_size(512)
        .build()
        .unwrap();
    run_arc_threaded_test(client, 10, 100);
}
