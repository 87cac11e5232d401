// tests/integration/monitor_test.rs

use super::fixtures::{read_for, read_reply, send, wait_until, TestServer};
use std::time::Duration;
use stratadb::config::Config;

fn with_namespaces(config: &mut Config) {
    config
        .namespace_tokens
        .insert("token1".to_string(), "ns1".to_string());
    config
        .namespace_tokens
        .insert("token2".to_string(), "ns2".to_string());
}

#[tokio::test]
async fn test_monitor_feed_respects_namespaces() {
    let server = TestServer::start(with_namespaces);

    // Monitor in ns1, monitor in the default namespace, monitor in ns2.
    let mut mon_ns1 = server.connect().await;
    send(&mut mon_ns1, "AUTH token1\r\n").await;
    assert_eq!(read_reply(&mut mon_ns1).await, "+OK\r\n");
    send(&mut mon_ns1, "MONITOR\r\n").await;
    assert_eq!(read_reply(&mut mon_ns1).await, "+OK\r\n");

    let mut mon_admin = server.connect().await;
    send(&mut mon_admin, "MONITOR\r\n").await;
    assert_eq!(read_reply(&mut mon_admin).await, "+OK\r\n");

    let mut mon_ns2 = server.connect().await;
    send(&mut mon_ns2, "AUTH token2\r\n").await;
    assert_eq!(read_reply(&mut mon_ns2).await, "+OK\r\n");
    send(&mut mon_ns2, "MONITOR\r\n").await;
    assert_eq!(read_reply(&mut mon_ns2).await, "+OK\r\n");

    wait_until(|| server.registry.monitor_clients() == 3).await;

    // A source client in ns1 issues a write.
    let mut source = server.connect().await;
    send(&mut source, "AUTH token1\r\n").await;
    assert_eq!(read_reply(&mut source).await, "+OK\r\n");
    let source_addr = source.local_addr().unwrap().to_string();
    send(&mut source, "SET k v\r\n").await;
    assert_eq!(read_reply(&mut source).await, "+OK\r\n");

    // The ns1 monitor and the administrative monitor both see it.
    let feed = read_for(&mut mon_ns1, Duration::from_millis(800)).await;
    assert!(feed.contains("\"SET\" \"k\" \"v\""), "{feed}");
    assert!(feed.contains(&format!("[0 {source_addr}]")), "{feed}");

    let feed = read_for(&mut mon_admin, Duration::from_millis(800)).await;
    assert!(feed.contains("\"SET\" \"k\" \"v\""), "{feed}");

    // The ns2 monitor sees nothing.
    let feed = read_for(&mut mon_ns2, Duration::from_millis(400)).await;
    assert!(!feed.contains("SET"), "{feed}");
}

#[tokio::test]
async fn test_monitor_never_sees_its_own_commands() {
    let server = TestServer::start(|_| {});

    let mut mon_a = server.connect().await;
    send(&mut mon_a, "MONITOR\r\n").await;
    assert_eq!(read_reply(&mut mon_a).await, "+OK\r\n");

    let mut mon_b = server.connect().await;
    send(&mut mon_b, "MONITOR\r\n").await;
    assert_eq!(read_reply(&mut mon_b).await, "+OK\r\n");

    wait_until(|| server.registry.monitor_clients() == 2).await;

    // A monitor still gets replies to its own commands, but its own feed
    // line goes only to the other monitor.
    send(&mut mon_a, "PING\r\n").await;
    let own_view = read_for(&mut mon_a, Duration::from_millis(600)).await;
    assert!(own_view.contains("+PONG"), "{own_view}");
    assert!(!own_view.contains("\"PING\""), "{own_view}");

    let other_view = read_for(&mut mon_b, Duration::from_millis(600)).await;
    assert!(other_view.contains("\"PING\""), "{other_view}");
}

#[tokio::test]
async fn test_monitor_count_follows_promotion_and_disconnect() {
    let server = TestServer::start(|_| {});

    let mut monitor = server.connect().await;
    send(&mut monitor, "MONITOR\r\n").await;
    assert_eq!(read_reply(&mut monitor).await, "+OK\r\n");
    wait_until(|| server.registry.monitor_clients() == 1).await;

    // Promotion must move, not duplicate: one client total.
    assert_eq!(server.registry.clients(), 1);

    drop(monitor);
    wait_until(|| server.registry.monitor_clients() == 0).await;
    wait_until(|| server.registry.clients() == 0).await;
}

#[tokio::test]
async fn test_auth_lines_stay_off_the_feed() {
    let server = TestServer::start(with_namespaces);

    let mut monitor = server.connect().await;
    send(&mut monitor, "MONITOR\r\n").await;
    assert_eq!(read_reply(&mut monitor).await, "+OK\r\n");
    wait_until(|| server.registry.monitor_clients() == 1).await;

    let mut client = server.connect().await;
    send(&mut client, "AUTH token1\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+OK\r\n");
    send(&mut client, "PING\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+PONG\r\n");

    let feed = read_for(&mut monitor, Duration::from_millis(600)).await;
    assert!(!feed.contains("token1"), "{feed}");
    assert!(feed.contains("\"PING\""), "{feed}");
}
