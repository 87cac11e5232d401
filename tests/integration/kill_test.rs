// tests/integration/kill_test.rs

use super::fixtures::{read_reply, reached_eof, send, wait_until, TestServer};

#[tokio::test]
async fn test_kill_by_addr_closes_the_target() {
    let server = TestServer::start(|_| {});

    let mut victim = server.connect().await;
    send(&mut victim, "PING\r\n").await;
    assert_eq!(read_reply(&mut victim).await, "+PONG\r\n");
    let victim_addr = victim.local_addr().unwrap().to_string();

    let mut killer = server.connect().await;
    send(&mut killer, &format!("CLIENT KILL ADDR {victim_addr}\r\n")).await;
    assert_eq!(read_reply(&mut killer).await, ":1\r\n");

    assert!(reached_eof(&mut victim).await);
    wait_until(|| server.registry.clients() == 1).await;

    send(&mut killer, "CLIENT LIST\r\n").await;
    let listing = read_reply(&mut killer).await;
    assert!(!listing.contains(&format!("addr={victim_addr}")));
}

#[tokio::test]
async fn test_kill_by_id_with_skipme() {
    let server = TestServer::start(|_| {});
    let mut client = server.connect().await;

    send(&mut client, "CLIENT ID\r\n").await;
    let reply = read_reply(&mut client).await;
    let id: u64 = reply
        .trim_start_matches(':')
        .trim_end()
        .parse()
        .expect("client id");

    // skipme (the default) spares the caller.
    send(&mut client, &format!("CLIENT KILL ID {id}\r\n")).await;
    assert_eq!(read_reply(&mut client).await, ":0\r\n");
    send(&mut client, "PING\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+PONG\r\n");

    // With SKIPME no, the caller kills itself; the reply drains first.
    send(&mut client, &format!("CLIENT KILL ID {id} SKIPME no\r\n")).await;
    assert_eq!(read_reply(&mut client).await, ":1\r\n");
    assert!(reached_eof(&mut client).await);
    wait_until(|| server.registry.clients() == 0).await;
}

#[tokio::test]
async fn test_legacy_kill_form_replies_ok_or_errors() {
    let server = TestServer::start(|_| {});

    let mut victim = server.connect().await;
    send(&mut victim, "PING\r\n").await;
    assert_eq!(read_reply(&mut victim).await, "+PONG\r\n");
    let victim_addr = victim.local_addr().unwrap().to_string();

    let mut killer = server.connect().await;
    send(&mut killer, "CLIENT KILL 9.9.9.9:1\r\n").await;
    let reply = read_reply(&mut killer).await;
    assert!(reply.contains("No such client"), "{reply}");

    send(&mut killer, &format!("CLIENT KILL {victim_addr}\r\n")).await;
    assert_eq!(read_reply(&mut killer).await, "+OK\r\n");
    assert!(reached_eof(&mut victim).await);
}
