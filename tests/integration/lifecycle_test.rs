// tests/integration/lifecycle_test.rs

use super::fixtures::{read_reply, reached_eof, send, wait_until, TestServer};
use std::collections::HashSet;

#[tokio::test]
async fn test_ping_across_pool_and_client_list() {
    let server = TestServer::start(|_| {});

    let mut clients = Vec::new();
    for _ in 0..4 {
        let mut client = server.connect().await;
        send(&mut client, "PING\r\n").await;
        assert_eq!(read_reply(&mut client).await, "+PONG\r\n");
        clients.push(client);
    }
    assert_eq!(server.registry.clients(), 4);

    let mut admin = server.connect().await;
    send(&mut admin, "CLIENT LIST\r\n").await;
    let listing = read_reply(&mut admin).await;

    // Five clients (the four plus the admin itself), pairwise distinct ids.
    let ids: HashSet<&str> = listing
        .lines()
        .filter_map(|line| line.split(' ').find(|field| field.starts_with("id=")))
        .collect();
    assert_eq!(ids.len(), 5);

    drop(clients);
    wait_until(|| server.registry.clients() == 1).await;
}

#[tokio::test]
async fn test_client_cap_rejects_excess_connections() {
    let server = TestServer::start(|config| {
        config.max_clients = 3;
    });

    let mut admitted = Vec::new();
    for _ in 0..3 {
        let mut client = server.connect().await;
        send(&mut client, "PING\r\n").await;
        assert_eq!(read_reply(&mut client).await, "+PONG\r\n");
        admitted.push(client);
    }

    let mut rejected = server.connect().await;
    let reply = read_reply(&mut rejected).await;
    assert!(reply.contains("max number of clients reached"), "{reply}");
    assert!(reached_eof(&mut rejected).await);
    assert_eq!(server.registry.clients(), 3);

    // Freeing a slot lets the next client in.
    drop(admitted.pop());
    wait_until(|| server.registry.clients() == 2).await;
    let mut client = server.connect().await;
    send(&mut client, "PING\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+PONG\r\n");
}

#[tokio::test]
async fn test_pipelined_replies_stay_ordered() {
    let server = TestServer::start(|_| {});
    let mut client = server.connect().await;

    send(&mut client, "PING\r\nECHO a\r\nPING\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+PONG\r\n$1\r\na\r\n+PONG\r\n");

    // Same pipeline, multi-bulk framed.
    send(
        &mut client,
        "*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$1\r\nb\r\n",
    )
    .await;
    assert_eq!(read_reply(&mut client).await, "+PONG\r\n$1\r\nb\r\n");
}

#[tokio::test]
async fn test_client_setname_and_id_surface_in_list() {
    let server = TestServer::start(|_| {});
    let mut client = server.connect().await;

    send(&mut client, "CLIENT GETNAME\r\n").await;
    assert_eq!(read_reply(&mut client).await, "$-1\r\n");

    send(&mut client, "CLIENT SETNAME indexer\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+OK\r\n");

    send(&mut client, "CLIENT GETNAME\r\n").await;
    assert_eq!(read_reply(&mut client).await, "$7\r\nindexer\r\n");

    send(&mut client, "CLIENT ID\r\n").await;
    let id_reply = read_reply(&mut client).await;
    assert!(id_reply.starts_with(':'), "{id_reply}");

    send(&mut client, "CLIENT LIST\r\n").await;
    let listing = read_reply(&mut client).await;
    assert!(listing.contains("name=indexer"));
    assert!(listing.contains("cmd=client"));
}

#[tokio::test]
async fn test_storage_commands_roundtrip() {
    let server = TestServer::start(|_| {});
    let mut client = server.connect().await;

    send(&mut client, "SET k v\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+OK\r\n");

    send(&mut client, "GET k\r\n").await;
    assert_eq!(read_reply(&mut client).await, "$1\r\nv\r\n");

    send(&mut client, "EXISTS k missing\r\n").await;
    assert_eq!(read_reply(&mut client).await, ":1\r\n");

    send(&mut client, "DEL k\r\n").await;
    assert_eq!(read_reply(&mut client).await, ":1\r\n");

    send(&mut client, "GET k\r\n").await;
    assert_eq!(read_reply(&mut client).await, "$-1\r\n");
}

#[tokio::test]
async fn test_unknown_command_keeps_connection_open() {
    let server = TestServer::start(|_| {});
    let mut client = server.connect().await;

    send(&mut client, "NOSUCH\r\n").await;
    let reply = read_reply(&mut client).await;
    assert!(reply.contains("unknown command 'nosuch'"), "{reply}");

    send(&mut client, "PING\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+PONG\r\n");
}

#[tokio::test]
async fn test_protocol_error_closes_after_reply() {
    let server = TestServer::start(|_| {});
    let mut client = server.connect().await;

    send(&mut client, "*1\r\n+PING\r\n").await;
    let reply = read_reply(&mut client).await;
    assert!(reply.contains("Protocol error"), "{reply}");
    assert!(reached_eof(&mut client).await);
    wait_until(|| server.registry.clients() == 0).await;
}

#[tokio::test]
async fn test_quit_closes_after_ok() {
    let server = TestServer::start(|_| {});
    let mut client = server.connect().await;

    send(&mut client, "QUIT\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+OK\r\n");
    assert!(reached_eof(&mut client).await);
}

#[tokio::test]
async fn test_requirepass_gates_commands() {
    let server = TestServer::start(|config| {
        config.requirepass = Some("sesame".to_string());
    });
    let mut client = server.connect().await;

    send(&mut client, "PING\r\n").await;
    let reply = read_reply(&mut client).await;
    assert!(reply.starts_with("-NOAUTH"), "{reply}");

    send(&mut client, "AUTH wrong\r\n").await;
    let reply = read_reply(&mut client).await;
    assert!(reply.contains("invalid password"), "{reply}");

    send(&mut client, "AUTH sesame\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+OK\r\n");

    send(&mut client, "PING\r\n").await;
    assert_eq!(read_reply(&mut client).await, "+PONG\r\n");
}
