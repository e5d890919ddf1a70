//! End-to-end tests: a real server, real WebSocket clients, and the full
//! submit → transform → broadcast pipeline.

use scriba_collab::{ClientEvent, CollabClient, CollabServer, MemorySink, ServerConfig, SnapshotSink};
use scriba_ot::{apply, Operation};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

fn insert(position: usize, value: &str) -> Operation {
    Operation::Insert {
        position,
        value: value.to_string(),
    }
}

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_test_server_with(mut config: ServerConfig, sink: Option<Arc<MemorySink>>) -> String {
    let port = free_port().await;
    config.bind_addr = format!("127.0.0.1:{port}");
    let addr = config.bind_addr.clone();
    let server = match sink {
        Some(sink) => CollabServer::with_sink(config, sink),
        None => CollabServer::new(config),
    };
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

async fn start_test_server() -> String {
    start_test_server_with(ServerConfig::default(), None).await
}

/// Like [`start_test_server`], but keeps a handle for stats assertions.
async fn start_observable_server() -> (String, Arc<CollabServer>) {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..ServerConfig::default()
    };
    let addr = config.bind_addr.clone();
    let server = Arc::new(CollabServer::new(config));
    let runner = server.clone();
    tokio::spawn(async move {
        runner.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, server)
}

async fn next_event(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

/// Wait for the next accepted operation, skipping presence traffic.
async fn next_operation(rx: &mut mpsc::Receiver<ClientEvent>) -> (String, u64, Operation) {
    loop {
        match next_event(rx).await {
            ClientEvent::Operation {
                user_id,
                revision,
                operation,
            } => return (user_id, revision, operation),
            ClientEvent::PresenceUpdate(_) | ClientEvent::PresenceLeave { .. } => continue,
            other => panic!("expected operation, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn init_arrives_first_with_empty_document() {
    let addr = start_test_server().await;
    let (_client, mut events) = CollabClient::connect(&addr, "doc", "u1", "Alice")
        .await
        .unwrap();

    match next_event(&mut events).await {
        ClientEvent::Init {
            revision,
            content,
            presence,
        } => {
            assert_eq!(revision, 0);
            assert_eq!(content, "");
            assert_eq!(presence.len(), 1);
            assert_eq!(presence[0].user_id, "u1");
        }
        other => panic!("expected init, got {other:?}"),
    }
}

#[tokio::test]
async fn accepted_operation_echoes_to_submitter() {
    let addr = start_test_server().await;
    let (client, mut events) = CollabClient::connect(&addr, "doc", "u1", "Alice")
        .await
        .unwrap();
    let _ = next_event(&mut events).await; // init

    client.send_operation(&insert(0, "Hello")).await.unwrap();

    let (user_id, revision, operation) = next_operation(&mut events).await;
    assert_eq!(user_id, "u1");
    assert_eq!(revision, 1);
    assert_eq!(operation, insert(0, "Hello"));
    assert_eq!(client.revision(), 1);
}

#[tokio::test]
async fn concurrent_inserts_converge_on_both_clients() {
    let addr = start_test_server().await;

    let (client_a, mut events_a) = CollabClient::connect(&addr, "doc", "u-a", "Alice")
        .await
        .unwrap();
    let ClientEvent::Init { content, .. } = next_event(&mut events_a).await else {
        panic!("expected init");
    };
    let mut doc_a = content;

    let (client_b, mut events_b) = CollabClient::connect(&addr, "doc", "u-b", "Bob")
        .await
        .unwrap();
    let ClientEvent::Init { content, .. } = next_event(&mut events_b).await else {
        panic!("expected init");
    };
    let mut doc_b = content;

    // Seed the document, then run the concurrent-edit scenario: A's
    // insert lands first; B still cites the pre-insert revision.
    client_a.send_operation(&insert(0, "123")).await.unwrap();
    let (_, seed_rev, op) = next_operation(&mut events_a).await;
    doc_a = apply(&doc_a, &op).unwrap();
    let (_, _, op) = next_operation(&mut events_b).await;
    doc_b = apply(&doc_b, &op).unwrap();
    assert_eq!(seed_rev, 1);

    client_a
        .send_operation_at(seed_rev, &insert(1, "A"))
        .await
        .unwrap();
    let (_, rev_a, op) = next_operation(&mut events_a).await;
    doc_a = apply(&doc_a, &op).unwrap();
    let (_, _, op) = next_operation(&mut events_b).await;
    doc_b = apply(&doc_b, &op).unwrap();
    assert_eq!(rev_a, 2);

    // B's concurrent insert against the stale revision: the server must
    // rebase Insert(2,"B") to Insert(3,"B").
    client_b
        .send_operation_at(seed_rev, &insert(2, "B"))
        .await
        .unwrap();
    let (user_id, rev_b, op_b) = next_operation(&mut events_b).await;
    assert_eq!(user_id, "u-b");
    assert_eq!(rev_b, 3);
    assert_eq!(op_b, insert(3, "B"));
    doc_b = apply(&doc_b, &op_b).unwrap();
    let (_, _, op) = next_operation(&mut events_a).await;
    doc_a = apply(&doc_a, &op).unwrap();

    assert_eq!(doc_a, "1A2B3");
    assert_eq!(doc_b, doc_a);
}

#[tokio::test]
async fn malformed_operation_errors_submitter_only() {
    let addr = start_test_server().await;

    let (client_a, mut events_a) = CollabClient::connect(&addr, "doc", "u-a", "Alice")
        .await
        .unwrap();
    let _ = next_event(&mut events_a).await; // init
    let (_client_b, mut events_b) = CollabClient::connect(&addr, "doc", "u-b", "Bob")
        .await
        .unwrap();
    let _ = next_event(&mut events_b).await; // init
    let _ = next_event(&mut events_a).await; // bob's presence_update

    // Insert missing its `value` field.
    client_a
        .send_raw(
            r#"{"type":"operation","revision":10,"operation":{"type":"insert","position":2}}"#
                .to_string(),
        )
        .await
        .unwrap();

    match next_event(&mut events_a).await {
        ClientEvent::ServerError { message } => {
            assert!(message.contains("invalid operation"), "{message}");
        }
        other => panic!("expected error, got {other:?}"),
    }

    // The rejected frame did not advance the revision: the next accepted
    // operation is revision 1, and it is the first thing Bob ever sees.
    client_a.send_operation(&insert(0, "ok")).await.unwrap();
    let (_, revision, _) = next_operation(&mut events_b).await;
    assert_eq!(revision, 1);
}

#[tokio::test]
async fn future_base_revision_is_rejected() {
    let addr = start_test_server().await;
    let (client, mut events) = CollabClient::connect(&addr, "doc", "u1", "Alice")
        .await
        .unwrap();
    let _ = next_event(&mut events).await; // init

    client
        .send_operation_at(99, &insert(0, "x"))
        .await
        .unwrap();

    match next_event(&mut events).await {
        ClientEvent::ServerError { message } => {
            assert!(message.contains("protocol violation"), "{message}");
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn unparseable_frame_is_rejected() {
    let addr = start_test_server().await;
    let (client, mut events) = CollabClient::connect(&addr, "doc", "u1", "Alice")
        .await
        .unwrap();
    let _ = next_event(&mut events).await; // init

    client.send_raw("not json".to_string()).await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::ServerError { .. }
    ));
}

#[tokio::test]
async fn rooms_are_isolated() {
    let addr = start_test_server().await;

    let (client_a, mut events_a) = CollabClient::connect(&addr, "doc-1", "u-a", "Alice")
        .await
        .unwrap();
    let _ = next_event(&mut events_a).await;
    let (_client_b, mut events_b) = CollabClient::connect(&addr, "doc-2", "u-b", "Bob")
        .await
        .unwrap();
    let _ = next_event(&mut events_b).await;

    client_a.send_operation(&insert(0, "only doc-1")).await.unwrap();
    let _ = next_operation(&mut events_a).await;

    // Bob's room stays silent.
    let nothing = timeout(Duration::from_millis(200), events_b.recv()).await;
    assert!(nothing.is_err(), "doc-2 must not see doc-1 traffic");
}

#[tokio::test]
async fn unclean_disconnect_still_leaves_the_room() {
    let (addr, server) = start_observable_server().await;

    let (_alice, mut events_a) = CollabClient::connect(&addr, "doc", "u-a", "Alice")
        .await
        .unwrap();
    let _ = next_event(&mut events_a).await; // init

    // A raw connection torn down without a close handshake: the server
    // must still run the leave path and release the stats slot.
    let (ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/ws/doc?user_id=u-b&username=Bob"
    ))
    .await
    .unwrap();
    match next_event(&mut events_a).await {
        ClientEvent::PresenceUpdate(presence) => assert_eq!(presence.user_id, "u-b"),
        other => panic!("expected presence_update, got {other:?}"),
    }
    drop(ws);

    match next_event(&mut events_a).await {
        ClientEvent::PresenceLeave { user_id } => assert_eq!(user_id, "u-b"),
        other => panic!("expected presence_leave, got {other:?}"),
    }

    timeout(Duration::from_secs(2), async {
        while server.stats().await.active_connections != 1 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stats never reflected the teardown");
}

#[tokio::test]
async fn stats_count_accepted_operations() {
    let (addr, server) = start_observable_server().await;

    let (client, mut events) = CollabClient::connect(&addr, "doc", "u1", "Alice")
        .await
        .unwrap();
    let _ = next_event(&mut events).await; // init

    client.send_operation(&insert(0, "ab")).await.unwrap();
    let _ = next_operation(&mut events).await;
    // A rejected submission must not count.
    client.send_operation_at(99, &insert(0, "x")).await.unwrap();
    let _ = next_event(&mut events).await; // error frame
    client.send_operation(&insert(2, "c")).await.unwrap();
    let _ = next_operation(&mut events).await;

    assert_eq!(server.stats().await.accepted_operations, 2);
}

#[tokio::test]
async fn handshake_without_identity_is_refused() {
    let addr = start_test_server().await;
    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/doc")).await;
    assert!(result.is_err(), "handshake should be rejected");
}

#[tokio::test]
async fn evicted_room_checkpoints_and_restores() {
    let sink = Arc::new(MemorySink::new());
    let config = ServerConfig {
        idle_eviction: Duration::from_millis(200),
        ..ServerConfig::default()
    };
    let addr = start_test_server_with(config, Some(sink.clone())).await;

    let (client, mut events) = CollabClient::connect(&addr, "doc", "u1", "Alice")
        .await
        .unwrap();
    let _ = next_event(&mut events).await; // init
    client.send_operation(&insert(0, "persist me")).await.unwrap();
    let _ = next_operation(&mut events).await;
    client.close().await.unwrap();

    // Wait out the idle window so the room evicts and checkpoints.
    timeout(Duration::from_secs(2), async {
        loop {
            if sink.load("doc").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("room never checkpointed");

    let snapshot = sink.load("doc").unwrap();
    assert_eq!(snapshot.content, "persist me");
    assert_eq!(snapshot.revision, 1);

    // A fresh connection sees the restored document at the same revision.
    let (_client2, mut events2) = CollabClient::connect(&addr, "doc", "u1", "Alice")
        .await
        .unwrap();
    match next_event(&mut events2).await {
        ClientEvent::Init {
            revision, content, ..
        } => {
            assert_eq!(revision, 1);
            assert_eq!(content, "persist me");
        }
        other => panic!("expected init, got {other:?}"),
    }
}
