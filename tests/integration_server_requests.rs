//! Full-stack integration tests: a real `IpcServer` on its own thread, a
//! real `IpcClient` attached to the same segment, covering the cache
//! routes, the demonstration routes, restart persistence, and the
//! unknown-route timeout.

use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;

use ircache::{IpcClient, IpcServer, ServerHandle, TransportError};
use tempfile::TempDir;
use uuid::Uuid;

fn unique_segment() -> String {
    format!("/ircache_test_{}", Uuid::new_v4().simple())
}

fn start_server(segment: &str, cache_path: &Path) -> (JoinHandle<anyhow::Result<()>>, ServerHandle) {
    let mut server = IpcServer::new(segment, cache_path).expect("server must start");
    let handle = server.handle();
    let join = std::thread::spawn(move || server.run());
    (join, handle)
}

fn connect(segment: &str) -> IpcClient {
    let mut client = IpcClient::connect_to(segment).expect("client must attach");
    client.set_response_timeout(Some(Duration::from_secs(5)));
    client
}

#[test]
fn store_then_fetch_ir_graph() {
    let dir = TempDir::new().unwrap();
    let segment = unique_segment();
    let (join, handle) = start_server(&segment, &dir.path().join("cache"));
    let mut client = connect(&segment);

    let graph: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();
    client.add_ir_graph("HASH_A", &graph).unwrap();

    let reply = client.get_ir_graph("HASH_A").unwrap();
    assert!(reply.success);
    assert!(reply.error_message.is_empty());
    assert_eq!(reply.graph, graph);

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn missing_graph_reports_in_band_error() {
    let dir = TempDir::new().unwrap();
    let segment = unique_segment();
    let (join, handle) = start_server(&segment, &dir.path().join("cache"));
    let mut client = connect(&segment);

    let reply = client.get_ir_graph("MISSING").unwrap();
    assert!(!reply.success);
    assert_eq!(reply.error_message, "Fonction non trouvée dans le cache");
    assert!(reply.graph.is_empty());

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn cache_survives_server_restart() {
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("cache");
    let graph = b"persistent graph bytes".to_vec();

    let segment = unique_segment();
    let (join, handle) = start_server(&segment, &cache_path);
    let mut client = connect(&segment);
    client.add_ir_graph("HASH_A", &graph).unwrap();
    // Confirm the entry landed before stopping
    assert!(client.get_ir_graph("HASH_A").unwrap().success);
    drop(client);
    handle.stop();
    join.join().unwrap().unwrap();

    // A fresh server over the same backing file still serves the entry.
    let segment = unique_segment();
    let (join, handle) = start_server(&segment, &cache_path);
    let mut client = connect(&segment);
    let reply = client.get_ir_graph("HASH_A").unwrap();
    assert!(reply.success);
    assert_eq!(reply.graph, graph);

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn overwrite_returns_latest_graph() {
    let dir = TempDir::new().unwrap();
    let segment = unique_segment();
    let (join, handle) = start_server(&segment, &dir.path().join("cache"));
    let mut client = connect(&segment);

    client.add_ir_graph("HASH_A", &[1u8; 64]).unwrap();
    client.add_ir_graph("HASH_A", &[2u8; 128]).unwrap();

    let reply = client.get_ir_graph("HASH_A").unwrap();
    assert!(reply.success);
    assert_eq!(reply.graph, vec![2u8; 128]);

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn legacy_get_ir_is_bit_packed() {
    let dir = TempDir::new().unwrap();
    let segment = unique_segment();
    let (join, handle) = start_server(&segment, &dir.path().join("cache"));
    let mut client = connect(&segment);

    let bits = vec![0xAB, 0xCD, 0xEF, 0x12, 0x34];
    client.add_ir_graph("HASH_BITS", &bits).unwrap();

    let reply = client.get_ir("HASH_BITS").unwrap();
    assert!(reply.success);
    assert_eq!(reply.bit_count, 40);
    assert_eq!(reply.bits, bits);

    let miss = client.get_ir("NO_SUCH_HASH").unwrap();
    assert!(!miss.success);
    assert_eq!(miss.error_message, "Fonction non trouvée");

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn fire_and_forget_routes_keep_the_loop_ready() {
    let dir = TempDir::new().unwrap();
    let segment = unique_segment();
    let (join, handle) = start_server(&segment, &dir.path().join("cache"));
    let mut client = connect(&segment);

    // No responses expected from the user routes, and no error either: the
    // following request/response cycle proves the loop is still serving.
    client.create_user("alice", "alice@x").unwrap();
    client.get_user(123).unwrap();
    client.delete_user(456).unwrap();

    let reply = client.get_ir_graph("STILL_ALIVE").unwrap();
    assert!(!reply.success);

    handle.stop();
    join.join().unwrap().unwrap();
}

#[test]
fn unknown_route_times_out_instead_of_hanging() {
    let dir = TempDir::new().unwrap();
    let segment = unique_segment();
    let (join, handle) = start_server(&segment, &dir.path().join("cache"));
    let mut client = connect(&segment);
    client.set_response_timeout(Some(Duration::from_millis(200)));

    let err = client
        .send_request_with_response("no/such/route", &[0u8; 4])
        .unwrap_err();
    assert!(matches!(err, TransportError::ResponseTimeout));

    // The server dropped the message and is still serving.
    client.set_response_timeout(Some(Duration::from_secs(5)));
    assert!(!client.get_ir_graph("ANYTHING").unwrap().success);

    handle.stop();
    join.join().unwrap().unwrap();
}
