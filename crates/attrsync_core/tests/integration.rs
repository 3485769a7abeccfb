//! Integration tests wiring the reconciliation engine, delivery vault and
//! clock synchronizer over an in-memory store and a mock transport.

use attrsync_core::{
    EntityPatchServer, Method, MockTransport, Request, RequestVault, Response, SyncError,
    SyncRegistry, SyncResult, SystemClock, TimeKeeper, Transport, VaultConfig,
};
use attrsync_document::{deep_eq, Document};
use attrsync_store::{InMemoryStore, KeyValueStore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bridges entity patch calls onto the transport, the way an application
/// wires the reconciliation engine to its network stack.
struct TransportPatchServer {
    transport: Arc<MockTransport>,
}

impl EntityPatchServer for TransportPatchServer {
    fn patch_entity(&self, entity_id: &str, diff: &Document) -> SyncResult<()> {
        let request = Request::new(
            Method::Patch,
            format!("/installation/{entity_id}"),
            diff.clone(),
        );
        let response = self.transport.execute(&request)?;
        if response.is_success() {
            Ok(())
        } else {
            Err(SyncError::Rejected {
                status: response.status,
            })
        }
    }
}

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn persisted_field(store: &InMemoryStore, key: &str, field: &str) -> Value {
    let serialized = store.get(key).unwrap().unwrap();
    let state: Value = serde_json::from_str(&serialized).unwrap();
    state.get(field).cloned().unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn put_patch_acknowledge_cycle() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    let registry = SyncRegistry::new(Arc::clone(&store) as _);
    let server = TransportPatchServer {
        transport: Arc::clone(&transport),
    };

    registry.for_entity("device-1").put(&doc(json!({"a": 1})));
    registry.flush_all(&server);

    // The patch carried exactly the mutation.
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Patch);
    assert_eq!(requests[0].resource, "/installation/device-1");
    assert!(deep_eq(
        &Value::Object(requests[0].body.clone()),
        &json!({"a": 1})
    ));

    // Acknowledged: server state caught up, accumulator drained, nothing
    // scheduled.
    assert!(deep_eq(
        &persisted_field(&store, "sync_state:device-1", "server_state"),
        &json!({"a": 1})
    ));
    assert!(deep_eq(
        &persisted_field(&store, "sync_state:device-1", "put_accumulator"),
        &json!({})
    ));
    assert_eq!(
        persisted_field(&store, "sync_state:device-1", "scheduled_patch_call"),
        json!(false)
    );

    // A second flush has nothing to send.
    registry.flush_all(&server);
    assert_eq!(transport.request_count(), 1);
}

#[test]
fn failed_patch_is_retried_with_later_writes_included() {
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    transport.push_transient_failure();

    let registry = SyncRegistry::new(Arc::clone(&store) as _);
    let server = TransportPatchServer {
        transport: Arc::clone(&transport),
    };

    let device = registry.for_entity("device-1");
    device.put(&doc(json!({"a": 1})));
    registry.flush_all(&server); // fails, folds the write back

    device.put(&doc(json!({"b": 2})));
    registry.flush_all(&server); // succeeds

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(deep_eq(
        &Value::Object(requests[1].body.clone()),
        &json!({"a": 1, "b": 2})
    ));
    assert!(deep_eq(
        &Value::Object(device.sdk_state()),
        &json!({"a": 1, "b": 2})
    ));
}

#[test]
fn mutations_survive_process_restart() {
    let store = Arc::new(InMemoryStore::new());

    {
        let registry = SyncRegistry::new(Arc::clone(&store) as _);
        registry.for_entity("device-1").put(&doc(json!({"a": 1})));
        // The process dies before any flush.
    }

    let transport = Arc::new(MockTransport::new());
    let registry = SyncRegistry::new(Arc::clone(&store) as _);
    let server = TransportPatchServer {
        transport: Arc::clone(&transport),
    };
    registry.flush_all(&server);

    assert_eq!(transport.request_count(), 1);
    assert!(deep_eq(
        &Value::Object(transport.requests()[0].body.clone()),
        &json!({"a": 1})
    ));
}

#[test]
fn server_push_during_unrelated_local_edits() {
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    let registry = SyncRegistry::new(Arc::clone(&store) as _);
    let server = TransportPatchServer {
        transport: Arc::clone(&transport),
    };

    let device = registry.for_entity("device-1");
    device.put(&doc(json!({"local": 1})));
    // A full-state refresh arrives from the server before the flush.
    device.receive_state(&doc(json!({"remote": 2})), false);

    assert!(deep_eq(
        &Value::Object(device.sdk_state()),
        &json!({"remote": 2, "local": 1})
    ));

    registry.flush_all(&server);
    assert!(deep_eq(
        &Value::Object(transport.requests()[0].body.clone()),
        &json!({"local": 1})
    ));
}

#[test]
fn vault_delivers_through_outages_and_syncs_the_clock() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    transport.push_transient_failure();
    transport.push_response(Response::ok(json!({"serverTime": 1_700_000_000_000_i64})));

    let time = Arc::new(TimeKeeper::new(
        Arc::new(SystemClock::new()),
        Arc::clone(&store) as _,
    ));
    let vault = RequestVault::start(
        attrsync_core::JobQueue::new(Arc::clone(&store) as _, "default", 32),
        Arc::clone(&transport) as _,
        Arc::clone(&time),
        VaultConfig::new()
            .with_min_backoff(Duration::from_millis(5))
            .with_max_backoff(Duration::from_millis(20)),
        true,
    );

    let send_ms = time.monotonic_ms();
    vault
        .enqueue(
            Request::new(Method::Post, "/events", doc(json!({"type": "open"}))),
            Duration::ZERO,
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        transport.request_count() == 2 && vault.queued_jobs() == 0
    }));

    // Both attempts are the same logical request.
    let requests = transport.requests();
    assert_eq!(
        requests[0].idempotency_key,
        requests[1].idempotency_key
    );

    // The response timestamp calibrates the clock: it now reports server
    // time, not device time.
    let recv_ms = time.monotonic_ms();
    time.record_round_trip(send_ms, recv_ms, 1_700_000_000_000, 0);
    let now = time.now_ms();
    assert!((now - 1_700_000_000_000).abs() < 10_000, "now was {now}");
}
