//! Teardown releases the engine and every pooled record together

use kvbridge::connection::{GetOptions, SetOptions, TeardownStats};
use kvbridge::{
    Client, ClientConfig, ConnectParams, Connection, ConnectionOptions, MemoryStore,
    MemoryTransport, Result, SharedConnection, StatusCode,
};
use std::time::Duration;

#[test]
fn test_close_with_outstanding_work() -> Result<()> {
    let transport = MemoryTransport::new();
    let probe = transport.probe();
    let mut conn = Connection::open(transport, ConnectParams::default(), ConnectionOptions::default())?;

    // one timer pinned by a resolved sync call
    conn.get("k", GetOptions::default().timeout(Duration::from_secs(30)))?;

    conn.enable_async();
    for key in ["a", "b", "c"] {
        conn.transport_mut()
            .set_key_latency(key, Duration::from_secs(10));
        conn.submit_get(key, None)?;
    }
    let delivered_before = probe.snapshot().completions_delivered;

    let stats = conn.close();
    assert_eq!(
        stats,
        TeardownStats {
            tickets: 4,
            timeouts: 1,
            discarded_results: 0,
        }
    );

    let after = probe.snapshot();
    assert_eq!(after.shutdowns, 1);
    assert_eq!(after.discarded_on_shutdown, 4);
    assert_eq!(after.completions_delivered, delivered_before);
    Ok(())
}

#[test]
fn test_drop_tears_down_once() -> Result<()> {
    let transport = MemoryTransport::new();
    let probe = transport.probe();
    {
        let mut conn =
            Connection::open(transport, ConnectParams::default(), ConnectionOptions::default())?;
        conn.set("k", "v", SetOptions::default())?;
    }
    assert_eq!(probe.snapshot().shutdowns, 1);
    Ok(())
}

#[test]
fn test_failed_open_does_not_leak_engine() {
    let mut transport = MemoryTransport::new();
    transport.refuse_connections(StatusCode::AuthError, "bad credentials");
    let probe = transport.probe();

    let err = Connection::open(
        transport,
        ConnectParams::new("db.example", "app", "wrong", "sessions"),
        ConnectionOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err, kvbridge::Error::Failure("bad credentials".to_string()));
    assert_eq!(probe.snapshot().shutdowns, 1);
}

#[test]
fn test_connections_share_a_store_but_not_state() -> Result<()> {
    let store = MemoryStore::new();
    let config = ClientConfig::default();
    let mut first = Client::connect(MemoryTransport::new().with_store(store.clone()), &config)?;
    let mut second = Client::connect(MemoryTransport::new().with_store(store.clone()), &config)?;

    first.set("shared", "from-first", None)?;
    assert_eq!(
        second.get("shared")?.as_deref(),
        Some(&b"from-first"[..])
    );

    first.enable_async();
    first.async_get("shared")?;
    assert_eq!(second.async_pending(), 0);
    assert!(second.get("shared")?.is_some());

    first.close();
    assert_eq!(store.len(), 1);
    Ok(())
}

#[test]
fn test_shared_handle_closes_when_unwrapped() -> Result<()> {
    let conn = Connection::open(
        MemoryTransport::new(),
        ConnectParams::default(),
        ConnectionOptions::default(),
    )?;
    let shared = SharedConnection::new(conn);
    let other = shared.clone();
    other.with(|c| c.set("k", "v", SetOptions::default()))?;
    drop(other);

    let conn = shared.try_unwrap().ok().expect("sole owner");
    assert_eq!(conn.close().tickets, 0);
    Ok(())
}
