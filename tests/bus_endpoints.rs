//! End-to-end tests: supervisor and udev endpoints answering typed calls
//! through a real broker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vinit::api::{InitApi, UdevApi};
use vinit::bus::broker::{bind_socket, Broker};
use vinit::bus::Connection;
use vinit::supervisor::{rpc, Supervisor};
use vinit::udev::pool::Pool;

fn start_broker() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bus.sock");
    let listener = bind_socket(&path).expect("bind broker socket");
    tokio::spawn(Arc::new(Broker::new()).run(listener));
    (dir, path)
}

fn write_unit(dir: &std::path::Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).expect("write unit file");
}

/// Retry until the endpoint has registered its object on the bus.
async fn call_with_retry<T, F, Fut>(mut attempt: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..100 {
        if let Some(value) = attempt().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("endpoint never became reachable");
}

#[tokio::test]
async fn list_returns_all_service_names() {
    let (_dir, bus_path) = start_broker();

    let units = tempfile::tempdir().unwrap();
    write_unit(
        units.path(),
        "a.service",
        "[Service]\nStage=init\nType=oneshot\nExecStart=/bin/true\n",
    );
    write_unit(
        units.path(),
        "b.service",
        "[Service]\nStage=init\nType=oneshot\nExecStart=/bin/true\n",
    );

    let mut supervisor = Supervisor::new(None);
    supervisor.load_units(units.path()).await.unwrap();
    let supervisor = Arc::new(supervisor);

    let endpoint_path = bus_path.clone();
    let endpoint_su = Arc::clone(&supervisor);
    tokio::spawn(async move {
        let _ = rpc::serve_at(&endpoint_path, &endpoint_su).await;
    });

    let names = call_with_retry(|| {
        let bus_path = bus_path.clone();
        async move {
            let conn = Connection::connect(&bus_path).await.ok()?;
            InitApi::from_connection(conn).list("").await.ok()
        }
    })
    .await;
    assert_eq!(names, vec!["a", "b"]);
}

#[tokio::test]
async fn status_of_unknown_service() {
    let (_dir, bus_path) = start_broker();

    let units = tempfile::tempdir().unwrap();
    let mut supervisor = Supervisor::new(None);
    supervisor.load_units(units.path()).await.unwrap();
    let supervisor = Arc::new(supervisor);

    let endpoint_path = bus_path.clone();
    tokio::spawn(async move {
        let _ = rpc::serve_at(&endpoint_path, &supervisor).await;
    });

    let status = call_with_retry(|| {
        let bus_path = bus_path.clone();
        async move {
            let conn = Connection::connect(&bus_path).await.ok()?;
            InitApi::from_connection(conn)
                .status("nonexistent")
                .await
                .ok()
        }
    })
    .await;
    assert_eq!(status, "unknown");
}

#[tokio::test]
async fn init_endpoint_rejects_unknown_events() {
    let (_dir, bus_path) = start_broker();

    let supervisor = Arc::new(Supervisor::new(None));
    let endpoint_path = bus_path.clone();
    tokio::spawn(async move {
        let _ = rpc::serve_at(&endpoint_path, &supervisor).await;
    });

    // Before the endpoint registers, the broker answers "unknown object";
    // keep retrying until the endpoint itself rejects the event.
    let error = call_with_retry(|| {
        let bus_path = bus_path.clone();
        async move {
            let mut conn = Connection::connect(&bus_path).await.ok()?;
            match conn.call(vinit::api::INIT_OBJECT_ID, 77, b"").await {
                Err(e) if e.to_string().contains("unknown event") => Some(e),
                _ => None,
            }
        }
    })
    .await;
    assert!(error.to_string().contains("unknown event 77"), "{}", error);
}

#[tokio::test]
async fn idle_query_on_an_empty_pool() {
    let (_dir, bus_path) = start_broker();

    let pool = Pool::new(2, 16);
    let endpoint_path = bus_path.clone();
    tokio::spawn(async move {
        let _ = vinit::udev::service::serve_at(&endpoint_path, &pool).await;
    });

    let idle = call_with_retry(|| {
        let bus_path = bus_path.clone();
        async move {
            let conn = Connection::connect(&bus_path).await.ok()?;
            UdevApi::from_connection(conn).is_idle().await.ok()
        }
    })
    .await;
    assert!(idle);
}
