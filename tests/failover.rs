//! End-to-end dispatch tests: scheduling, failover and lifecycle through a live proxy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::http::StatusCode;
use lb_proxy::Strategy;

mod common;

async fn get_text(client: &reqwest::Client, url: &str) -> (StatusCode, String) {
    let res = client.get(url).send().await.expect("Proxy unreachable");
    let status = StatusCode::from_u16(res.status().as_u16()).unwrap();
    (status, res.text().await.unwrap())
}

#[tokio::test]
async fn test_round_robin_rotation() {
    let b1 = common::start_mock_backend("b1").await;
    let b2 = common::start_mock_backend("b2").await;

    let mut config = common::proxy_config(vec![common::backend(b1, 5), common::backend(b2, 1)]);
    config.strategy = Strategy::RoundRobin;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let (status, body) = get_text(&client, &proxy.url("/")).await;
        assert_eq!(status, StatusCode::OK);
        bodies.push(body);
    }
    assert_eq!(bodies, vec!["b1", "b2", "b1", "b2"]);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_weighted_distribution() {
    let b1 = common::start_mock_backend("b1").await;
    let b2 = common::start_mock_backend("b2").await;

    let config = common::proxy_config(vec![common::backend(b1, 3), common::backend(b2, 1)]);
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let mut bodies = Vec::new();
    for _ in 0..8 {
        bodies.push(get_text(&client, &proxy.url("/")).await.1);
    }
    assert_eq!(bodies, vec!["b1", "b1", "b1", "b2", "b1", "b1", "b1", "b2"]);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_failover_skips_dead_backend() {
    let dead = common::dead_addr().await;
    let live = common::start_mock_backend("live").await;

    let mut config = common::proxy_config(vec![common::backend(dead, 1), common::backend(live, 1)]);
    config.strategy = Strategy::RoundRobin;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    for _ in 0..6 {
        let (status, body) = get_text(&client, &proxy.url("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "live");
    }

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_all_backends_dead_returns_503() {
    let d1 = common::dead_addr().await;
    let d2 = common::dead_addr().await;

    let config = common::proxy_config(vec![common::backend(d1, 1), common::backend(d2, 2)]);
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let (status, _) = get_text(&client, &proxy.url("/anything")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_empty_pool_returns_503() {
    let proxy = common::start_proxy(common::proxy_config(Vec::new())).await;
    let client = common::client();

    let (status, _) = get_text(&client, &proxy.url("/")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_backend_error_status_is_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let failing = common::start_programmable_backend(move |_| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            (500, "boom".to_string())
        }
    })
    .await;
    let other = common::start_mock_backend("other").await;

    let mut config = common::proxy_config(vec![common::backend(failing, 1), common::backend(other, 1)]);
    config.strategy = Strategy::RoundRobin;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let (status, body) = get_text(&client, &proxy.url("/")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "boom");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_request_forwarded_with_body_and_path() {
    let dead = common::dead_addr().await;
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let s = seen.clone();
    let echo = common::start_programmable_backend(move |req| {
        let s = s.clone();
        async move {
            let body = req.body.clone();
            s.lock().unwrap().push(req);
            (200, body)
        }
    })
    .await;

    let mut config = common::proxy_config(vec![common::backend(dead, 1), common::backend(echo, 1)]);
    config.strategy = Strategy::RoundRobin;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let res = client
        .post(proxy.url("/api/orders?id=7"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "payload");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/api/orders?id=7");
    assert_eq!(seen[0].header("x-forwarded-for"), Some("127.0.0.1"));
    assert!(seen[0].header("x-request-id").is_some());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_backend_recovers_after_restart() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let flaky = listener.local_addr().unwrap();
    drop(listener);
    let steady = common::start_mock_backend("steady").await;

    let mut config = common::proxy_config(vec![common::backend(flaky, 1), common::backend(steady, 1)]);
    config.strategy = Strategy::RoundRobin;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    assert_eq!(get_text(&client, &proxy.url("/")).await.1, "steady");

    // Bring the first backend up on its old address; the next pre-flight sees it alive.
    let revived = tokio::net::TcpListener::bind(flaky).await.unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = revived.accept().await {
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = [0u8; 4096];
                if matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\nrevived")
                        .await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    let mut bodies = Vec::new();
    for _ in 0..4 {
        bodies.push(get_text(&client, &proxy.url("/")).await.1);
    }
    assert!(bodies.iter().any(|b| b == "revived"), "got {:?}", bodies);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_config_reload_replaces_backends() {
    let old = common::start_mock_backend("old").await;
    let new = common::start_mock_backend("new").await;

    let config = common::proxy_config(vec![common::backend(old, 1)]);
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    assert_eq!(get_text(&client, &proxy.url("/")).await.1, "old");

    proxy
        .config_updates
        .send(common::proxy_config(vec![common::backend(new, 1)]))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    for _ in 0..3 {
        assert_eq!(get_text(&client, &proxy.url("/")).await.1, "new");
    }

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_liveness_monitor_marks_state() {
    let dead = common::dead_addr().await;
    let live = common::start_mock_backend("live").await;

    let mut config = common::proxy_config(vec![common::backend(dead, 1), common::backend(live, 1)]);
    config.health_check.enabled = true;
    config.health_check.interval_secs = 1;
    config.health_check.timeout_secs = 1;

    let server = lb_proxy::HttpServer::new(config).unwrap();
    let pool = server.pool().clone();
    let shutdown = lb_proxy::Shutdown::new();
    let (_tx, updates) = tokio::sync::mpsc::unbounded_channel();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let handle = tokio::spawn(server.run(listener, updates, shutdown.subscribe()));

    tokio::time::sleep(Duration::from_millis(500)).await;

    let dead_url = url::Url::parse(&format!("http://{}", dead)).unwrap();
    let live_url = url::Url::parse(&format!("http://{}", live)).unwrap();
    assert_eq!(pool.is_dead(&dead_url), Some(true));
    assert_eq!(pool.is_dead(&live_url), Some(false));

    shutdown.trigger();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn test_max_connections_limit() {
    let slow = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        (200, "slow".to_string())
    })
    .await;

    let mut config = common::proxy_config(vec![common::backend(slow, 1)]);
    config.listener.max_connections = 1;
    let proxy = common::start_proxy(config).await;

    let url = proxy.url("/");
    let first = tokio::spawn({
        let url = url.clone();
        async move { common::client().get(url).send().await.unwrap().status().as_u16() }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = common::client().get(&url).send().await.unwrap().status().as_u16();

    assert_eq!(second, 503);
    assert_eq!(first.await.unwrap(), 200);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let b1 = common::start_mock_backend("b1").await;
    let proxy = common::start_proxy(common::proxy_config(vec![common::backend(b1, 1)])).await;

    proxy.shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), proxy.handle)
        .await
        .expect("server did not stop");
    assert!(result.unwrap().is_ok());
}
