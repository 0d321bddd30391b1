//! End-to-end proxying: selection, header rules, failures and health.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::http::StatusCode;

mod common;

#[tokio::test]
async fn round_robin_spreads_requests_evenly() {
    let b1 = common::start_named_backend("b1").await;
    let b2 = common::start_named_backend("b2").await;
    let b3 = common::start_named_backend("b3").await;
    let proxy = common::start_proxy(common::proxy_config(&[b1, b2, b3])).await;
    let client = common::client();

    let mut order = Vec::new();
    for _ in 0..9 {
        let res = client.get(proxy.url("/")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        order.push(res.text().await.unwrap());
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in &order {
        *counts.entry(name.as_str()).or_default() += 1;
    }
    assert_eq!(counts.get("b1"), Some(&3), "{order:?}");
    assert_eq!(counts.get("b2"), Some(&3), "{order:?}");
    assert_eq!(counts.get("b3"), Some(&3), "{order:?}");

    // Strict rotation: no backend twice in a row.
    for pair in order.windows(2) {
        assert_ne!(pair[0], pair[1], "{order:?}");
    }
}

#[tokio::test]
async fn unhealthy_backends_are_skipped() {
    let b1 = common::start_named_backend("b1").await;
    let b2 = common::start_named_backend("b2").await;
    let proxy = common::start_proxy(common::proxy_config(&[b1, b2])).await;
    proxy.registry.mark_unhealthy("b1");
    let client = common::client();

    for _ in 0..4 {
        let res = client.get(proxy.url("/")).send().await.unwrap();
        assert_eq!(res.text().await.unwrap(), "b2");
    }
}

#[tokio::test]
async fn no_healthy_backend_returns_503_without_contacting_any() {
    let (addr, accepted) = common::start_counting_listener().await;
    let proxy = common::start_proxy(common::proxy_config(&[addr])).await;
    proxy.registry.mark_unhealthy("b1");
    let client = common::client();

    for _ in 0..3 {
        let res = client.get(proxy.url("/anything")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn preserves_method_path_query_and_body() {
    let b1 = common::start_echo_backend("b1").await;
    let proxy = common::start_proxy(common::proxy_config(&[b1])).await;

    let res = common::client()
        .put(proxy.url("/api/items/7?expand=true&page=2"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let echo: serde_json::Value = res.json().await.unwrap();
    assert_eq!(echo["method"], "PUT");
    assert_eq!(echo["path"], "/api/items/7?expand=true&page=2");
    assert_eq!(echo["content_length"], 7);
}

#[tokio::test]
async fn request_headers_are_rewritten_for_the_backend() {
    let b1 = common::start_echo_backend("b1").await;
    let proxy = common::start_proxy(common::proxy_config(&[b1])).await;

    let res = common::client()
        .get(proxy.url("/headers"))
        .header("connection", "x-session-hint")
        .header("x-session-hint", "secret")
        .header("keep-alive", "timeout=5")
        .header("proxy-authorization", "Basic Zm9vOmJhcg==")
        .header("x-forwarded-for", "203.0.113.9")
        .header("x-custom", "kept")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let request_id = res.headers()["x-request-id"].to_str().unwrap().to_string();

    let echo: serde_json::Value = res.json().await.unwrap();
    let headers = &echo["headers"];
    assert!(headers.get("x-session-hint").is_none(), "{headers}");
    assert!(headers.get("keep-alive").is_none(), "{headers}");
    assert!(headers.get("proxy-authorization").is_none(), "{headers}");
    assert_eq!(headers["x-custom"], "kept");
    assert_eq!(headers["x-forwarded-for"], "203.0.113.9, 127.0.0.1");
    assert_eq!(headers["x-real-ip"], "127.0.0.1");
    assert_eq!(headers["x-forwarded-proto"], "http");
    assert_eq!(headers["x-forwarded-host"], proxy.addr.to_string());
    assert_eq!(headers["host"], b1.to_string());
    assert_eq!(headers["x-request-id"], request_id.as_str());
}

#[tokio::test]
async fn client_request_id_is_kept() {
    let b1 = common::start_echo_backend("b1").await;
    let proxy = common::start_proxy(common::proxy_config(&[b1])).await;

    let res = common::client()
        .get(proxy.url("/"))
        .header("x-request-id", "trace-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-123");
    let echo: serde_json::Value = res.json().await.unwrap();
    assert_eq!(echo["headers"]["x-request-id"], "trace-123");
}

#[tokio::test]
async fn response_hop_by_hop_headers_are_stripped() {
    let b1 = common::start_raw_backend(
        "HTTP/1.1 200 OK\r\n\
         Content-Length: 4\r\n\
         Connection: close, x-backend-hop\r\n\
         X-Backend-Hop: 1\r\n\
         Keep-Alive: timeout=5\r\n\
         X-Kept: yes\r\n\
         \r\n\
         body",
    )
    .await;
    let proxy = common::start_proxy(common::proxy_config(&[b1])).await;

    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("x-backend-hop").is_none());
    assert!(res.headers().get("keep-alive").is_none());
    assert_eq!(res.headers()["x-kept"], "yes");
    assert_eq!(res.text().await.unwrap(), "body");
}

#[tokio::test]
async fn backend_status_and_redirects_are_relayed() {
    let b1 = common::start_raw_backend(
        "HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 0\r\n\r\n",
    )
    .await;
    let proxy = common::start_proxy(common::proxy_config(&[b1])).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap();
    let res = client.get(proxy.url("/old")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()["location"], "/elsewhere");
}

#[tokio::test]
async fn unreachable_backend_returns_502() {
    let (listener, addr) = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    };
    drop(listener);

    let proxy = common::start_proxy(common::proxy_config(&[addr])).await;
    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert!(!proxy.registry.get("b1").unwrap().is_healthy());
}

#[tokio::test]
async fn silent_backend_times_out_with_504() {
    let b1 = common::start_silent_backend().await;
    let mut config = common::proxy_config(&[b1]);
    config.timeouts.backend_secs = 1;
    let proxy = common::start_proxy(config).await;

    let start = Instant::now();
    let res = common::client().get(proxy.url("/slow")).send().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    assert_eq!(proxy.registry.get("b1").unwrap().active_connections(), 0);
}

#[tokio::test]
async fn health_route_reports_backend_state() {
    let b1 = common::start_named_backend("b1").await;
    let b2 = common::start_named_backend("b2").await;
    let proxy = common::start_proxy(common::proxy_config(&[b1, b2])).await;
    proxy.registry.mark_unhealthy("b2");

    let res = common::client().get(proxy.url("/_health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: serde_json::Value = res.json().await.unwrap();
    assert_eq!(report["status"], "ok");
    assert_eq!(report["backends"][0]["id"], "b1");
    assert_eq!(report["backends"][0]["healthy"], true);
    assert_eq!(report["backends"][1]["id"], "b2");
    assert_eq!(report["backends"][1]["healthy"], false);
    assert!(report["backends"][1]["last_checked_ms"].is_u64());

    proxy.registry.mark_unhealthy("b1");
    let report: serde_json::Value = common::client()
        .get(proxy.url("/_health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["status"], "degraded");
}

#[tokio::test]
async fn active_checks_evict_and_restore_backends() {
    let (b1, b1_healthy) = common::start_toggle_backend("b1").await;
    let (b2, _) = common::start_toggle_backend("b2").await;
    let mut config = common::proxy_config(&[b1, b2]);
    config.health_check.enabled = true;
    config.health_check.interval_secs = 2;
    config.health_check.timeout_secs = 1;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    b1_healthy.store(false, Ordering::SeqCst);
    let registry = proxy.registry.clone();
    assert!(
        common::eventually(Duration::from_secs(5), || !registry.get("b1").unwrap().is_healthy()).await,
        "b1 was never marked unhealthy"
    );

    for _ in 0..4 {
        let res = client.get(proxy.url("/")).send().await.unwrap();
        assert_eq!(res.text().await.unwrap(), "b2");
    }

    b1_healthy.store(true, Ordering::SeqCst);
    assert!(
        common::eventually(Duration::from_secs(5), || registry.get("b1").unwrap().is_healthy()).await,
        "b1 was never restored"
    );

    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(client.get(proxy.url("/")).send().await.unwrap().text().await.unwrap());
    }
    seen.sort();
    assert_eq!(seen, vec!["b1", "b2"]);
}
