use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use pkgindex::config::parse_config;
use pkgindex::fetcher::{github_detector, http_client, json_body, RateLimitedFetcher};
use serde_json::Value;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn fetcher(base: &str, max_retries: u32) -> RateLimitedFetcher<Value> {
    let config = parse_config(&format!(
        r#"
[sources.pypistats]
base_url = "{base}"
delay_ms = 0
max_retries = {max_retries}
backoff_ms = 5
timeout_secs = 5
"#
    ))
    .unwrap();
    let rate = config.sources.pypistats;
    RateLimitedFetcher::new("test", http_client(rate.timeout()).unwrap(), &rate)
}

async fn fetch(fetcher: &RateLimitedFetcher<Value>, base: &str, id: &str) -> Option<Value> {
    let url = format!("{}/item/{}", base, id);
    fetcher
        .fetch(id, |http| http.get(&url), |body| json_body::<Value>(body))
        .await
}

/// Responds with `script[n]` on the n-th hit (the last entry repeats).
fn scripted(script: Vec<(StatusCode, Vec<(&'static str, String)>, &'static str)>) -> (Router, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let script = Arc::new(script);
    let counter = hits.clone();
    let app = Router::new()
        .route(
            "/item/{id}",
            get(move |State(hits): State<Arc<AtomicUsize>>| {
                let script = script.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    let (status, headers, body) = &script[n.min(script.len() - 1)];
                    let mut map = HeaderMap::new();
                    for (name, value) in headers {
                        map.insert(*name, value.parse().unwrap());
                    }
                    (*status, map, *body)
                }
            }),
        )
        .with_state(counter);
    (app, hits)
}

#[tokio::test]
async fn not_found_is_remembered() {
    let (app, hits) = scripted(vec![(StatusCode::NOT_FOUND, vec![], "")]);
    let base = serve(app).await;
    let f = fetcher(&base, 3);

    assert_eq!(fetch(&f, &base, "missing").await, None);
    assert_eq!(fetch(&f, &base, "missing").await, None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(f.cache().get("missing"), Some(None));
}

#[tokio::test]
async fn success_is_served_from_cache() {
    let (app, hits) = scripted(vec![(StatusCode::OK, vec![], r#"{"stars": 3}"#)]);
    let base = serve(app).await;
    let f = fetcher(&base, 3);

    let first = fetch(&f, &base, "a").await.unwrap();
    let second = fetch(&f, &base, "a").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first["stars"], 3);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(f.calls(), 1);
}

#[tokio::test]
async fn rate_limit_waits_then_succeeds() {
    let (app, hits) = scripted(vec![
        (StatusCode::TOO_MANY_REQUESTS, vec![("retry-after", "0".into())], ""),
        (StatusCode::OK, vec![], r#"{"ok": true}"#),
    ]);
    let base = serve(app).await;
    let f = fetcher(&base, 3);

    let value = fetch(&f, &base, "a").await.unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_retries_are_not_remembered() {
    let (app, hits) = scripted(vec![(StatusCode::SERVICE_UNAVAILABLE, vec![], "")]);
    let base = serve(app).await;
    let f = fetcher(&base, 2);

    assert_eq!(fetch(&f, &base, "a").await, None);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert!(f.cache().get("a").is_none());

    assert_eq!(fetch(&f, &base, "a").await, None);
    assert_eq!(hits.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let (app, hits) = scripted(vec![(StatusCode::BAD_REQUEST, vec![], "")]);
    let base = serve(app).await;
    let f = fetcher(&base, 3);

    assert_eq!(fetch(&f, &base, "a").await, None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(f.cache().is_empty());
}

#[tokio::test]
async fn unparseable_body_is_remembered_as_absent() {
    let (app, hits) = scripted(vec![(StatusCode::OK, vec![], "<html>")]);
    let base = serve(app).await;
    let f = fetcher(&base, 3);

    assert_eq!(fetch(&f, &base, "a").await, None);
    assert_eq!(fetch(&f, &base, "a").await, None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn github_quota_exhaustion_waits_for_reset() {
    let reset = chrono::Utc::now().timestamp().to_string();
    let (app, hits) = scripted(vec![
        (
            StatusCode::FORBIDDEN,
            vec![("x-ratelimit-remaining", "0".into()), ("x-ratelimit-reset", reset)],
            "",
        ),
        (StatusCode::OK, vec![], r#"{"stargazers_count": 1}"#),
    ]);
    let base = serve(app).await;
    let f = fetcher(&base, 3).with_detector(github_detector);

    let value = fetch(&f, &base, "plone/plone.api").await;
    assert!(value.is_some());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn plain_forbidden_is_not_a_rate_limit() {
    let (app, hits) = scripted(vec![(StatusCode::FORBIDDEN, vec![], "")]);
    let base = serve(app).await;
    let f = fetcher(&base, 3).with_detector(github_detector);

    assert_eq!(fetch(&f, &base, "a").await, None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shared_gate_spaces_calls() {
    let (app, _hits) = scripted(vec![(StatusCode::OK, vec![], "{}")]);
    let base = serve(app).await;
    let config = parse_config(
        r#"
[sources.pypistats]
delay_ms = 50
"#,
    )
    .unwrap();
    let rate = config.sources.pypistats;
    let f = RateLimitedFetcher::<Value>::new("test", http_client(Duration::from_secs(5)).unwrap(), &rate);

    let started = std::time::Instant::now();
    for id in ["a", "b", "c"] {
        fetch(&f, &base, id).await;
    }
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn rate_limit_without_retry_after_uses_backoff() {
    let (app, hits) = scripted(vec![
        (StatusCode::TOO_MANY_REQUESTS, vec![], ""),
        (StatusCode::OK, vec![], r#"{"ok": true}"#),
    ]);
    let base = serve(app).await;
    let f = fetcher(&base, 3);

    let value = fetch(&f, &base, "a").await.unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn fractional_retry_after_is_honored() {
    let (app, hits) = scripted(vec![
        (StatusCode::TOO_MANY_REQUESTS, vec![("retry-after", "0.3".into())], ""),
        (StatusCode::OK, vec![], r#"{"ok": true}"#),
    ]);
    let base = serve(app).await;
    let f = fetcher(&base, 3);

    let started = std::time::Instant::now();
    assert!(fetch(&f, &base, "a").await.is_some());
    // computed backoff would be 5ms
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn timeouts_are_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/item/{id}",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                }
                r#"{"ok": true}"#
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;
    let config = parse_config(&format!(
        r#"
[sources.pypistats]
base_url = "{base}"
delay_ms = 0
max_retries = 2
backoff_ms = 5
timeout_secs = 1
"#
    ))
    .unwrap();
    let rate = config.sources.pypistats;
    let f = RateLimitedFetcher::<Value>::new("test", http_client(rate.timeout()).unwrap(), &rate);

    let value = fetch(&f, &base, "slow").await.unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
