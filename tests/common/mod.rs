//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use wazhop_cache::api::create_router;
use wazhop_cache::clock::system_clock;
use wazhop_cache::error::FetchError;
use wazhop_cache::fetch::{self, Fetcher};
use wazhop_cache::kv::MemoryStore;
use wazhop_cache::{AppState, Config};

pub const ORIGIN: &str = "https://wazhop.test";
pub const SHELL_HTML: &str = "<html>wazhop shell</html>";

// == Stub Origin ==

/// In-process origin: answers from a path table, 404s unknown paths and
/// refuses every request while offline.
#[derive(Debug, Default)]
pub struct StubOrigin {
    routes: Mutex<HashMap<String, fetch::Response>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl StubOrigin {
    pub fn respond(&self, path_and_query: &str, response: fetch::Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(format!("{ORIGIN}{path_and_query}"), response);
    }

    pub fn respond_json(&self, path_and_query: &str, value: Value) {
        self.respond(path_and_query, fetch::Response::json(StatusCode::OK, &value));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls_to(&self, path_and_query: &str) -> usize {
        let url = format!("{ORIGIN}{path_and_query}");
        self.calls.lock().unwrap().iter().filter(|u| **u == url).count()
    }
}

#[async_trait]
impl Fetcher for StubOrigin {
    async fn fetch(&self, request: fetch::Request) -> Result<fetch::Response, FetchError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Network(format!("offline: {url}")));
        }
        let response = self.routes.lock().unwrap().get(&url).cloned();
        Ok(response.unwrap_or_else(|| fetch::Response::empty(StatusCode::NOT_FOUND)))
    }
}

// == Test App ==

pub struct TestApp {
    pub router: Router,
    pub origin: Arc<StubOrigin>,
    pub state: AppState,
}

/// Builds the full application over a stub origin with an installed and
/// active worker. Only `/` is served during install.
pub async fn spawn_app() -> TestApp {
    let config = Config {
        origin_url: ORIGIN.to_string(),
        ..Config::default()
    };
    let origin = Arc::new(StubOrigin::default());
    origin.respond("/", fetch::Response::text(StatusCode::OK, SHELL_HTML));

    let (state, _worker_task) = AppState::from_config(
        &config,
        origin.clone(),
        Box::new(MemoryStore::new()),
        system_clock(),
    )
    .unwrap();
    state.worker.install().await.unwrap();
    state.worker.activate().await.unwrap();

    TestApp {
        router: create_router(state.clone()),
        origin,
        state,
    }
}

// == Request Helpers ==

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.to_vec()).unwrap()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(router: &Router, uri: &str) -> TestResponse {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn delete(router: &Router, uri: &str) -> TestResponse {
    send(router, Request::delete(uri).body(Body::empty()).unwrap()).await
}

pub async fn send_json(router: &Router, method: &str, uri: &str, body: Value) -> TestResponse {
    send(
        router,
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
