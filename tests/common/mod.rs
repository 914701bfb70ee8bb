//! Shared harness: an in-memory gateway driven through `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use automation_gateway::clock::{Clock, SystemClock};
use automation_gateway::config::{Config, Upstream, UpstreamSettings};
use automation_gateway::{api, AppState};

pub const PASSWORD: &str = "correct horse battery staple";

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".into(),
        jwt_secret: "integration-test-secret".into(),
        upstream_timeout: Duration::from_secs(5),
        hash_timeout: Duration::from_secs(30),
        scheduler_tick: Duration::from_millis(20),
        ..Config::default()
    }
}

/// Point every upstream at `base_url`, optionally with a server-held key.
pub fn with_upstreams(mut config: Config, base_url: &str, key: Option<&str>) -> Config {
    for u in Upstream::ALL {
        config.upstreams.insert(
            u,
            UpstreamSettings {
                base_url: base_url.to_string(),
                api_key: key.map(String::from),
            },
        );
    }
    config
}

pub struct TestGateway {
    pub state: Arc<AppState>,
    pub app: Router,
}

impl TestGateway {
    pub async fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let state = AppState::build_with_clock(config, clock).await.unwrap();
        let app = api::app(state.clone());
        Self { state, app }
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    /// Register `username` and return a fresh bearer token for it.
    pub async fn login_as(&self, username: &str) -> String {
        let creds = json!({ "username": username, "password": PASSWORD });
        let (status, _) = self.post("/api/register", None, creds.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = self.post("/api/login", None, creds).await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }
}
