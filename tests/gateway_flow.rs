//! End-to-end flows through the full router: accounts, tokens, scheduling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use automation_gateway::clock::{Clock, ManualClock};
use common::{test_config, TestGateway, PASSWORD};

mod account_tests {
    use super::*;

    #[tokio::test]
    async fn test_register_twice_is_rejected() {
        let gw = TestGateway::new(test_config()).await;
        let creds = json!({ "username": "alice", "password": PASSWORD });

        let (status, body) = gw.post("/api/register", None, creds.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "User registered successfully");

        let (status, body) = gw.post("/api/register", None, creds).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "conflict");
        assert_eq!(gw.state.users.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_login_failures_look_identical() {
        let gw = TestGateway::new(test_config()).await;
        gw.login_as("alice").await;

        let (s1, b1) = gw
            .post("/api/login", None, json!({ "username": "alice", "password": "wrong" }))
            .await;
        let (s2, b2) = gw
            .post("/api/login", None, json!({ "username": "nobody", "password": "wrong" }))
            .await;

        assert_eq!(s1, StatusCode::UNAUTHORIZED);
        assert_eq!(s1, s2);
        assert_eq!(b1, b2);
    }

    #[tokio::test]
    async fn test_login_returns_bearer_token() {
        let gw = TestGateway::new(test_config()).await;
        gw.login_as("alice").await;

        let (status, body) = gw
            .post("/api/login", None, json!({ "username": "alice", "password": PASSWORD }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["expires_in"], 900);

        let token = body["access_token"].as_str().unwrap();
        assert_eq!(gw.state.tokens.verify(token).unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_validation_error() {
        let gw = TestGateway::new(test_config()).await;

        let (status, body) = gw.post("/api/register", None, json!({ "username": "alice" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request_error");

        let (status, _) = gw
            .post("/api/register", None, json!({ "username": "has space", "password": "x" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

mod schedule_tests {
    use super::*;

    #[tokio::test]
    async fn test_register_login_schedule_fires_once() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let gw = TestGateway::new(test_config()).await;
        let token = gw.login_as("alice").await;
        let consumer = gw.state.spawn_scheduler();

        let (status, body) = gw
            .post(
                "/api/schedule/task",
                Some(&token),
                json!({ "time": "2020-01-01T00:00:00Z", "url": format!("{}/x", mock_server.uri()) }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Task scheduled");
        assert!(body["task_id"].is_string());

        for _ in 0..100 {
            if !mock_server.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // A few more ticks; the task must not fire again.
        tokio::time::sleep(Duration::from_millis(100)).await;
        consumer.abort();

        assert_eq!(gw.state.scheduler.pending(), 0);
        mock_server.verify().await;
    }

    #[tokio::test]
    async fn test_future_task_waits_for_the_clock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gw = TestGateway::with_clock(test_config(), clock.clone()).await;
        let token = gw.login_as("alice").await;

        let fire_at = clock.now() + chrono::Duration::minutes(5);
        let (status, _) = gw
            .post(
                "/api/schedule/task",
                Some(&token),
                json!({ "time": fire_at.to_rfc3339(), "url": "http://127.0.0.1:9/later" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        assert!(gw.state.scheduler.tick().is_empty());
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(gw.state.scheduler.tick().len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_requires_token_and_valid_fields() {
        let gw = TestGateway::new(test_config()).await;

        let (status, _) = gw
            .post(
                "/api/schedule/task",
                None,
                json!({ "time": "2020-01-01T00:00:00Z", "url": "http://example.com" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = gw.login_as("alice").await;
        let (status, _) = gw
            .post(
                "/api/schedule/task",
                Some(&token),
                json!({ "time": "next tuesday", "url": "http://example.com" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = gw
            .post(
                "/api/schedule/task",
                Some(&token),
                json!({ "time": "2020-01-01T00:00:00Z", "url": "file:///etc/passwd" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(gw.state.scheduler.pending(), 0);
    }
}

mod surface_tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_and_health() {
        let gw = TestGateway::new(test_config()).await;

        let (status, body) = gw.get("/api/routes").await;
        assert_eq!(status, StatusCode::OK);
        let routes = body.as_array().unwrap();
        assert!(routes
            .iter()
            .any(|r| r["path"] == "/api/twitter/post" && r["auth"] == true));

        let (status, _) = gw.get("/healthz").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = gw.get("/api/workflow").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_responses_carry_request_id_and_security_headers() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let gw = TestGateway::new(test_config()).await;
        let resp = gw
            .app
            .clone()
            .oneshot(
                Request::get("/healthz")
                    .header("x-request-id", "req-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.headers()["x-request-id"], "req-123");
        assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
        assert_eq!(resp.headers()["cache-control"], "no-store");
    }
}
