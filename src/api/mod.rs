use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderName, Method},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::middleware::auth::AuthUser;
use crate::middleware::headers;
use crate::AppState;

pub mod extract;
pub mod handlers;
pub mod oauth;
pub mod relay;

use extract::ValidJson;
use relay::RELAY_ROUTES;

/// The full application: `/api` routes, health, metrics and the shared layers.
pub fn app(state: Arc<AppState>) -> Router {
    let cors_origins = state.config.cors_origins.clone();

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .nest("/api", api_router())
        .with_state(state)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin = origin.to_str().unwrap_or("");
                    cors_origins.iter().any(|o| o == origin)
                        || origin.starts_with("http://localhost:")
                        || origin.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-request-id"),
                ]),
        )
        .layer(axum::middleware::from_fn(headers::request_id))
        .layer(axum::middleware::from_fn(headers::security_headers))
}

/// Routes relative to `/api`.
pub fn api_router() -> Router<Arc<AppState>> {
    let mut router = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/oauth/:provider", get(oauth::authorize))
        .route("/oauth/:provider/authorized", get(oauth::authorized))
        .route("/schedule/task", post(handlers::schedule_task))
        .route("/routes", get(handlers::list_routes));

    for route in RELAY_ROUTES {
        router = router.route(
            route.path,
            post(
                move |State(state): State<Arc<AppState>>,
                      user: AuthUser,
                      ValidJson(body): ValidJson<Value>| async move {
                    relay::relay(state, user, route, body).await
                },
            ),
        );
    }

    router.fallback(fallback_404)
}

async fn fallback_404() -> AppError {
    AppError::NotFound("no such route".into())
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub method: &'static str,
    pub path: String,
    pub auth: bool,
    pub description: &'static str,
}

/// Every route the gateway serves, for `/api/routes` and `autogate routes`.
pub fn route_table() -> Vec<RouteInfo> {
    let fixed = [
        ("POST", "/api/register", false, "Create a user"),
        ("POST", "/api/login", false, "Exchange credentials for a bearer token"),
        ("GET", "/api/oauth/:provider", false, "Redirect to the identity provider"),
        (
            "GET",
            "/api/oauth/:provider/authorized",
            false,
            "Complete the authorization-code exchange",
        ),
        ("POST", "/api/schedule/task", true, "Schedule a one-shot GET at a given time"),
        ("GET", "/api/routes", false, "List routes"),
    ];

    let mut routes: Vec<RouteInfo> = fixed
        .into_iter()
        .map(|(method, path, auth, description)| RouteInfo {
            method,
            path: path.to_string(),
            auth,
            description,
        })
        .collect();

    routes.extend(RELAY_ROUTES.iter().map(|r| RouteInfo {
        method: "POST",
        path: r.full_path(),
        auth: true,
        description: r.description,
    }));

    routes.push(RouteInfo {
        method: "GET",
        path: "/healthz".into(),
        auth: false,
        description: "Liveness probe",
    });
    routes.push(RouteInfo {
        method: "GET",
        path: "/metrics".into(),
        auth: false,
        description: "Prometheus metrics",
    });
    routes
}
