//! Authorization-code redirect flow for the single configured identity provider.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::config::OAuthConfig;
use crate::errors::AppError;
use crate::proxy::{RelayBody, RelayRequest};
use crate::AppState;

/// `state` values handed out on redirect and not yet returned. Each is
/// single-use and expires after `ttl`.
pub struct OAuthStates {
    pending: DashMap<String, DateTime<Utc>>,
    ttl: Duration,
}

impl OAuthStates {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    pub fn issue(&self, now: DateTime<Utc>) -> String {
        // Opportunistic sweep so abandoned flows do not accumulate.
        self.pending.retain(|_, expires_at| *expires_at > now);

        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);
        self.pending.insert(state.clone(), now + self.ttl);
        state
    }

    /// True when `state` was issued by us, is unexpired, and has not been used.
    pub fn consume(&self, state: &str, now: DateTime<Utc>) -> bool {
        match self.pending.remove(state) {
            Some((_, expires_at)) => expires_at > now,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn provider_config<'a>(state: &'a AppState, provider: &str) -> Result<&'a OAuthConfig, AppError> {
    state
        .config
        .oauth
        .as_ref()
        .filter(|cfg| cfg.provider.eq_ignore_ascii_case(provider))
        .ok_or_else(|| AppError::NotFound(format!("unknown OAuth provider `{}`", provider)))
}

/// GET /api/oauth/:provider
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Response, AppError> {
    let cfg = provider_config(&state, &provider)?;
    let csrf = state.oauth_states.issue(state.clock.now());

    let location = Url::parse_with_params(
        &cfg.authorize_url,
        &[
            ("response_type", "code"),
            ("client_id", cfg.client_id.as_str()),
            ("redirect_uri", cfg.redirect_url.as_str()),
            ("scope", cfg.scope.as_str()),
            ("state", csrf.as_str()),
        ],
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid OAuth authorize URL: {}", e)))?;

    tracing::info!(provider = %cfg.provider, "redirecting to identity provider");
    Ok((StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /api/oauth/:provider/authorized
pub async fn authorized(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<Value>, AppError> {
    let cfg = provider_config(&state, &provider)?;

    if let Some(error) = params.error {
        return Err(AppError::OAuth(format!("provider denied access: {}", error)));
    }
    let csrf = params.state.unwrap_or_default();
    if !state.oauth_states.consume(&csrf, state.clock.now()) {
        return Err(AppError::OAuth("invalid or expired state".into()));
    }
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::OAuth("missing authorization code".into()))?;

    let token_url = Url::parse(&cfg.token_url)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid OAuth token URL: {}", e)))?;

    let mut request = RelayRequest {
        method: Method::POST,
        url: token_url,
        headers: Default::default(),
        body: RelayBody::Form(vec![
            ("grant_type".into(), "authorization_code".into()),
            ("code".into(), code),
            ("redirect_uri".into(), cfg.redirect_url.clone()),
            ("client_id".into(), cfg.client_id.clone()),
            ("client_secret".into(), cfg.client_secret.clone()),
        ]),
    };
    request.headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );

    let resp = state.relay.relay(request).await.map_err(|e| {
        tracing::warn!(provider = %cfg.provider, "token endpoint call failed: {}", e);
        AppError::OAuth(format!("token exchange failed: {}", e))
    })?;
    if !resp.is_success() {
        tracing::warn!(provider = %cfg.provider, status = resp.status.as_u16(), "token exchange rejected");
        return Err(AppError::OAuth(format!(
            "token exchange failed with status {}",
            resp.status.as_u16()
        )));
    }
    let body = resp
        .json()
        .map_err(|_| AppError::OAuth("token endpoint returned invalid JSON".into()))?;

    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::OAuth("token response has no access_token".into()))?;

    tracing::info!(provider = %cfg.provider, "OAuth authorization completed");
    Ok(Json(json!({
        "provider": cfg.provider,
        "access_token": access_token,
        "token_type": body.get("token_type").cloned().unwrap_or(Value::Null),
        "expires_in": body.get("expires_in").cloned().unwrap_or(Value::Null),
        "scope": body.get("scope").cloned().unwrap_or(Value::Null),
    })))
}
