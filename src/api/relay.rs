//! Relay endpoints, collapsed into one configuration table.
//!
//! Every entry names a path under `/api`, the upstream it targets, and a
//! builder that validates the route's request schema and shapes the outbound
//! payload. A single generic handler does the rest: auth, relay, passthrough.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;
use zeroize::Zeroize;

use crate::api::extract::{http_url, parse, require};
use crate::config::{Config, Upstream};
use crate::errors::AppError;
use crate::middleware::auth::AuthUser;
use crate::proxy::{RelayBody, RelayRequest};
use crate::AppState;

pub struct RelayRoute {
    /// Path relative to `/api`.
    pub path: &'static str,
    /// `None` for routes whose target comes from the request itself.
    pub upstream: Option<Upstream>,
    pub description: &'static str,
    pub build: fn(Value) -> Result<Outbound, AppError>,
}

impl RelayRoute {
    pub fn full_path(&self) -> String {
        format!("/api{}", self.path)
    }
}

pub static RELAY_ROUTES: &[RelayRoute] = &[
    RelayRoute {
        path: "/twitter/post",
        upstream: Some(Upstream::Twitter),
        description: "Post text to X (Twitter)",
        build: twitter_post,
    },
    RelayRoute {
        path: "/youtube/upload",
        upstream: Some(Upstream::YouTube),
        description: "Create a YouTube video resource from a video URL",
        build: youtube_upload,
    },
    RelayRoute {
        path: "/ai/generate_text",
        upstream: Some(Upstream::OpenAi),
        description: "Generate text with an OpenAI chat model",
        build: generate_text,
    },
    RelayRoute {
        path: "/ai/generate_image",
        upstream: Some(Upstream::OpenAi),
        description: "Generate an image with OpenAI",
        build: generate_image,
    },
    RelayRoute {
        path: "/voice/generate",
        upstream: Some(Upstream::Voice),
        description: "Synthesize speech from text",
        build: generate_voice,
    },
    RelayRoute {
        path: "/deepseek/optimize",
        upstream: Some(Upstream::DeepSeek),
        description: "Ask DeepSeek to optimize a workflow definition",
        build: deepseek_optimize,
    },
    RelayRoute {
        path: "/gmail/send",
        upstream: Some(Upstream::Gmail),
        description: "Send an email through Gmail",
        build: gmail_send,
    },
    RelayRoute {
        path: "/webhooks/trigger",
        upstream: None,
        description: "POST a payload to an arbitrary webhook URL",
        build: webhook_trigger,
    },
];

/// A validated, shaped outbound call that still needs its base URL and key.
pub struct Outbound {
    target: Target,
    api_key: Option<String>,
    body: RelayBody,
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbound")
            .field("target", &self.target)
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("body", &self.body)
            .finish()
    }
}

#[derive(Debug)]
enum Target {
    Upstream { upstream: Upstream, path: String },
    External(Url),
}

impl Outbound {
    fn upstream(upstream: Upstream, path: &str, api_key: Option<String>, body: Value) -> Self {
        Self {
            target: Target::Upstream {
                upstream,
                path: path.to_string(),
            },
            api_key,
            body: RelayBody::Json(body),
        }
    }

    fn external(url: Url, body: RelayBody) -> Self {
        Self {
            target: Target::External(url),
            api_key: None,
            body,
        }
    }

    /// Resolve the base URL and API key: the caller's `api_key` wins, else the
    /// server-held key for that upstream, else a validation error.
    pub fn into_request(self, config: &Config) -> Result<RelayRequest, AppError> {
        let Outbound {
            target,
            api_key,
            body,
        } = self;

        match target {
            Target::External(url) => Ok(RelayRequest {
                method: Method::POST,
                url,
                headers: Default::default(),
                body,
            }),
            Target::Upstream { upstream, path } => {
                let settings = config.upstream(upstream);
                let url = Url::parse(&format!(
                    "{}{}",
                    settings.base_url.trim_end_matches('/'),
                    path
                ))
                .map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("invalid base URL for {}: {}", upstream, e))
                })?;

                let mut key = api_key
                    .filter(|k| !k.trim().is_empty())
                    .or(settings.api_key)
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "`api_key` is required for {} (none supplied and {} is not configured)",
                            upstream,
                            upstream.key_var()
                        ))
                    })?;

                let request = RelayRequest {
                    method: Method::POST,
                    url,
                    headers: Default::default(),
                    body,
                }
                .bearer(key.trim());
                key.zeroize();

                request.map_err(|_| {
                    AppError::Validation("`api_key` contains characters not allowed in a header".into())
                })
            }
        }
    }
}

/// Generic handler behind every table entry.
pub async fn relay(
    state: Arc<AppState>,
    user: AuthUser,
    route: &'static RelayRoute,
    body: Value,
) -> Result<Response, AppError> {
    let request = (route.build)(body)?.into_request(&state.config)?;
    let path = route.full_path();

    tracing::info!(route = %path, user = %user.username, "relaying request");
    let start = Instant::now();
    let result = state.relay.relay(request).await;

    let status = match &result {
        Ok(resp) => resp.status.as_u16().to_string(),
        Err(e) => e.label().to_string(),
    };
    state.metrics.record_relay(&path, &status, start.elapsed());

    Ok(result?.into_response())
}

// ── Route schemas and payload builders ───────────────────────

#[derive(Deserialize)]
struct TweetRequest {
    text: String,
    api_key: Option<String>,
}

fn twitter_post(body: Value) -> Result<Outbound, AppError> {
    let req: TweetRequest = parse(body)?;
    require("text", &req.text)?;
    Ok(Outbound::upstream(
        Upstream::Twitter,
        "/2/tweets",
        req.api_key,
        json!({ "text": req.text }),
    ))
}

#[derive(Deserialize)]
struct VideoUploadRequest {
    video_url: String,
    title: String,
    #[serde(default)]
    description: String,
    api_key: Option<String>,
}

/// The video is referenced by URL; no bytes pass through the gateway.
fn youtube_upload(body: Value) -> Result<Outbound, AppError> {
    let req: VideoUploadRequest = parse(body)?;
    let video_url = http_url("video_url", &req.video_url)?;
    require("title", &req.title)?;
    Ok(Outbound::upstream(
        Upstream::YouTube,
        "/youtube/v3/videos?part=snippet,status",
        req.api_key,
        json!({
            "snippet": {
                "title": req.title,
                "description": req.description,
            },
            "status": { "privacyStatus": "private" },
            "sourceUrl": video_url.as_str(),
        }),
    ))
}

#[derive(Deserialize)]
struct GenerateTextRequest {
    prompt: String,
    api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    model: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo".into()
}

fn default_max_tokens() -> u32 {
    100
}

fn generate_text(body: Value) -> Result<Outbound, AppError> {
    let req: GenerateTextRequest = parse(body)?;
    require("prompt", &req.prompt)?;
    if req.max_tokens == 0 {
        return Err(AppError::Validation("`max_tokens` must be positive".into()));
    }
    Ok(Outbound::upstream(
        Upstream::OpenAi,
        "/v1/chat/completions",
        req.api_key,
        json!({
            "model": req.model,
            "messages": [
                { "role": "system", "content": "You are a helpful assistant." },
                { "role": "user", "content": req.prompt },
            ],
            "max_tokens": req.max_tokens,
        }),
    ))
}

#[derive(Deserialize)]
struct GenerateImageRequest {
    prompt: String,
    api_key: Option<String>,
    #[serde(default = "default_image_size")]
    size: String,
    #[serde(default = "default_image_count")]
    n: u8,
}

fn default_image_size() -> String {
    "1024x1024".into()
}

fn default_image_count() -> u8 {
    1
}

fn generate_image(body: Value) -> Result<Outbound, AppError> {
    let req: GenerateImageRequest = parse(body)?;
    require("prompt", &req.prompt)?;
    if !(1..=4).contains(&req.n) {
        return Err(AppError::Validation("`n` must be between 1 and 4".into()));
    }
    Ok(Outbound::upstream(
        Upstream::OpenAi,
        "/v1/images/generations",
        req.api_key,
        json!({ "prompt": req.prompt, "n": req.n, "size": req.size }),
    ))
}

#[derive(Deserialize)]
struct GenerateVoiceRequest {
    text: String,
    voice: Option<String>,
    api_key: Option<String>,
}

fn generate_voice(body: Value) -> Result<Outbound, AppError> {
    let req: GenerateVoiceRequest = parse(body)?;
    require("text", &req.text)?;
    let mut payload = json!({ "text": req.text });
    if let Some(voice) = req.voice {
        payload["voice"] = Value::String(voice);
    }
    Ok(Outbound::upstream(
        Upstream::Voice,
        "/v1/generate",
        req.api_key,
        payload,
    ))
}

#[derive(Deserialize)]
struct OptimizeRequest {
    #[serde(default)]
    workflow: Value,
    api_key: Option<String>,
}

fn deepseek_optimize(body: Value) -> Result<Outbound, AppError> {
    let req: OptimizeRequest = parse(body)?;
    if req.workflow.is_null() {
        return Err(AppError::Validation("`workflow` is required".into()));
    }
    Ok(Outbound::upstream(
        Upstream::DeepSeek,
        "/optimize",
        req.api_key,
        json!({ "workflow": req.workflow }),
    ))
}

#[derive(Deserialize)]
struct SendEmailRequest {
    email_address: String,
    subject: String,
    body: String,
    api_key: Option<String>,
}

fn gmail_send(body: Value) -> Result<Outbound, AppError> {
    let req: SendEmailRequest = parse(body)?;
    require("email_address", &req.email_address)?;
    if !req.email_address.contains('@') {
        return Err(AppError::Validation(
            "`email_address` is not an email address".into(),
        ));
    }
    // Header fields must stay on one line.
    if [&req.email_address, &req.subject]
        .iter()
        .any(|v| v.contains('\r') || v.contains('\n'))
    {
        return Err(AppError::Validation(
            "`email_address` and `subject` must not contain line breaks".into(),
        ));
    }

    let message = format!(
        "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
        req.email_address.trim(),
        req.subject,
        req.body
    );
    Ok(Outbound::upstream(
        Upstream::Gmail,
        "/gmail/v1/users/me/messages/send",
        req.api_key,
        json!({ "raw": URL_SAFE_NO_PAD.encode(message) }),
    ))
}

#[derive(Deserialize)]
struct TriggerWebhookRequest {
    webhook_url: String,
    payload: Option<Value>,
}

fn webhook_trigger(body: Value) -> Result<Outbound, AppError> {
    let req: TriggerWebhookRequest = parse(body)?;
    let url = http_url("webhook_url", &req.webhook_url)?;
    let body = match req.payload {
        Some(payload) => RelayBody::Json(payload),
        None => RelayBody::Empty,
    };
    Ok(Outbound::external(url, body))
}
