//! Request-body extraction and field validation shared by the handlers.

use async_trait::async_trait;
use axum::extract::{FromRequest, Request};
use axum::Json;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use url::Url;

use crate::errors::AppError;

/// Like `Json<T>`, but malformed or mistyped bodies become a JSON
/// `ValidationError` (400) instead of axum's plain-text rejection.
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        Ok(ValidJson(value))
    }
}

/// Decode a route-specific schema out of an already-parsed body.
pub fn parse<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(body).map_err(|e| AppError::Validation(e.to_string()))
}

pub fn require(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("`{}` must not be empty", field)));
    }
    Ok(())
}

/// Absolute http(s) URL with a host.
pub fn http_url(field: &str, raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AppError::Validation(format!("`{}` is not a valid URL: {}", field, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AppError::Validation(format!(
            "`{}` must be an http or https URL",
            field
        )));
    }
    Ok(url)
}

/// ISO 8601 timestamp. Values without an offset are taken as UTC.
pub fn timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| {
            AppError::Validation(format!("`{}` must be an ISO 8601 timestamp", field))
        })
}

/// 1-64 characters from `[A-Za-z0-9_.@-]`.
pub fn username(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    require("username", name)?;
    if name.len() > 64 {
        return Err(AppError::Validation(
            "`username` must be at most 64 characters".into(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-'))
    {
        return Err(AppError::Validation(
            "`username` may only contain letters, digits, '_', '.', '@' and '-'".into(),
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_url_rejects_other_schemes() {
        assert!(http_url("url", "https://example.com/hook").is_ok());
        assert!(http_url("url", "http://127.0.0.1:9000/x").is_ok());
        assert!(http_url("url", "file:///etc/passwd").is_err());
        assert!(http_url("url", "ftp://example.com").is_err());
        assert!(http_url("url", "not a url").is_err());
    }

    #[test]
    fn test_timestamp_accepts_offset_and_naive_forms() {
        let with_offset = timestamp("time", "2030-01-02T03:04:05+02:00").unwrap();
        assert_eq!(with_offset.to_rfc3339(), "2030-01-02T01:04:05+00:00");

        let naive = timestamp("time", "2030-01-02T03:04:05").unwrap();
        assert_eq!(naive.to_rfc3339(), "2030-01-02T03:04:05+00:00");

        let fractional = timestamp("time", "2030-01-02T03:04:05.250").unwrap();
        assert_eq!(fractional.timestamp_subsec_millis(), 250);

        assert!(timestamp("time", "tomorrow").is_err());
    }

    #[test]
    fn test_username_rules() {
        assert_eq!(username("  alice ").unwrap(), "alice");
        assert!(username("").is_err());
        assert!(username("bad name").is_err());
        assert!(username(&"x".repeat(65)).is_err());
        assert!(username("ops@example.com").is_ok());
    }
}
