use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use rand::RngCore;

/// Third-party APIs the gateway relays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Upstream {
    Twitter,
    YouTube,
    OpenAi,
    Voice,
    DeepSeek,
    Gmail,
}

impl Upstream {
    pub const ALL: [Upstream; 6] = [
        Upstream::Twitter,
        Upstream::YouTube,
        Upstream::OpenAi,
        Upstream::Voice,
        Upstream::DeepSeek,
        Upstream::Gmail,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Upstream::Twitter => "twitter",
            Upstream::YouTube => "youtube",
            Upstream::OpenAi => "openai",
            Upstream::Voice => "voice",
            Upstream::DeepSeek => "deepseek",
            Upstream::Gmail => "gmail",
        }
    }

    /// Environment variable holding the server-side API key.
    pub fn key_var(&self) -> &'static str {
        match self {
            Upstream::Twitter => "TWITTER_API_KEY",
            Upstream::YouTube => "YOUTUBE_API_KEY",
            Upstream::OpenAi => "OPENAI_API_KEY",
            Upstream::Voice => "VOICE_API_KEY",
            Upstream::DeepSeek => "DEEPSEEK_API_KEY",
            Upstream::Gmail => "GMAIL_API_KEY",
        }
    }

    /// Environment variable overriding the base URL.
    pub fn base_url_var(&self) -> &'static str {
        match self {
            Upstream::Twitter => "AUTOGATE_TWITTER_BASE_URL",
            Upstream::YouTube => "AUTOGATE_YOUTUBE_BASE_URL",
            Upstream::OpenAi => "AUTOGATE_OPENAI_BASE_URL",
            Upstream::Voice => "AUTOGATE_VOICE_BASE_URL",
            Upstream::DeepSeek => "AUTOGATE_DEEPSEEK_BASE_URL",
            Upstream::Gmail => "AUTOGATE_GMAIL_BASE_URL",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Upstream::Twitter => "https://api.twitter.com",
            Upstream::YouTube => "https://www.googleapis.com",
            Upstream::OpenAi => "https://api.openai.com",
            Upstream::Voice => "https://api.voice-gen.com",
            Upstream::DeepSeek => "https://api.deepseek.com",
            Upstream::Gmail => "https://gmail.googleapis.com",
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    /// Server-held key used when the caller does not supply `api_key`.
    pub api_key: Option<String>,
}

impl fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Authorization-code settings for the single external identity provider.
#[derive(Clone)]
pub struct OAuthConfig {
    /// Path segment clients use, e.g. `google` in `/api/oauth/google`.
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_url: String,
    pub scope: String,
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub upstream_timeout: Duration,
    pub hash_timeout: Duration,
    pub scheduler_tick: Duration,
    pub cors_origins: Vec<String>,
    pub upstreams: BTreeMap<Upstream, UpstreamSettings>,
    pub oauth: Option<OAuthConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "sqlite://autogate.db?mode=rwc".into(),
            jwt_secret: random_secret(),
            token_ttl: Duration::from_secs(15 * 60),
            upstream_timeout: Duration::from_secs(30),
            hash_timeout: Duration::from_secs(10),
            scheduler_tick: Duration::from_millis(1000),
            cors_origins: vec![],
            upstreams: Upstream::ALL
                .iter()
                .map(|u| {
                    (
                        *u,
                        UpstreamSettings {
                            base_url: u.default_base_url().to_string(),
                            api_key: None,
                        },
                    )
                })
                .collect(),
            oauth: None,
        }
    }
}

impl Config {
    pub fn upstream(&self, upstream: Upstream) -> UpstreamSettings {
        self.upstreams
            .get(&upstream)
            .cloned()
            .unwrap_or_else(|| UpstreamSettings {
                base_url: upstream.default_base_url().to_string(),
                api_key: None,
            })
    }

    /// Reject settings that would break the server after startup: a zero
    /// scheduler tick panics the consumer loop, and zero timeouts fail every
    /// relay call or password hash.
    pub fn validate(&self) -> anyhow::Result<()> {
        let durations = [
            ("AUTOGATE_SCHEDULER_TICK_MS", self.scheduler_tick),
            ("AUTOGATE_UPSTREAM_TIMEOUT_SECS", self.upstream_timeout),
            ("AUTOGATE_HASH_TIMEOUT_SECS", self.hash_timeout),
            ("AUTOGATE_TOKEN_TTL_SECS", self.token_ttl),
        ];
        for (var, value) in durations {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than zero", var);
            }
        }
        Ok(())
    }

    /// Names of credentials absent from the environment. Reported once at
    /// startup; values are never included.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing: Vec<&'static str> = Upstream::ALL
            .iter()
            .filter(|u| self.upstream(**u).api_key.is_none())
            .map(|u| u.key_var())
            .collect();
        if self.oauth.is_none() {
            missing.push("OAUTH_CLIENT_ID/OAUTH_CLIENT_SECRET");
        }
        missing
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();

    let jwt_secret = match env_nonempty("AUTOGATE_JWT_SECRET") {
        Some(secret) => secret,
        None => {
            let env_mode = std::env::var("AUTOGATE_ENV")
                .or_else(|_| std::env::var("RUST_ENV"))
                .unwrap_or_default();
            if env_mode == "production" {
                anyhow::bail!(
                    "AUTOGATE_JWT_SECRET is not set. \
                     Set a long random secret before running in production."
                );
            }
            tracing::warn!("AUTOGATE_JWT_SECRET is not set; using a random per-process secret. Tokens will not survive a restart.");
            defaults.jwt_secret.clone()
        }
    };

    let upstreams = Upstream::ALL
        .iter()
        .map(|u| {
            (
                *u,
                UpstreamSettings {
                    base_url: env_nonempty(u.base_url_var())
                        .unwrap_or_else(|| u.default_base_url().to_string()),
                    api_key: env_nonempty(u.key_var()),
                },
            )
        })
        .collect();

    let config = Config {
        port: env_parse("AUTOGATE_PORT").unwrap_or(defaults.port),
        database_url: env_nonempty("DATABASE_URL").unwrap_or(defaults.database_url),
        jwt_secret,
        token_ttl: env_parse("AUTOGATE_TOKEN_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.token_ttl),
        upstream_timeout: env_parse("AUTOGATE_UPSTREAM_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.upstream_timeout),
        hash_timeout: env_parse("AUTOGATE_HASH_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.hash_timeout),
        scheduler_tick: env_parse("AUTOGATE_SCHEDULER_TICK_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.scheduler_tick),
        cors_origins: parse_list(&std::env::var("AUTOGATE_CORS_ORIGINS").unwrap_or_default()),
        upstreams,
        oauth: load_oauth(),
    };
    config.validate()?;
    Ok(config)
}

/// OAuth is enabled only when both client credentials are present.
fn load_oauth() -> Option<OAuthConfig> {
    let client_id = env_nonempty("OAUTH_CLIENT_ID")?;
    let client_secret = env_nonempty("OAUTH_CLIENT_SECRET")?;
    Some(OAuthConfig {
        provider: env_nonempty("OAUTH_PROVIDER").unwrap_or_else(|| "google".into()),
        client_id,
        client_secret,
        authorize_url: env_nonempty("OAUTH_AUTHORIZE_URL")
            .unwrap_or_else(|| "https://accounts.google.com/o/oauth2/v2/auth".into()),
        token_url: env_nonempty("OAUTH_TOKEN_URL")
            .unwrap_or_else(|| "https://oauth2.googleapis.com/token".into()),
        redirect_url: env_nonempty("OAUTH_REDIRECT_URL")
            .unwrap_or_else(|| "http://localhost:8080/api/oauth/google/authorized".into()),
        scope: env_nonempty("OAUTH_SCOPE").unwrap_or_else(|| "openid email profile".into()),
    })
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_nonempty(key).and_then(|v| v.parse().ok())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_upstream() {
        let cfg = Config::default();
        for u in Upstream::ALL {
            assert_eq!(cfg.upstream(u).base_url, u.default_base_url());
        }
        assert_eq!(cfg.token_ttl, Duration::from_secs(900));
    }

    #[test]
    fn test_missing_credentials_lists_names_only() {
        let mut cfg = Config::default();
        cfg.upstreams.insert(
            Upstream::OpenAi,
            UpstreamSettings {
                base_url: "https://api.openai.com".into(),
                api_key: Some("sk-live-secret".into()),
            },
        );

        let missing = cfg.missing_credentials();
        assert!(missing.contains(&"TWITTER_API_KEY"));
        assert!(!missing.contains(&"OPENAI_API_KEY"));
        assert!(missing.iter().all(|m| !m.contains("sk-live")));
        assert!(missing.contains(&"OAUTH_CLIENT_ID/OAUTH_CLIENT_SECRET"));
    }

    #[test]
    fn test_upstream_settings_debug_hides_key() {
        let settings = UpstreamSettings {
            base_url: "https://api.twitter.com".into(),
            api_key: Some("very-secret".into()),
        };
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_zero_durations_are_rejected() {
        assert!(Config::default().validate().is_ok());

        let zero_tick = Config {
            scheduler_tick: Duration::ZERO,
            ..Config::default()
        };
        let err = zero_tick.validate().unwrap_err();
        assert!(err.to_string().contains("AUTOGATE_SCHEDULER_TICK_MS"));

        let zero_upstream = Config {
            upstream_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert!(zero_upstream.validate().is_err());

        let zero_hash = Config {
            hash_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert!(zero_hash.validate().is_err());
    }

    #[test]
    fn test_parse_list_trims_and_skips_empty() {
        assert_eq!(
            parse_list(" http://a.test , ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_random_secrets_differ() {
        let a = random_secret();
        assert_eq!(a.len(), 64);
        assert_ne!(a, random_secret());
    }
}
