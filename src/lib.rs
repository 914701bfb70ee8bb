//! Automation gateway: a thin authenticated relay in front of third-party
//! APIs, with a credential store, bearer tokens, an OAuth redirect flow and a
//! deferred task scheduler.

use std::sync::Arc;

use anyhow::Context;

pub mod api;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod proxy;
pub mod store;

use api::oauth::OAuthStates;
use auth::TokenIssuer;
use clock::{Clock, SystemClock};
use config::Config;
use jobs::scheduler::Scheduler;
use middleware::metrics::GatewayMetrics;
use proxy::RelayClient;
use store::UserStore;

/// Shared application state passed to handlers and the scheduler.
pub struct AppState {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub users: UserStore,
    pub tokens: TokenIssuer,
    pub relay: RelayClient,
    pub scheduler: Arc<Scheduler>,
    pub oauth_states: OAuthStates,
    pub metrics: Arc<GatewayMetrics>,
}

impl AppState {
    pub async fn build(config: Config) -> anyhow::Result<Arc<Self>> {
        Self::build_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Connect the store, run migrations and wire every component to `clock`.
    pub async fn build_with_clock(
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        let users = UserStore::connect(&config.database_url, config.hash_timeout)
            .await
            .context("failed to connect to the user database")?;
        users.migrate().await.context("failed to run migrations")?;

        let ttl = chrono::Duration::from_std(config.token_ttl)
            .context("AUTOGATE_TOKEN_TTL_SECS is out of range")?;
        let tokens = TokenIssuer::new(config.jwt_secret.as_bytes(), ttl, clock.clone());
        let relay = RelayClient::new(config.upstream_timeout)?;
        let metrics = Arc::new(GatewayMetrics::new()?);

        Ok(Arc::new(Self {
            scheduler: Arc::new(Scheduler::new(clock.clone())),
            oauth_states: OAuthStates::new(chrono::Duration::minutes(10)),
            config,
            clock,
            users,
            tokens,
            relay,
            metrics,
        }))
    }

    /// Start the scheduler's consumer loop. Call once per process.
    pub fn spawn_scheduler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        jobs::scheduler::spawn(
            self.scheduler.clone(),
            self.relay.clone(),
            self.metrics.clone(),
            self.config.scheduler_tick,
        )
    }
}
