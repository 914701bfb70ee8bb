use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use automation_gateway::cli::{self, Commands, UserCommands};
use automation_gateway::config::{self, Config};
use automation_gateway::store::UserStore;
use automation_gateway::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => run_server(cfg, port).await,
        Some(Commands::Routes) => {
            print_routes();
            Ok(())
        }
        Some(Commands::User { command }) => handle_user_command(&cfg, command).await,
        None => run_server(cfg, None).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// fmt output (JSON when `AUTOGATE_LOG_FORMAT=json`), plus an OTLP exporter
/// when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "autogate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("failed to install OpenTelemetry tracer, continuing without it: {}", e);
                None
            }
        }
    } else {
        None
    };

    let json = std::env::var("AUTOGATE_LOG_FORMAT").is_ok_and(|v| v == "json");

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "automation_gateway=debug,autogate=debug,tower_http=debug".into()),
        ))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .with(telemetry_layer)
        .init();
}

async fn run_server(cfg: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(cfg.port);

    let missing = cfg.missing_credentials();
    if !missing.is_empty() {
        tracing::warn!(
            "Not configured (callers must supply api_key, OAuth disabled): {}",
            missing.join(", ")
        );
    }

    tracing::info!("Connecting to database and running migrations...");
    let state = AppState::build(cfg).await?;

    state.spawn_scheduler();
    tracing::info!(
        tick_ms = state.config.scheduler_tick.as_millis() as u64,
        "Scheduler consumer loop started"
    );

    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("autogate listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn print_routes() {
    println!("{:<6} {:<36} {:<5} DESCRIPTION", "METHOD", "PATH", "AUTH");
    for r in api::route_table() {
        println!(
            "{:<6} {:<36} {:<5} {}",
            r.method,
            r.path,
            if r.auth { "yes" } else { "no" },
            r.description
        );
    }
}

async fn handle_user_command(cfg: &Config, cmd: UserCommands) -> anyhow::Result<()> {
    match cmd {
        UserCommands::Add { username, password } => {
            let username = api::extract::username(&username)?;
            if password.is_empty() {
                anyhow::bail!("password must not be empty");
            }

            let store = UserStore::connect(&cfg.database_url, cfg.hash_timeout).await?;
            store.migrate().await?;
            if store.exists(&username).await? {
                anyhow::bail!("user '{}' already exists", username);
            }
            store.register(&username, password).await?;

            println!(
                "User '{}' registered ({} users total).",
                username,
                store.count().await?
            );
        }
    }
    Ok(())
}
