//! Warden API server binary.
//!
//! Prints `{"port": N}` to stdout once bound so a supervising process can
//! discover an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info, warn};
use warden_api::AppState;
use warden_api::config::ApiConfig;
use warden_core::store::{AuthStore, MemoryStore, PgStore};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "warden_server", about = "Warden identity API server")]
struct Args {
    /// Port to listen on (0 = ephemeral). Overrides the port of `BIND_ADDR`.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/warden"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Purge expired one-time codes, recovery codes and refresh tokens every N seconds
    /// (0 = never; expiry is still enforced on read).
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 0)]
    sweep_interval_secs: u64,

    /// Keep all state in process memory instead of PostgreSQL.
    #[arg(long, default_value_t = false)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the JSON port message.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,warden_api=debug,warden_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    if let Some(port) = args.port {
        let host = config
            .bind_addr
            .rsplit_once(':')
            .map_or("127.0.0.1", |(host, _)| host)
            .to_string();
        config.bind_addr = format!("{host}:{port}");
    }

    info!(
        bind_addr = %config.bind_addr,
        memory_store = args.memory_store,
        "starting warden_server"
    );

    if args.memory_store {
        warn!("using the in-memory store; all state is lost on exit");
        return serve(config, Arc::new(MemoryStore::new()), args.sweep_interval_secs).await;
    }

    info!(max_connections = args.max_connections, "configuring connection pool");
    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&args.database_url)
        .await?;

    info!("running database migrations");
    warden_api::migrate(&pool).await?;

    serve(config, Arc::new(PgStore::new(pool)), args.sweep_interval_secs).await
}

async fn serve<S>(
    config: ApiConfig,
    store: Arc<S>,
    sweep_interval_secs: u64,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: AuthStore + 'static,
{
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, store)?;
    let _cleanup = state.spawn_cleanup_tasks();
    if sweep_interval_secs > 0 {
        spawn_sweeper(state.clone(), Duration::from_secs(sweep_interval_secs));
    }

    let app = warden_api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let local_addr = listener.local_addr()?;

    println!("{}", serde_json::json!({ "port": local_addr.port() }));
    info!(addr = %local_addr, "REST API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically delete expired one-time codes, recovery codes and refresh tokens.
fn spawn_sweeper(state: AppState, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match state.otp.purge_expired().await {
                Ok(n) => debug!(purged = n, "expired one-time codes swept"),
                Err(e) => warn!(error = %e, "one-time code sweep failed"),
            }
            match state.recovery.purge_expired().await {
                Ok(n) => debug!(purged = n, "expired recovery codes swept"),
                Err(e) => warn!(error = %e, "recovery code sweep failed"),
            }
            match state.refresh.purge_expired().await {
                Ok(n) => debug!(purged = n, "expired refresh tokens swept"),
                Err(e) => warn!(error = %e, "refresh token sweep failed"),
            }
        }
    });
}
