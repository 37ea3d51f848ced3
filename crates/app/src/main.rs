use anyhow::{Context, Result};
use chrono::Utc;
use defipoly_config::load_from_env_or_default;
use defipoly_storage::{sqlite_contention_snapshot, SqliteStore};
use std::env;
use std::path::{Path, PathBuf};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod web;

use web::WebRuntimeHandle;

const DEFAULT_CONFIG_PATH: &str = "configs/dev.toml";
const HEARTBEAT_COMPONENT: &str = "defipoly-backend";

#[tokio::main]
async fn main() -> Result<()> {
    let cli_config = parse_config_arg();
    let default_path = cli_config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let (config, loaded_config_path) = load_from_env_or_default(&default_path)?;

    init_tracing(&config.system.log_level, config.system.log_json);
    info!(
        config_path = %loaded_config_path.display(),
        env = %config.system.env,
        "configuration loaded"
    );

    let mut store = SqliteStore::open(Path::new(&config.sqlite.path))
        .context("failed to initialize sqlite store")?;
    let migrations_dir = PathBuf::from(&config.system.migrations_dir);
    let applied = store
        .run_migrations(&migrations_dir)
        .with_context(|| format!("failed to apply migrations in {}", migrations_dir.display()))?;
    info!(applied, "sqlite migrations applied");

    let seeded = store
        .seed_properties_state(Utc::now())
        .context("failed to seed property availability")?;
    if seeded > 0 {
        info!(seeded, "property availability rows seeded");
    }

    store
        .record_heartbeat(HEARTBEAT_COMPONENT, "startup")
        .context("failed to write startup heartbeat")?;

    let runtime = WebRuntimeHandle::new(config.sqlite.path.clone(), &config);
    if !runtime.ingest_token_is_configured() {
        warn!("ingest auth token is not configured, writes will be rejected");
    }

    let server = tokio::spawn(runtime.clone().run_server(config.web.clone()));

    run_app_loop(store, config.system.heartbeat_seconds).await?;

    server.abort();
    Ok(())
}

fn parse_config_arg() -> Option<PathBuf> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(inline) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(inline));
        }
    }
    None
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .json()
            .compact()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

async fn run_app_loop(store: SqliteStore, heartbeat_seconds: u64) -> Result<()> {
    let mut interval = time::interval(Duration::from_secs(heartbeat_seconds.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(error) = store.record_heartbeat(HEARTBEAT_COMPONENT, "alive") {
                    warn!(error = %error, "heartbeat write failed");
                }
                let contention = sqlite_contention_snapshot();
                if contention.write_retry_total > 0 || contention.busy_error_total > 0 {
                    info!(
                        write_retries = contention.write_retry_total,
                        busy_errors = contention.busy_error_total,
                        "sqlite contention counters"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    store
        .record_heartbeat(HEARTBEAT_COMPONENT, "shutdown")
        .context("failed to write shutdown heartbeat")?;
    Ok(())
}
