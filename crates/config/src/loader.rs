use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::AppConfig;

pub fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

pub fn load_from_env_or_default(default_path: &Path) -> Result<(AppConfig, PathBuf)> {
    let configured = env::var("DEFIPOLY_BACKEND_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_path.to_path_buf());
    let mut config = load_from_path(&configured)?;

    if let Ok(log_level) = env::var("DEFIPOLY_BACKEND_LOG_LEVEL") {
        let trimmed = log_level.trim();
        if !trimmed.is_empty() {
            config.system.log_level = trimmed.to_string();
        }
    }
    if let Some(log_json) = env::var("DEFIPOLY_BACKEND_LOG_JSON")
        .ok()
        .and_then(parse_env_bool)
    {
        config.system.log_json = log_json;
    }
    if let Some(heartbeat_seconds) = env::var("DEFIPOLY_BACKEND_HEARTBEAT_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
    {
        config.system.heartbeat_seconds = heartbeat_seconds;
    }
    if let Ok(migrations_dir) = env::var("DEFIPOLY_BACKEND_MIGRATIONS_DIR") {
        let trimmed = migrations_dir.trim();
        if !trimmed.is_empty() {
            config.system.migrations_dir = trimmed.to_string();
        }
    }
    if let Ok(sqlite_path) = env::var("DEFIPOLY_BACKEND_SQLITE_PATH") {
        let trimmed = sqlite_path.trim();
        if !trimmed.is_empty() {
            config.sqlite.path = trimmed.to_string();
        }
    }
    if let Ok(host) = env::var("DEFIPOLY_BACKEND_WEB_HOST") {
        let trimmed = host.trim();
        if !trimmed.is_empty() {
            config.web.host = trimmed.to_string();
        }
    }
    if let Some(port) = env::var("DEFIPOLY_BACKEND_WEB_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.web.port = port;
    }
    if let Ok(token) = env::var("DEFIPOLY_BACKEND_INGEST_AUTH_TOKEN") {
        config.web.ingest_auth_token = token;
    }
    if let Some(capacity) = env::var("DEFIPOLY_BACKEND_LIVE_CHANNEL_CAPACITY")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        config.web.live_channel_capacity = capacity.max(16);
    }
    if let Some(steal_protection_seconds) = env::var("DEFIPOLY_BACKEND_STEAL_PROTECTION_SECONDS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
    {
        config.game.steal_protection_seconds = steal_protection_seconds;
    }

    Ok((config, configured))
}

fn parse_env_bool(value: String) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
