use super::*;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

static ENV_LOCK: Mutex<()> = Mutex::new(());
static TEMP_CONFIG_COUNTER: AtomicU64 = AtomicU64::new(0);

#[test]
fn defaults_match_the_dev_profile() {
    let config = AppConfig::default();
    assert_eq!(config.system.env, "dev");
    assert_eq!(config.system.heartbeat_seconds, 30);
    assert_eq!(config.system.migrations_dir, "migrations");
    assert_eq!(config.sqlite.path, "state/defipoly.db");
    assert_eq!(config.web.port, 8787);
    assert_eq!(config.web.ingest_auth_token, "REPLACE_ME");
    assert_eq!(config.game.steal_protection_seconds, 21_600);
}

#[test]
fn partial_toml_fills_missing_sections_with_defaults() {
    with_temp_config_file(
        "[web]\nport = 9000\n\n[sqlite]\npath = \"/tmp/game.db\"\n",
        |config_path| {
            let config = load_from_path(config_path).expect("load partial config");
            assert_eq!(config.web.port, 9000);
            assert_eq!(config.web.host, "127.0.0.1");
            assert_eq!(config.sqlite.path, "/tmp/game.db");
            assert_eq!(config.system.log_level, "info");
        },
    );
}

#[test]
fn env_overrides_take_precedence_over_file_values() {
    with_temp_config_file("[web]\nport = 9000\n", |config_path| {
        with_clean_backend_env(|| {
            with_env_var("DEFIPOLY_BACKEND_WEB_PORT", "9001", || {
                with_env_var("DEFIPOLY_BACKEND_INGEST_AUTH_TOKEN", "secret-token", || {
                    with_env_var("DEFIPOLY_BACKEND_LOG_JSON", "true", || {
                        let (config, _) = load_from_env_or_default(config_path)
                            .expect("load config with env overrides");
                        assert_eq!(config.web.port, 9001);
                        assert_eq!(config.web.ingest_auth_token, "secret-token");
                        assert!(config.system.log_json);
                    });
                });
            });
        });
    });
}

#[test]
fn blank_env_overrides_are_ignored_for_paths() {
    with_temp_config_file("[sqlite]\npath = \"/srv/defipoly.db\"\n", |config_path| {
        with_clean_backend_env(|| {
            with_env_var("DEFIPOLY_BACKEND_SQLITE_PATH", "   ", || {
                let (config, _) =
                    load_from_env_or_default(config_path).expect("load config with blank env");
                assert_eq!(config.sqlite.path, "/srv/defipoly.db");
            });
        });
    });
}

#[test]
fn env_config_path_redirects_the_load() {
    with_temp_config_file("[web]\nport = 7000\n", |redirect_path| {
        with_clean_backend_env(|| {
            with_env_var(
                "DEFIPOLY_BACKEND_CONFIG",
                &redirect_path.display().to_string(),
                || {
                    let (config, loaded_path) =
                        load_from_env_or_default(Path::new("configs/does-not-exist.toml"))
                            .expect("load redirected config");
                    assert_eq!(config.web.port, 7000);
                    assert_eq!(loaded_path, redirect_path);
                },
            );
        });
    });
}

fn with_env_var<T>(key: &'static str, value: &str, run: impl FnOnce() -> T) -> T {
    let previous = std::env::var_os(key);
    std::env::set_var(key, value);
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(run));
    restore_env_var(key, previous);
    match outcome {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn restore_env_var(key: &'static str, previous: Option<OsString>) {
    match previous {
        Some(value) => std::env::set_var(key, value),
        None => std::env::remove_var(key),
    }
}

fn with_clean_backend_env<T>(run: impl FnOnce() -> T) -> T {
    // Serialize all DEFIPOLY_BACKEND_* env mutations in this test module.
    let _guard = ENV_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let saved: Vec<(OsString, OsString)> = std::env::vars_os()
        .filter(|(key, _)| key.to_string_lossy().starts_with("DEFIPOLY_BACKEND_"))
        .collect();
    for (key, _) in &saved {
        std::env::remove_var(key);
    }
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(run));
    for (key, value) in saved {
        std::env::set_var(key, value);
    }
    match outcome {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn with_temp_config_file<T>(contents: &str, run: impl FnOnce(&Path) -> T) -> T {
    let path = unique_temp_path();
    fs::write(&path, contents).expect("write temp config");
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(&path)));
    let _ = fs::remove_file(&path);
    match outcome {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn unique_temp_path() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let counter = TEMP_CONFIG_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "defipoly-config-test-{}-{}-{}.toml",
        std::process::id(),
        nanos,
        counter
    ))
}
