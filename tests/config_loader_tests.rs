use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;
use triage::config::{ConfigError, ConfigLoader};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("TRIAGE_"))
        .collect();
    unsafe {
        for key in keys {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.log_format, "json");
    assert_eq!(cfg.github_api_base, "https://api.github.com");
    assert_eq!(cfg.tracker_timeout_seconds, 10);
    assert_eq!(cfg.lifecycle.reopen_window_days, 7);
    assert_eq!(cfg.lifecycle.stale_days, 7);
    assert_eq!(cfg.lifecycle.comment_cooldown_minutes, 60);
    assert_eq!(cfg.lifecycle.noise_guard_hours, 24);
    assert_eq!(cfg.dispatch.concurrency, 8);
    assert_eq!(cfg.sweep.batch_size, 500);
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "TRIAGE_REOPEN_WINDOW_DAYS=3\n");
    write_env_file(&temp_dir, ".env.test", "TRIAGE_REOPEN_WINDOW_DAYS=5\n");
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "TRIAGE_REOPEN_WINDOW_DAYS=14\nTRIAGE_LOG_FORMAT=pretty\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "TRIAGE_PROFILE=test\nTRIAGE_REOPEN_WINDOW_DAYS=4\nTRIAGE_STALE_DAYS=30\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.lifecycle.reopen_window_days, 14);
    assert_eq!(cfg.lifecycle.stale_days, 30);
    assert_eq!(cfg.log_format, "pretty");
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "TRIAGE_DISPATCH_CONCURRENCY=2\nTRIAGE_GITHUB_API_BASE=https://ghe.example.com/api/v3\n",
    );

    unsafe {
        env::set_var("TRIAGE_DISPATCH_CONCURRENCY", "16");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.dispatch.concurrency, 16);
    assert_eq!(cfg.github_api_base, "https://ghe.example.com/api/v3");

    clear_env();
}

#[test]
fn unparsable_number_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("TRIAGE_STALE_DAYS", "a week");
    }
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("non-numeric window should fail");
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "STALE_DAYS"));
    assert!(err.to_string().contains("TRIAGE_STALE_DAYS"));

    clear_env();
}

#[test]
fn out_of_range_values_fail_validation() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "TRIAGE_SWEEP_INTERVAL_SECONDS=5\n");
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("sweep interval below minimum");
    assert!(matches!(err, ConfigError::InvalidSweepInterval { value: 5 }));

    clear_env();
}
