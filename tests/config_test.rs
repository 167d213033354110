//! Tests for config loading

use harvester::config::Config;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;

const ENV_VARS: &[&str] = &[
    "DATABASE_URL",
    "POSTGRES_URL",
    "REDIS_URL",
    "HARVESTER_LOCK_TTL",
    "HARVESTER_STALL_TIMEOUT_MS",
    "HARVESTER_KEY_PREFIX",
    "HARVESTER_STORAGE_NODE",
    "HARVESTER_LOG_FORMAT",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

#[test]
fn test_from_file_merges_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[database]
url = "postgresql://db.internal/crawl"

[scheduler]
min_poll_interval_secs = 45
key_prefix = "crawl"

[scheduler.replies]
process_limit = 10
flush_limit = 4

[logging]
format = "json"
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate().is_ok());

    assert_eq!(config.database.url, "postgresql://db.internal/crawl");
    assert_eq!(config.database.pool_size, 10);
    assert_eq!(config.scheduler.key_prefix, "crawl");
    assert_eq!(config.scheduler.min_poll_interval(), Duration::from_secs(45));
    assert_eq!(config.scheduler.replies.process_limit, 10);
    assert_eq!(config.scheduler.posts.process_limit, 5);
    assert_eq!(config.scheduler.stall_timeout(), Duration::from_millis(300_000));
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_from_file_rejects_bad_toml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler\nlock_ttl_secs = ").unwrap();

    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::from_file(&dir.path().join("absent.toml")).is_err());
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();

    let config = Config::from_env().unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.redis.url, "redis://localhost:6379");
    assert_eq!(config.scheduler.lock_ttl(), Duration::from_secs(30));
    assert_eq!(config.scheduler.storage_node, 1);
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("POSTGRES_URL", "postgresql://fallback/crawl");
    std::env::set_var("HARVESTER_LOCK_TTL", "60");
    std::env::set_var("HARVESTER_STALL_TIMEOUT_MS", "120000");
    std::env::set_var("HARVESTER_KEY_PREFIX", "crawl");
    std::env::set_var("HARVESTER_STORAGE_NODE", "not-a-number");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.database.url, "postgresql://fallback/crawl");
    assert_eq!(config.scheduler.lock_ttl(), Duration::from_secs(60));
    assert_eq!(config.scheduler.stall_timeout(), Duration::from_secs(120));
    assert_eq!(config.scheduler.key_prefix, "crawl");
    assert_eq!(config.scheduler.storage_node, 1, "unparsable values keep the default");
}

#[test]
#[serial]
fn test_lock_ttl_shorter_than_fetch_timeout_is_rejected() {
    clear_env();
    std::env::set_var("HARVESTER_LOCK_TTL", "10");

    let config = Config::from_env().unwrap();
    clear_env();

    assert!(config.validate().is_err());
}
