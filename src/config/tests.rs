use super::*;
use serial_test::serial;
use std::io::Write;

fn clear_env() {
    for key in [
        CONFIG_ENV_VAR,
        "STOREFRONT__OUTBOX__MAX_RETRIES",
        "STOREFRONT__STORAGE__URL",
        "STOREFRONT__CACHE__URL",
    ] {
        std::env::remove_var(key);
    }
}

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.storage.url, "sqlite://storefront.db");
    assert_eq!(config.cache.url, "redis://127.0.0.1:6379");
    assert_eq!(config.outbox.max_retries, 10);
    assert_eq!(config.outbox.min_age_secs, 30);
    assert_eq!(config.summary.ttl(), Duration::from_secs(3600));
}

#[test]
fn test_config_for_test() {
    let config = Config::for_test();
    assert_eq!(config.storage.url, "sqlite::memory:");
    assert_eq!(config.storage.max_connections, 1);
    assert_eq!(config.outbox.min_age(), Duration::ZERO);
}

#[test]
#[serial]
fn test_load_without_sources_uses_defaults() {
    clear_env();
    let config = Config::load(None).unwrap();
    assert_eq!(config.outbox, OutboxConfig::default());
    assert_eq!(config.summary, SummaryConfig::default());
}

#[test]
#[serial]
fn test_load_partial_yaml_keeps_other_defaults() {
    clear_env();
    let file = yaml_file(
        "storage:\n  url: \"sqlite::memory:\"\noutbox:\n  batch_size: 7\nsummary:\n  ttl_secs: 60\n",
    );

    let config = Config::load(file.path().to_str()).unwrap();

    assert_eq!(config.storage.url, "sqlite::memory:");
    assert_eq!(config.storage.max_connections, 5);
    assert_eq!(config.outbox.batch_size, 7);
    assert_eq!(config.outbox.max_retries, 10);
    assert_eq!(config.summary.ttl_secs, 60);
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let file = yaml_file("outbox:\n  max_retries: 4\ncache:\n  url: redis://cache:6379\n");
    std::env::set_var(CONFIG_ENV_VAR, file.path());
    std::env::set_var("STOREFRONT__OUTBOX__MAX_RETRIES", "2");

    let config = Config::load(None);
    clear_env();
    let config = config.unwrap();

    assert_eq!(config.outbox.max_retries, 2);
    assert_eq!(config.cache.url, "redis://cache:6379");
}

#[test]
#[serial]
fn test_missing_explicit_file_is_error() {
    clear_env();
    assert!(Config::load(Some("/nonexistent/storefront.yaml")).is_err());
}
