//! Loading configuration files from disk.

use std::io::Write;

use tempfile::NamedTempFile;
use tunebridge::config::{load_config, load_config_or_default, LimiterAlgorithm, ProviderKind};
use tunebridge::SourceManager;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const FULL: &str = r#"
[[providers]]
name = "gd"
type = "gdstudio"
priority = 2
base_url = "https://music-api.example.com/api.php"
rate_limit_per_second = 5
default_quality = "999"

[[providers]]
name = "unm"
type = "unm"
priority = 1
base_url = "http://127.0.0.1:8080"
cookie = "MUSIC_U=secret"
retry_count = 0

[cache]
default_ttl_secs = 0
max_entries = 1000

[rate_limit]
algorithm = "sliding_window"
window_secs = 10
max_requests = 100

[resolver]
keyword_fallback = true
seed_keywords = ["hello", "love"]

[search]
limit = 10
timeout_secs = 5
"#;

#[test]
fn load_full_config_from_file() {
    let file = write_config(FULL);
    let config = load_config(file.path()).unwrap();

    assert_eq!(config.providers.len(), 2);
    let gd = &config.providers[0];
    assert_eq!(gd.kind, ProviderKind::Gdstudio);
    assert_eq!(gd.rate_limit_per_second, Some(5));
    assert_eq!(gd.default_quality.as_deref(), Some("999"));
    assert!(gd.enabled);

    let unm = &config.providers[1];
    assert_eq!(unm.kind, ProviderKind::Unm);
    assert_eq!(unm.retry_count, 0);
    assert!(!format!("{unm:?}").contains("secret"));

    assert_eq!(config.cache.default_ttl_secs, 0);
    assert_eq!(config.cache.max_entries, Some(1000));
    assert_eq!(config.rate_limit.algorithm, LimiterAlgorithm::SlidingWindow);
    assert_eq!(config.resolver.seed_keywords, vec!["hello", "love"]);
    assert_eq!(config.search.limit, 10);
}

#[test]
fn explicit_path_wins_over_defaults() {
    let file = write_config(FULL);
    let config = load_config_or_default(Some(file.path())).unwrap();
    assert_eq!(config.providers.len(), 2);
}

#[test]
fn missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    let err = load_config_or_default(Some(&missing)).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read config file"));
}

#[test]
fn malformed_toml_is_rejected() {
    let file = write_config("[[providers]\nname = ");
    let err = load_config(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config"));
}

#[test]
fn invalid_provider_names_the_culprit() {
    let file = write_config(
        r#"
        [[providers]]
        name = "broken"
        type = "unm"
        base_url = "ftp://example.com"
        "#,
    );
    let err = load_config(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("broken"));
}

#[test]
fn duplicate_provider_names_are_rejected() {
    let file = write_config(
        r#"
        [[providers]]
        name = "dup"
        type = "unm"
        base_url = "http://a.example"

        [[providers]]
        name = "dup"
        type = "gdstudio"
        base_url = "http://b.example/api.php"
        "#,
    );
    let err = load_config(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Duplicate provider name"));
}

#[test]
fn unknown_provider_type_is_rejected() {
    let file = write_config(
        r#"
        [[providers]]
        name = "x"
        type = "soundcloud"
        base_url = "http://a.example"
        "#,
    );
    assert!(load_config(file.path()).is_err());
}

#[test]
fn loaded_config_builds_a_manager() {
    let file = write_config(FULL);
    let config = load_config(file.path()).unwrap();
    let manager = SourceManager::from_config(&config).unwrap();

    assert_eq!(manager.provider_names(), vec!["gd", "unm"]);
    assert!(manager.cache_stats().is_some());
}
