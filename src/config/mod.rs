mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;

    Ok(config)
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./tunebridge.toml",
        "~/.config/tunebridge/config.toml",
        "/etc/tunebridge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    tracing::warn!("No config file found, starting without providers");
    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let mut names = HashSet::new();
    for provider in &config.providers {
        provider
            .validate()
            .with_context(|| format!("Invalid provider '{}'", provider.name))?;

        if !names.insert(provider.name.as_str()) {
            anyhow::bail!("Duplicate provider name '{}'", provider.name);
        }
    }

    if config.providers.iter().all(|p| !p.enabled) {
        tracing::warn!("No enabled providers configured");
    }

    let limits = &config.rate_limit;
    if limits.enabled {
        match limits.algorithm {
            LimiterAlgorithm::TokenBucket => {
                if limits.capacity == 0 {
                    anyhow::bail!("rate_limit.capacity cannot be 0");
                }
                if !(limits.refill_rate.is_finite() && limits.refill_rate > 0.0) {
                    anyhow::bail!("rate_limit.refill_rate must be positive");
                }
            }
            LimiterAlgorithm::SlidingWindow => {
                if limits.window_secs == 0 {
                    anyhow::bail!("rate_limit.window_secs cannot be 0");
                }
                if limits.max_requests == 0 {
                    anyhow::bail!("rate_limit.max_requests cannot be 0");
                }
            }
        }
        if limits.cleanup_interval_secs == 0 {
            anyhow::bail!("rate_limit.cleanup_interval_secs cannot be 0");
        }
    }

    if config.cache.enabled && config.cache.cleanup_interval_secs == 0 {
        anyhow::bail!("cache.cleanup_interval_secs cannot be 0");
    }
    if config.cache.max_entries == Some(0) {
        anyhow::bail!("cache.max_entries cannot be 0");
    }

    if config.search.limit == 0 {
        anyhow::bail!("search.limit cannot be 0");
    }

    if config.resolver.keyword_fallback && config.resolver.seed_keywords.is_empty() {
        tracing::warn!("resolver.keyword_fallback is enabled but no seed_keywords are set");
    }

    Ok(())
}
