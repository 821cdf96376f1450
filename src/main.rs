mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tunebridge::{config, RequestContext, SourceManager};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "tunebridge=trace,tunebridge_common=debug,reqwest=debug".to_string()
        } else {
            "tunebridge=info,reqwest=warn".to_string()
        }
    });

    // Logs go to stderr so stdout stays valid JSON.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("tunebridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_command(command, cli.config.as_deref(), cli.timeout))
        }
    }
}

async fn run_command(command: Commands, config_path: Option<&Path>, timeout: Option<u64>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let manager = SourceManager::from_config(&config).context("failed to build source manager")?;

    let shutdown = CancellationToken::new();
    let sweepers = manager.spawn_background(&shutdown);

    let timeout = Duration::from_secs(timeout.unwrap_or(config.search.timeout_secs));
    let ctx = RequestContext::new().with_timeout(timeout);

    // Ctrl-C cancels the in-flight request.
    let interrupt = ctx.cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling request");
            interrupt.cancel();
        }
    });

    let result: Result<()> = async {
        match command {
            Commands::Search { keyword, sources } => {
                print_json(&manager.search_music(&ctx, &keyword, &sources).await?)
            }
            Commands::Match {
                id,
                sources,
                quality,
            } => print_json(
                &manager
                    .match_music(&ctx, &id, &sources, quality.as_deref())
                    .await?,
            ),
            Commands::Info { source, id } => {
                print_json(&manager.get_music_info(&ctx, &source, &id).await?)
            }
            Commands::Lyric { source, id } => {
                print_json(&manager.get_lyric(&ctx, &source, &id).await?)
            }
            Commands::Status => print_json(&manager.get_sources_status(&ctx).await),
            Commands::Validate { .. } | Commands::Version => Ok(()),
        }
    }
    .await;

    shutdown.cancel();
    for handle in sweepers {
        let _ = handle.await;
    }

    result
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Providers: {}", config.providers.len());
            println!(
                "    Enabled: {}",
                config.providers.iter().filter(|p| p.enabled).count()
            );
            for provider in &config.providers {
                println!(
                    "    - {} ({}, priority {})",
                    provider.name, provider.kind, provider.priority
                );
            }
            println!("  Cache enabled: {}", config.cache.enabled);
            println!(
                "  Rate limit: {}",
                if config.rate_limit.enabled {
                    format!("{:?}", config.rate_limit.algorithm)
                } else {
                    "disabled".to_string()
                }
            );
            println!("  Resolver enabled: {}", config.resolver.enabled);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Providers: {}", config.providers.len());
            println!("  Cache TTL: {}s", config.cache.default_ttl_secs);
        }
    }

    Ok(())
}
