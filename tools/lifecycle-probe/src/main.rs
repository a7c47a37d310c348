//! Command-line probe for the Flashdeck lifecycle coordinator.
//!
//! Runs the connectivity probe and the offline page pre-warm against a real
//! origin, using the in-memory platform for everything a terminal lacks.
//!
//! ## Usage
//!
//! ```bash
//! # Classify the connection to a deployment
//! lifecycle-probe --base-url https://flashdeck.example probe
//!
//! # Fetch and store the offline page, then report the cache size
//! lifecycle-probe --config lifecycle.json offline-page
//!
//! # Print the aggregate lifecycle snapshot
//! lifecycle-probe snapshot
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use flashdeck_common::{try_init_logging, LifecycleConfig, LogConfig, LogFormat};
use flashdeck_lifecycle::{ConnectionQuality, LifecycleServices};
use flashdeck_platform::http_fetcher::FetcherConfig;
use flashdeck_platform::{HeadlessPlatform, HttpFetcher, Platform};
use serde::Serialize;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "lifecycle-probe")]
#[command(about = "Probe connectivity and offline readiness of a Flashdeck deployment")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Origin to probe, overriding the configuration
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Classify connection quality with a latency probe
    Probe {
        /// Number of probes to run
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
    },

    /// Fetch and store the offline fallback page
    OfflinePage,

    /// Print the aggregate lifecycle snapshot
    Snapshot,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    online: bool,
    quality: ConnectionQuality,
    latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct OfflinePageReport {
    cache: String,
    cached: bool,
    bytes: u64,
}

fn load_config(path: Option<&Path>, base_url: Option<&str>) -> anyhow::Result<LifecycleConfig> {
    let mut config = match path {
        Some(path) => LifecycleConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LifecycleConfig::default(),
    };
    if let Some(base_url) = base_url {
        config.base_url = base_url.to_string();
    }
    config.validate()?;
    Ok(config)
}

/// Headless platform with the real network swapped in.
fn build_platform(config: &LifecycleConfig) -> anyhow::Result<Platform> {
    let headless = HeadlessPlatform::new();
    let mut platform = headless.handle();
    platform.network = Arc::new(HttpFetcher::new(FetcherConfig::from(config))?);
    Ok(platform)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    let log_format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    try_init_logging(log_config.with_format(log_format))?;

    let config = load_config(cli.config.as_deref(), cli.base_url.as_deref())?;
    debug!(base_url = %config.base_url, "Configuration loaded");

    let services = LifecycleServices::new(build_platform(&config)?, config)?;

    match cli.command {
        Commands::Probe { count } => {
            for _ in 0..count.max(1) {
                let quality = services.connectivity().test_connection().await;
                let state = services.connectivity().state();
                print_json(&ProbeReport {
                    online: state.online,
                    quality,
                    latency_ms: state.latency.map(|l| l.as_millis() as u64),
                })?;
            }
        }
        Commands::OfflinePage => {
            let cache = services.cache();
            cache.cache_offline_page().await;
            print_json(&OfflinePageReport {
                cache: cache.cache_name(),
                cached: cache.status().offline_page_cached,
                bytes: cache.cache_size().await,
            })?;
        }
        Commands::Snapshot => print_json(&services.snapshot())?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_probe_with_global_flags() {
        let cli = Cli::try_parse_from([
            "lifecycle-probe",
            "probe",
            "--count",
            "3",
            "--base-url",
            "https://flashdeck.example",
        ])
        .unwrap();
        assert_eq!(cli.command, Commands::Probe { count: 3 });
        assert_eq!(cli.base_url.as_deref(), Some("https://flashdeck.example"));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_count_and_config_short_flags_are_distinct() {
        let cli = Cli::try_parse_from([
            "lifecycle-probe",
            "-c",
            "lifecycle.json",
            "probe",
            "-n",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.command, Commands::Probe { count: 2 });
        assert_eq!(cli.config, Some(PathBuf::from("lifecycle.json")));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_requires_subcommand() {
        assert!(Cli::try_parse_from(["lifecycle-probe"]).is_err());
    }

    #[test]
    fn test_parse_offline_page() {
        let cli = Cli::try_parse_from(["lifecycle-probe", "-v", "offline-page"]).unwrap();
        assert_eq!(cli.command, Commands::OfflinePage);
        assert!(cli.verbose);
    }

    #[test]
    fn test_load_config_file_with_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cache_version": "v7", "slow_threshold_ms": 250}}"#).unwrap();

        let config = load_config(Some(file.path()), Some("https://cards.example/")).unwrap();
        assert_eq!(config.cache_name(), "flashdeck-v7");
        assert_eq!(config.slow_threshold_ms, 250);
        assert_eq!(config.base_url, "https://cards.example/");
    }

    #[test]
    fn test_load_config_rejects_bad_override() {
        assert!(load_config(None, Some("::not a url")).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/lifecycle.json")), None).unwrap_err();
        assert!(err.to_string().contains("lifecycle.json"));
    }
}
