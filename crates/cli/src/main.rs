//! One-shot builder of OSM sub-area GeoJSON artifacts.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::Path;
use std::sync::Arc;
use subarea_core::config::AppConfig;
use subarea_core::{BuildOptions, EntityId};
use subarea_osm::{OsmClient, OsmConverter};
use subarea_pipeline::{ArtifactSink, BuildReport, Pipeline, StdoutSink};
use subarea_storage::ArtifactStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "subarea")]
#[command(about = "Fetch the sub-areas of an OSM relation as GeoJSON")]
#[command(version)]
struct Cli {
    /// OSM relation id of the parent area
    id: EntityId,

    /// Keep tag values as they are instead of stripping diacritics
    #[arg(long)]
    raw: bool,

    /// Write one file per sub-area instead of a single combined file
    #[arg(long)]
    separated: bool,

    /// Force counter-clockwise exterior rings
    #[arg(long)]
    rewind: bool,

    /// Output directory; an empty value prints artifacts to stdout
    #[arg(long, default_value = "./geo")]
    out: String,

    /// OSM API base URL (overrides configuration)
    #[arg(long)]
    base_url: Option<String>,

    /// Number of concurrent sub-area fetches (overrides configuration)
    #[arg(long)]
    workers: Option<usize>,

    /// Optional configuration file; SUBAREA_* env vars override it
    #[arg(long, env = "SUBAREA_CONFIG")]
    config: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            normalize: !self.raw,
            combine: !self.separated,
            rewind: self.rewind,
        }
    }

    fn load_config(&self) -> Result<AppConfig> {
        let mut figment = Figment::new();
        if let Some(path) = &self.config {
            if !Path::new(path).exists() {
                anyhow::bail!("config file not found: {path}");
            }
            figment = figment.merge(Toml::file(path));
        }

        let mut config: AppConfig = figment
            .merge(Env::prefixed("SUBAREA_").split("__"))
            .extract()
            .context("failed to load configuration")?;

        if let Some(base_url) = &self.base_url {
            config.remote.base_url = base_url.clone();
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        config.remote.validate().map_err(anyhow::Error::msg)?;
        config.pipeline.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_sink(out: &str) -> Result<Arc<dyn ArtifactSink>> {
    if out.is_empty() {
        return Ok(Arc::new(StdoutSink::new()));
    }
    let store = ArtifactStore::new(out)
        .await
        .with_context(|| format!("failed to open output directory {out}"))?;
    Ok(Arc::new(store))
}

fn log_report(report: &BuildReport) {
    for failure in &report.failed {
        tracing::warn!(id = %failure.id, error = %failure.error, "sub-area skipped");
    }
    tracing::info!(
        parent = %report.parent,
        matched = report.matched,
        written = report.written.len(),
        failed = report.failed.len(),
        "done"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.load_config()?;
    let options = cli.build_options();
    tracing::debug!(?options, base_url = %config.remote.base_url, "starting build");

    let client = OsmClient::new(&config.remote).context("failed to create OSM client")?;
    let pipeline = Pipeline::new(Arc::new(client), Arc::new(OsmConverter), &config.pipeline);
    let sink = open_sink(&cli.out).await?;

    let report = pipeline
        .build(cli.id, options, sink)
        .await
        .with_context(|| format!("failed to build sub-areas of relation {}", cli.id))?;
    log_report(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flags() {
        let cli = Cli::try_parse_from(["subarea", "123"]).unwrap();
        assert_eq!(cli.id, EntityId::new(123));
        assert_eq!(cli.out, "./geo");
        assert_eq!(
            cli.build_options(),
            BuildOptions {
                normalize: true,
                combine: true,
                rewind: false,
            }
        );
    }

    #[test]
    fn test_mode_flags() {
        let cli = Cli::try_parse_from([
            "subarea",
            "--raw",
            "--separated",
            "--rewind",
            "--out",
            "",
            "42",
        ])
        .unwrap();
        assert_eq!(
            cli.build_options(),
            BuildOptions {
                normalize: false,
                combine: false,
                rewind: true,
            }
        );
        assert!(cli.out.is_empty());
    }

    #[test]
    fn test_invalid_id_rejected() {
        assert!(Cli::try_parse_from(["subarea", "abc"]).is_err());
    }

    #[test]
    fn test_flag_overrides_config() {
        let cli = Cli::try_parse_from([
            "subarea",
            "--base-url",
            "http://127.0.0.1:9",
            "--workers",
            "3",
            "1",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.remote.base_url, "http://127.0.0.1:9");
        assert_eq!(config.pipeline.workers, 3);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let cli =
            Cli::try_parse_from(["subarea", "--config", "/nonexistent/subarea.toml", "1"]).unwrap();
        assert!(cli.load_config().is_err());
    }

    #[tokio::test]
    async fn test_empty_out_prints_to_stdout() {
        assert!(open_sink("").await.is_ok());
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("geo");
        open_sink(out.to_str().unwrap()).await.unwrap();
        assert!(out.is_dir());
    }
}
