use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use glacierwatch::ai::{AnalysisBackend, ImageAnalyzer, MockBackend, OllamaBackend, OpenAIBackend};
use glacierwatch::alerts::{AlertEngine, RateLimiter};
use glacierwatch::blob::{BlobStore, FsBlobStore, HttpBlobStore, ImageUpload};
use glacierwatch::config::{AIBackendConfig, BlobConfig, Config, StoreConfig, OPENAI_API_KEY_VAR};
use glacierwatch::error::ConfigError;
use glacierwatch::health::HealthClassifier;
use glacierwatch::records::{AnalysisStatus, Location, NewGlacier};
use glacierwatch::service::GlacierService;
use glacierwatch::store::{GlacierRepository, ImageQuery, MemoryStore, RestStore};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Command-line arguments for the glacier monitor
#[derive(Parser)]
#[command(
    name = "glacierwatch",
    about = "Glacier health monitor - AI-assisted image analysis, health scores and alerts",
    long_about = "Tracks glacier measurements over time, analyzes uploaded satellite images \
                  with an AI model, classifies each glacier's health from its measurement \
                  history and raises alerts on rapid melt or ice loss."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// List monitored glaciers
    Glaciers,

    /// Register a new glacier
    AddGlacier {
        name: String,
        #[arg(long, allow_negative_numbers = true)]
        latitude: f64,
        #[arg(long, allow_negative_numbers = true)]
        longitude: f64,
        #[arg(long)]
        region: String,
        #[arg(long)]
        country: String,
    },

    /// Upload and analyze glacier images
    Upload {
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
        /// Glacier the images belong to
        #[arg(long, value_name = "ID")]
        glacier: Option<String>,
    },

    /// Show health of one glacier, or of all glaciers
    Health {
        id: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// List uploaded images
    Images {
        #[arg(long)]
        status: Option<AnalysisStatus>,
        #[arg(long, value_name = "ID")]
        glacier: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// List alerts, newest first
    Alerts,

    /// Check the data store connection
    Check,

    /// Re-evaluate alerts periodically until interrupted
    Watch {
        /// Seconds between evaluations (defaults to the configured interval)
        #[arg(long)]
        interval: Option<u64>,
    },
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        match &self.command {
            Command::Images { limit: 0, .. } => Err("--limit must be greater than 0".to_string()),
            Command::Watch { interval: Some(0) } => {
                Err("--interval must be greater than 0".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Load configuration from file or use defaults
///
/// A missing or invalid file is reported and replaced by the defaults.
/// Secrets left empty are filled from the environment.
fn load_config(config_path: Option<&str>) -> Config {
    let mut config = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            match Config::from_file(std::path::Path::new(path)) {
                Ok(config) => config,
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path
                    );
                    Config::default()
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path, e);
                    warn!("Using default configuration due to invalid config file");
                    Config::default()
                }
            }
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };
    config.apply_env();
    config
}

fn build_repository(config: &StoreConfig) -> anyhow::Result<Arc<dyn GlacierRepository>> {
    let repository: Arc<dyn GlacierRepository> = match config {
        StoreConfig::Memory { demo_data: true } => Arc::new(MemoryStore::with_demo_data()),
        StoreConfig::Memory { demo_data: false } => Arc::new(MemoryStore::new()),
        StoreConfig::Rest {
            url,
            api_key,
            timeout_seconds,
        } => {
            if url.is_empty() {
                bail!("store.url is not set; add it to the config file or set SUPABASE_URL");
            }
            if api_key.is_empty() {
                warn!("No store API key configured; requests will be anonymous");
            }
            Arc::new(RestStore::with_timeout(
                url.clone(),
                api_key.clone(),
                Duration::from_secs(*timeout_seconds),
            ))
        }
    };
    Ok(repository)
}

fn build_blob_store(config: &BlobConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    let blobs: Arc<dyn BlobStore> = match config {
        BlobConfig::Fs { root, public_base } => {
            let store = FsBlobStore::new(root.clone());
            match public_base {
                Some(base) => Arc::new(store.with_public_base(base.clone())),
                None => Arc::new(store),
            }
        }
        BlobConfig::Http { base_url, token } => {
            if base_url.is_empty() {
                bail!("blob.base_url is not set");
            }
            if token.is_empty() {
                warn!("No blob token configured; uploads will likely be rejected");
            }
            Arc::new(HttpBlobStore::new(base_url.clone(), token.clone()))
        }
    };
    Ok(blobs)
}

fn build_analyzer(config: &Config) -> ImageAnalyzer {
    let timeout = config.ai.timeout();
    let backend: Arc<dyn AnalysisBackend> = match &config.ai.backend {
        AIBackendConfig::Ollama { endpoint, model } => {
            Arc::new(OllamaBackend::new(endpoint.clone(), model.clone()).with_timeout(timeout))
        }
        AIBackendConfig::OpenAI {
            api_key,
            model,
            base_url,
        } => {
            if api_key.is_empty() {
                warn!(
                    "No OpenAI API key configured; set {} or ai.api_key",
                    OPENAI_API_KEY_VAR
                );
            }
            Arc::new(
                OpenAIBackend::with_base_url(api_key.clone(), model.clone(), base_url.clone())
                    .with_timeout(timeout),
            )
        }
        AIBackendConfig::Mock => Arc::new(MockBackend::success()),
    };
    ImageAnalyzer::with_backend(backend).with_fallback(config.ai.fallback)
}

/// Build the service from configuration
fn build_service(config: &Config) -> anyhow::Result<GlacierService> {
    let repository = build_repository(&config.store)?;
    let blobs = build_blob_store(&config.blob)?;
    let analyzer = build_analyzer(config);
    info!(
        "Using {} analysis backend (fallback {})",
        analyzer.backend_name(),
        if analyzer.fallback_enabled() { "on" } else { "off" }
    );

    let engine =
        AlertEngine::with_thresholds(config.alerts.rapid_melt_pct, config.alerts.volume_loss_pct);
    let rate_limiter = RateLimiter::new(config.alerts.max_per_window, config.alerts.window());

    Ok(GlacierService::new(repository, blobs, analyzer)
        .with_classifier(HealthClassifier::new(config.health.zero_baseline))
        .with_alerts(engine, rate_limiter))
}

async fn run(command: Command, service: &GlacierService, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Glaciers => {
            for glacier in service.list_glaciers().await? {
                println!(
                    "{}  {:<28} {}, {}  {}",
                    glacier.id,
                    glacier.name,
                    glacier.region,
                    glacier.country,
                    glacier.status.map_or("-", |s| s.as_str())
                );
            }
        }
        Command::AddGlacier {
            name,
            latitude,
            longitude,
            region,
            country,
        } => {
            let glacier = service
                .create_glacier(&NewGlacier {
                    name,
                    location: Location {
                        latitude,
                        longitude,
                    },
                    region,
                    country,
                })
                .await?;
            println!("{}", glacier.id);
        }
        Command::Upload { files, glacier } => {
            let mut failures = 0;
            for path in &files {
                let upload = match ImageUpload::from_path(path) {
                    Ok(upload) => upload,
                    Err(e) => {
                        error!("Skipping {}: {}", path.display(), e);
                        failures += 1;
                        continue;
                    }
                };
                match service.upload_image(&upload, glacier.as_deref()).await {
                    Ok(outcome) => {
                        println!("{}: {} {}", path.display(), outcome.status(), outcome.blob.url);
                        if let Ok(analysis) = &outcome.analysis {
                            if let Some(assessment) = analysis.assessment {
                                println!(
                                    "  health {} ({:.1}), {} new alerts",
                                    assessment.status,
                                    assessment.score,
                                    analysis.alerts.len()
                                );
                            }
                        }
                    }
                    Err(e) => {
                        error!("Upload of {} failed: {}", path.display(), e);
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                bail!("{} of {} uploads failed", failures, files.len());
            }
        }
        Command::Health { id: Some(id), json } => {
            let report = service.glacier_report(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{}: {} ({:.1}/10)",
                    report.glacier.name, report.assessment.status, report.assessment.score
                );
                for metric in &report.metrics {
                    let change = metric
                        .change_pct
                        .map_or_else(|| "n/a".to_string(), |c| format!("{:+.1}%", c));
                    println!(
                        "  {:<13} {:>10.2} {:<7} {:>8}  {} / {}",
                        metric.metric.as_str(),
                        metric.current.unwrap_or(f64::NAN),
                        metric.unit,
                        change,
                        metric.trend.map_or("-", |t| t.as_str()),
                        metric.severity.map_or("-", |s| s.as_str())
                    );
                }
            }
        }
        Command::Health { id: None, json } => {
            let summary = service.health_overview().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for glacier in &summary.glaciers {
                    println!(
                        "{:<28} {:>5.1}  {}",
                        glacier.name, glacier.score, glacier.status
                    );
                }
                let overview = &summary.overview;
                println!(
                    "critical {}, warning {}, moderate {}, stable {}",
                    overview.critical, overview.warning, overview.moderate, overview.stable
                );
                if let Some(average) = overview.average_score {
                    println!("average score {:.1}", average);
                }
            }
        }
        Command::Images {
            status,
            glacier,
            page,
            limit,
        } => {
            let result = service
                .list_images(&ImageQuery {
                    status,
                    glacier_id: glacier,
                    page,
                    limit,
                })
                .await?;
            for image in &result.images {
                println!(
                    "{}  {:<10} {}  {}",
                    image.upload_date.format("%Y-%m-%d %H:%M"),
                    image.analysis_status.as_str(),
                    image.glacier_id.as_deref().unwrap_or("-"),
                    image.image_url
                );
            }
            let pagination = result.pagination;
            println!(
                "page {} of {} ({} images)",
                pagination.current_page, pagination.total_pages, pagination.total_items
            );
        }
        Command::Alerts => {
            for alert in service.list_alerts().await? {
                println!(
                    "{}  {:<8} {:<15} {}",
                    alert.created_at.format("%Y-%m-%d %H:%M"),
                    alert.severity.as_str(),
                    alert.alert_type.as_str(),
                    alert.alert_message
                );
            }
        }
        Command::Check => {
            let stats = service
                .check_connection()
                .await
                .context("Data store check failed")?;
            println!(
                "ok: {} glaciers, {} measurements, {} images, {} alerts",
                stats.glaciers, stats.measurements, stats.images, stats.alerts
            );
        }
        Command::Watch { interval } => {
            let seconds = interval.unwrap_or(config.watch.interval_seconds);
            watch(service, Duration::from_secs(seconds)).await?;
        }
    }
    Ok(())
}

/// Evaluate alerts every `period` until Ctrl+C
async fn watch(service: &GlacierService, period: Duration) -> anyhow::Result<()> {
    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        signal.notify_one();
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    info!("Watching glaciers every {:?}. Press Ctrl+C to stop.", period);
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.evaluate_alerts().await {
                    Ok(alerts) => {
                        for alert in alerts {
                            println!("{}: {}", alert.alert_type, alert.alert_message);
                        }
                    }
                    Err(e) => error!("Alert evaluation failed: {}", e),
                }
            }
            _ = shutdown.notified() => break,
        }
    }

    info!("Watch stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };
    let config = load_config(config_path);

    let service = match build_service(&config) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to initialize glacier service: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, &service, &config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(config: Option<PathBuf>, command: Command) -> Cli {
        Cli {
            config,
            verbose: false,
            command,
        }
    }

    fn memory_config() -> Config {
        Config::from_toml_str("[ai]\nbackend = \"mock\"").unwrap()
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[ai]\nbackend = \"mock\"").unwrap();

        let cli = cli(Some(file.path().to_path_buf()), Command::Check);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        let cli = cli(Some(PathBuf::from("/nonexistent/config.toml")), Command::Check);

        // Missing files are handled by falling back to defaults
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli(Some(dir.path().to_path_buf()), Command::Check);

        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_cli_validation_rejects_zero_limits() {
        let images = cli(
            None,
            Command::Images {
                status: None,
                glacier: None,
                page: 1,
                limit: 0,
            },
        );
        assert!(images.validate().is_err());

        let watch = cli(None, Command::Watch { interval: Some(0) });
        assert!(watch.validate().is_err());
        assert!(cli(None, Command::Watch { interval: None }).validate().is_ok());
    }

    #[test]
    fn test_config_path_str() {
        let with_path = cli(Some(PathBuf::from("config.toml")), Command::Alerts);
        assert_eq!(with_path.config_path_str().unwrap(), Some("config.toml"));

        let without = cli(None, Command::Alerts);
        assert_eq!(without.config_path_str().unwrap(), None);
    }

    #[test]
    fn test_parse_subcommands() {
        let parsed = Cli::try_parse_from([
            "glacierwatch",
            "-v",
            "upload",
            "a.png",
            "b.jpg",
            "--glacier",
            "g-1",
        ])
        .unwrap();
        assert!(parsed.verbose);
        assert_eq!(
            parsed.command,
            Command::Upload {
                files: vec![PathBuf::from("a.png"), PathBuf::from("b.jpg")],
                glacier: Some("g-1".to_string()),
            }
        );

        let parsed = Cli::try_parse_from(["glacierwatch", "images", "--status", "failed"]).unwrap();
        assert_eq!(
            parsed.command,
            Command::Images {
                status: Some(AnalysisStatus::Failed),
                glacier: None,
                page: 1,
                limit: 10,
            }
        );

        let parsed = Cli::try_parse_from([
            "glacierwatch",
            "add-glacier",
            "Perito Moreno Glacier",
            "--latitude",
            "-50.49",
            "--longitude",
            "-73.13",
            "--region",
            "Santa Cruz",
            "--country",
            "Argentina",
        ])
        .unwrap();
        assert!(matches!(
            parsed.command,
            Command::AddGlacier { latitude, .. } if latitude < 0.0
        ));

        assert!(Cli::try_parse_from(["glacierwatch", "upload"]).is_err());
        assert!(Cli::try_parse_from(["glacierwatch", "images", "--status", "lost"]).is_err());
    }

    #[test]
    fn test_load_config_falls_back_to_defaults() {
        let mut config = load_config(Some("/nonexistent/glacierwatch.toml"));
        let mut expected = Config::default();
        expected.apply_env();
        assert_eq!(config, expected);

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[watch]\ninterval_seconds = 0").unwrap();
        config = load_config(file.path().to_str());
        assert_eq!(config.watch.interval_seconds, 3600);
    }

    #[test]
    fn test_build_service_rejects_rest_store_without_url() {
        let mut config = memory_config();
        config.store = StoreConfig::Rest {
            url: String::new(),
            api_key: String::new(),
            timeout_seconds: 30,
        };
        assert!(build_service(&config).is_err());
    }

    #[tokio::test]
    async fn test_run_commands_against_demo_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config();
        config.blob = BlobConfig::Fs {
            root: dir.path().to_path_buf(),
            public_base: None,
        };
        let service = build_service(&config).unwrap();

        run(Command::Check, &service, &config).await.unwrap();
        run(Command::Glaciers, &service, &config).await.unwrap();
        run(Command::Health { id: None, json: true }, &service, &config)
            .await
            .unwrap();

        let image = dir.path().join("aletsch.png");
        std::fs::write(&image, [0x89, b'P', b'N', b'G']).unwrap();
        run(
            Command::Upload {
                files: vec![image],
                glacier: None,
            },
            &service,
            &config,
        )
        .await
        .unwrap();
        assert_eq!(service.repository().stats().await.unwrap().images, 1);

        let missing = run(
            Command::Health {
                id: Some("missing".to_string()),
                json: false,
            },
            &service,
            &config,
        )
        .await;
        assert!(missing.is_err());
    }
}
