use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use barkwatch_app::PipelineHandle;
use barkwatch_detect::EnergyClassifier;
use barkwatch_foundation::{PipelineConfig, ShutdownHandler};

#[derive(Parser, Debug)]
#[command(name = "barkwatch", about = "Real-time bark detection pipeline")]
struct Cli {
    /// Input device name; the system default when omitted.
    #[arg(short, long, env = "BARKWATCH_DEVICE")]
    device: Option<String>,

    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long, env = "BARKWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Override the confirmation confidence threshold.
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Print confirmed events as JSON lines on stdout.
    #[arg(long)]
    json: bool,

    /// Seconds between telemetry summaries in the log.
    #[arg(long, default_value_t = 30)]
    stats_interval: u64,
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "barkwatch.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(guard);
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read config file {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("Cannot parse config file {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    if let Some(threshold) = cli.threshold {
        config.decision.confidence_threshold = threshold;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging()?;
    tracing::info!("Starting barkwatch");

    let config = load_config(&cli)?;
    config.validate()?;

    let classifier = Box::new(EnergyClassifier::new(
        &config.feature,
        config.capture.sample_rate_hz,
    ));

    let shutdown = ShutdownHandler::new().install().await;
    let (pipeline, mut events) =
        PipelineHandle::start(config, classifier, cli.device.clone())?;
    let stats = pipeline.stats();

    let mut stats_interval = tokio::time::interval(Duration::from_secs(cli.stats_interval));
    stats_interval.tick().await; // the immediate first tick

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if cli.json {
                            println!("{}", serde_json::to_string(&event)?);
                        }
                    }
                    None => {
                        tracing::error!("Event channel closed unexpectedly");
                        break;
                    }
                }
            }
            _ = stats_interval.tick() => {
                let s = stats.snapshot();
                tracing::info!(
                    frames_captured = s.frames_captured,
                    cycles_completed = s.cycles_completed,
                    cycles_skipped = s.cycles_skipped,
                    events_emitted = s.events_emitted,
                    ring_overruns = s.ring_overruns,
                    capture_fps = s.capture_fps,
                    analysis_fps = s.analysis_fps,
                    audio_level_db = s.audio_level_db,
                    preprocess_us = s.preprocess_us,
                    extract_us = s.extract_us,
                    classify_us = s.classify_us,
                    healthy = pipeline.is_healthy(),
                    "Pipeline telemetry"
                );
            }
        }
    }

    tracing::info!("Beginning graceful shutdown");
    pipeline.shutdown().await?;

    // Drain anything still queued on the channel so no confirmed event
    // is lost.
    while let Some(event) = events.recv().await {
        if cli.json {
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_config_given() {
        let cli = Cli::parse_from(["barkwatch"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.capture.sample_rate_hz, 16_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn threshold_flag_overrides_config() {
        let cli = Cli::parse_from(["barkwatch", "--threshold", "0.6"]);
        let config = load_config(&cli).unwrap();
        assert!((config.decision.confidence_threshold - 0.6).abs() < 1e-6);
    }

    #[test]
    fn config_file_round_trips() {
        let config = PipelineConfig::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml::to_string(&config).unwrap().as_bytes())
            .unwrap();

        let cli = Cli::parse_from([
            "barkwatch",
            "--config",
            file.path().to_str().unwrap(),
        ]);
        let parsed = load_config(&cli).unwrap();
        assert_eq!(parsed.capture.sample_rate_hz, config.capture.sample_rate_hz);
        assert_eq!(parsed.feature.fft_size, config.feature.fft_size);
        assert_eq!(parsed.decision.debounce_ms, config.decision.debounce_ms);
    }

    #[test]
    fn unreadable_config_path_is_an_error() {
        let cli = Cli::parse_from(["barkwatch", "--config", "/nonexistent/barkwatch.toml"]);
        assert!(load_config(&cli).is_err());
    }
}
