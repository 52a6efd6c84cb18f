//! iqtap - headless entry point
//!
//! Runs the recorder against the synthetic source: starts a live baseband
//! capture, keeps the restart supervisor ticking, then stops and promotes the
//! run after the requested duration.
//!
//! ```text
//! iqtap [config.toml] [seconds]
//! ```

use anyhow::Context;
use iqtap::{
    backend::{MockSignal, MockSource},
    config::{self, AppConfig},
    pipeline::PipelineRegistry,
    EventBus, Recorder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TICK: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    let log_dir = config::ensure_app_data_dir()
        .map(|dir| dir.join(config::LOG_DIR))
        .unwrap_or_else(|_| std::path::PathBuf::from(config::LOG_DIR));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "iqtap.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,iqtap=debug")))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(std::path::PathBuf::from)
        .or_else(config::default_config_path)
        .context("No config path given and no app data directory available")?;
    let seconds: u64 = match args.next() {
        Some(s) => s.parse().context("Duration must be a whole number of seconds")?,
        None => 10,
    };

    let config = AppConfig::load_or_default(&config_path);
    tracing::info!("Starting iqtap with {:?}", config_path);

    let source = MockSource::new(config.source.samplerate)
        .with_signal(MockSignal::Tone {
            offset_hz: config.source.tone_offset_hz,
            amplitude: 0.5,
        })
        .with_batch_size(config.source.batch_size);

    let registry = PipelineRegistry::with_builtin();
    let recorder = Recorder::new(config, Box::new(source), Arc::new(EventBus::new()))
        .context("Failed to set up recorder")?;

    recorder.start().context("Failed to start source")?;
    let definition = registry.get("baseband_capture")?;
    let record = recorder.start_processing(definition, serde_json::json!({}), None)?;
    tracing::info!(run_id = %record.run_id, "Capturing into {:?}", record.tmp_dir);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        recorder.handle_source_restart();
        std::thread::sleep(TICK);
    }

    if let Some(outcome) = recorder.stop_processing() {
        tracing::info!(
            run_id = %outcome.run_id,
            "Run {:?} at {:?} ({} file(s))",
            outcome.state,
            outcome.effective_dir,
            outcome.output_files.len()
        );
    }

    tracing::info!("Shutting down...");
    recorder.shutdown();
    Ok(())
}
