use clap::Parser;
use fieldsync::{config, worker};
use color_eyre::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Offline resilience worker for the field-sales app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the version tag to serve
  #[arg(short, long)]
  version_tag: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override version tag if specified on command line
  let config = if let Some(version_tag) = args.version_tag {
    config::Config {
      version_tag,
      ..config
    }
  } else {
    config
  };

  let probe_url = config.server_url()?;
  let (mut worker, tx) = worker::Worker::new(config)?;
  worker::spawn_connectivity_probe(tx, probe_url, Duration::from_secs(30));

  worker.run().await
}

/// Log to a rolling file under the data directory, or stderr without one.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  if let Some(data_dir) = dirs::data_dir() {
    let log_dir = data_dir.join("fieldsync").join("logs");
    if std::fs::create_dir_all(&log_dir).is_ok() {
      let appender = tracing_appender::rolling::daily(log_dir, "fieldsync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      return Some(guard);
    }
  }

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
  None
}
