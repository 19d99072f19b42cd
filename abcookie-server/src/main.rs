use std::path::PathBuf;
use std::sync::Arc;

use abcookie::{AssignmentEngine, ChannelReporter, Reporter, Settings};
use abcookie_http::AppState;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REPORT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "abcookie")]
struct Cli {
    /// Directory containing experiments.json
    #[arg(long, env = "ABCOOKIE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Overrides ABCOOKIE_BIND_ADDR
    #[arg(long)]
    bind_addr: Option<String>,

    /// Refuse to start when any experiment fails validation
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load_or_default(&cli.data_dir);

    let engine = if cli.strict {
        AssignmentEngine::from_settings_strict(&settings)?
    } else {
        let (engine, rejected) = AssignmentEngine::from_settings(&settings);
        if !rejected.is_empty() {
            tracing::warn!(
                "{} experiment(s) disabled by configuration errors",
                rejected.len()
            );
        }
        engine
    };
    tracing::info!("{} experiment(s) active", engine.experiments().len());

    let reporter: Option<Arc<dyn Reporter>> = if settings.tracking_id.is_some() {
        let (reporter, rx) = ChannelReporter::new(REPORT_CHANNEL_CAPACITY);
        abcookie_http::spawn_report_logger(rx);
        Some(Arc::new(reporter))
    } else {
        None
    };

    let bind_addr = cli.bind_addr.unwrap_or_else(|| settings.bind_addr.clone());
    let state = Arc::new(AppState { engine, reporter });
    abcookie_http::serve(state, &bind_addr).await?;
    Ok(())
}
