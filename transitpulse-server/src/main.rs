mod config;

use std::error::Error;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transitpulse::prelude::GraphMessage;
use transitpulse::{DeliveryEnd, TransportEngine, deliver};

use crate::config::{ServerConfig, StreamConfig};

/// Live multimodal transport graph daemon
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "transitpulse.toml")]
    config: PathBuf,
    /// GTFS feed overriding `[feed] feed_path`
    #[arg(long)]
    feed: Option<PathBuf>,
    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log: String,
}

type EventWriter = Arc<Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ServerConfig::from_file(&cli.config)?;
    if let Some(feed) = cli.feed {
        config.feed.feed_path = feed;
    }
    config.validate()?;
    info!(config = %cli.config.display(), "Starting transitpulse");

    let engine = TransportEngine::load(config.feed.clone()).await?;

    let observer = match &config.stream.events_path {
        Some(path) => Some(start_events_observer(engine.clone(), config.stream.clone(), path).await?),
        None => None,
    };

    let worker = match config.incidents.build_source()? {
        Some(source) => Some(engine.start_impact_worker(source, &config.impact)?),
        None => {
            info!("No incident source configured, impact worker disabled");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    if let Some(worker) = worker {
        worker.shutdown().await;
    }
    if let Some(observer) = observer {
        observer.abort();
    }
    Ok(())
}

/// Writes the snapshot/delta stream as JSON lines. A lagging observer
/// subscribes again and starts over from a fresh snapshot.
async fn start_events_observer(
    engine: TransportEngine,
    stream: StreamConfig,
    path: &Path,
) -> Result<JoinHandle<()>, Box<dyn Error>> {
    let sink: Box<dyn AsyncWrite + Send + Unpin> = if path == Path::new("-") {
        Box::new(tokio::io::stdout())
    } else {
        Box::new(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?,
        )
    };
    let writer: EventWriter = Arc::new(Mutex::new(BufWriter::new(sink)));
    let modes = stream.modes.clone();
    // Fail early on unknown modes
    let mut subscription = engine.subscribe(modes.as_deref(), stream.queue_capacity)?;
    info!(events = %path.display(), "Streaming graph events");

    Ok(tokio::spawn(async move {
        loop {
            let writer = Arc::clone(&writer);
            let end = deliver(subscription, move |message| write_message(Arc::clone(&writer), message)).await;
            if end != DeliveryEnd::Lagged {
                info!(?end, "Event stream finished");
                return;
            }
            subscription = match engine.subscribe(modes.as_deref(), stream.queue_capacity) {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(error = %e, "Cannot resubscribe event stream");
                    return;
                }
            };
            warn!("Event stream resubscribed after falling behind");
        }
    }))
}

async fn write_message(writer: EventWriter, message: GraphMessage) -> ControlFlow<()> {
    let mut line = match serde_json::to_vec(&message) {
        Ok(line) => line,
        Err(e) => {
            error!(error = %e, "Cannot serialize graph event");
            return ControlFlow::Break(());
        }
    };
    line.push(b'\n');

    let mut writer = writer.lock().await;
    if let Err(e) = write_line(&mut *writer, &line).await {
        error!(error = %e, "Cannot write graph event");
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}

async fn write_line(writer: &mut (impl AsyncWrite + Unpin), line: &[u8]) -> std::io::Result<()> {
    writer.write_all(line).await?;
    writer.flush().await
}
