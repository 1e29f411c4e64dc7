//! Console Pipeline - Main Entry Point
//!
//! Runs one live event subscription through the pipeline and logs what the
//! console would render: flushed batches, stream lifecycle and heartbeat
//! refreshes.
//!
//! ```text
//! console-pipeline [--config PATH] [--stream ID] [EVENTS.ndjson]
//! console-pipeline --live --gateway GATEWAY_ID [--config PATH]
//! ```
//!
//! Without `--live`, events are replayed from the NDJSON file (or stdin).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use console_pipeline::constants::EVENTS_RECEIVE;
use console_pipeline::domain::config::PipelineConfig;
use console_pipeline::domain::event::RawEvent;
use console_pipeline::eventing::{Action, FilterRuleSet, OperationDescriptor, Phase};
use console_pipeline::helpers::{default_config_path, is_development};
use console_pipeline::services::event_source::parse_line;
use console_pipeline::services::{
    ApiClient, ChannelEventSource, EventSource, EventStreamController, HttpEventSource, RecencyTracker,
    RequestProcessor, Store, StreamOptions,
};
use console_pipeline::state::{ConsoleState, EventsState};
use console_pipeline::utils::storage::FileStorage;

const STATISTICS_OPERATION: &str = "GET_GATEWAY_CONNECTION_STATS";

#[derive(Debug, Parser)]
#[command(name = "console-pipeline")]
#[command(about = "Run a live event subscription through the console pipeline", long_about = None)]
struct Args {
    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stream id (defaults to `gateway:<ID>` or `replay`)
    #[arg(long)]
    stream: Option<String>,

    /// Gateway to subscribe to
    #[arg(long)]
    gateway: Option<String>,

    /// Stream from the backend instead of replaying a file
    #[arg(long, requires = "gateway")]
    live: bool,

    /// NDJSON events to replay (stdin when absent)
    events: Option<PathBuf>,
}

impl Args {
    fn stream_id(&self) -> String {
        match (&self.stream, &self.gateway) {
            (Some(stream), _) => stream.clone(),
            (None, Some(gateway)) => format!("gateway:{gateway}"),
            (None, None) => "replay".to_string(),
        }
    }

    fn identifiers(&self) -> Vec<Value> {
        self.gateway
            .iter()
            .map(|id| json!({ "gateway_ids": { "gateway_id": id } }))
            .collect()
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default_level = if is_development() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "console-pipeline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

/// Gateway id of the entity an event belongs to
fn gateway_of(event: &RawEvent) -> Option<&str> {
    event
        .identifiers
        .iter()
        .find_map(|ids| ids.pointer("/gateway_ids/gateway_id").and_then(Value::as_str))
}

fn log_action(action: &Action) {
    if action.kind == EVENTS_RECEIVE {
        let events = action
            .payload
            .as_ref()
            .and_then(|p| p.get("events"))
            .and_then(Value::as_array);
        let names: Vec<&str> = events
            .into_iter()
            .flatten()
            .filter_map(|e| e.get("name").and_then(Value::as_str))
            .collect();
        info!("Batch of {}: {}", names.len(), names.join(", "));
        return;
    }
    match (action.phase(), &action.error) {
        (Some(Phase::Failure), Some(error)) => warn!("{}: {}", action.kind, error),
        _ => info!("{}", action.kind),
    }
}

async fn replay(
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    tx: mpsc::UnboundedSender<console_pipeline::Result<RawEvent>>,
) -> anyhow::Result<usize> {
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Some(Ok(event)) => {
                tx.send(Ok(event)).map_err(|_| anyhow!("event stream closed"))?;
                count += 1;
            }
            Some(Err(e)) => warn!("Skipping line: {}", e),
            None => {}
        }
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = PipelineConfig::load_or_default(&config_path)?;
    let _guard = init_tracing(config.log_dir.as_deref());

    info!(config = ?config_path, "Starting console pipeline...");

    let store = Store::new(ConsoleState {
        events: EventsState::with_capacity(config.stream.capacity),
        ..ConsoleState::default()
    });
    let mut actions = store.subscribe();
    let logger = tokio::spawn(async move {
        while let Ok(action) = actions.recv().await {
            log_action(&action);
        }
    });

    let statistics = OperationDescriptor::new(STATISTICS_OPERATION);
    let replay_source = Arc::new(ChannelEventSource::new());
    let replay_tx = replay_source.connect();
    let source: Arc<dyn EventSource> = if args.live {
        let api = ApiClient::new(&config.api)?;
        store.add_middleware(RequestProcessor::new(
            statistics.clone(),
            api.effect(Method::GET, "/gs/gateways/{gateway_id}/connection/stats"),
        ));
        Arc::new(HttpEventSource::new(api))
    } else {
        replay_source.clone()
    };

    let stream_id = args.stream_id();
    let tracker = RecencyTracker::new(Arc::new(FileStorage::in_data_dir()?), config.recency.clone())?;
    tracker.track_access("stream", &stream_id)?;

    let options = StreamOptions::new(stream_id.as_str(), args.identifiers())
        .filters(FilterRuleSet::compile(&config.stream.filters)?)
        .heartbeat(FilterRuleSet::compile(&config.stream.heartbeat)?)
        .buffer(config.buffer.into())
        .tail(config.stream.tail);
    let fallback_gateway = args.gateway.clone().unwrap_or_default();
    let controller = EventStreamController::new(store.clone(), source);
    let handle = controller.open(options, move |event: &RawEvent| {
        let gateway_id = gateway_of(event).unwrap_or(&fallback_gateway);
        statistics.request(json!({ "gateway_id": gateway_id }))
    });

    if args.live {
        tokio::signal::ctrl_c().await?;
        handle.stop().await;
    } else {
        let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.events {
            Some(path) => Box::new(BufReader::new(
                tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            )),
            None => Box::new(BufReader::new(tokio::io::stdin())),
        };
        let count = replay(reader, replay_tx).await?;
        info!("Replayed {} events", count);
        handle.join().await;
    }

    let visible = store.select(|s| s.events.stream(&stream_id).map_or(0, |st| st.events.len()));
    info!("Stream {} holds {} events", stream_id, visible);
    for entity in tracker.top_n()? {
        info!("Frequently visited: {} ({:.3})", entity.key, entity.score);
    }

    logger.abort();
    Ok(())
}
