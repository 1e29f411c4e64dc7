//! End-to-end pipeline tests

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use console_pipeline::RequestError;
use console_pipeline::domain::event::RawEvent;
use console_pipeline::eventing::{
    Action, BufferConfig, ConnectionReactor, EventBuffer, FilterRuleSet, OperationDescriptor, Phase,
};
use console_pipeline::services::{
    ChannelEventSource, Dispatch, EffectContext, EffectResult, EventStreamController, RecencyConfig,
    RecencyTracker, RequestProcessor, Store, StreamOptions,
};
use console_pipeline::state::{CollectionSpec, ConsoleState};
use console_pipeline::utils::storage::FileStorage;

#[derive(Default)]
struct Recorder(Mutex<Vec<Action>>);

impl Dispatch for Recorder {
    fn dispatch(&self, action: Action) {
        self.0.lock().push(action);
    }
}

fn effect<F, Fut>(f: F) -> F
where
    F: Fn(EffectContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EffectResult> + Send + 'static,
{
    f
}

#[tokio::test(start_paused = true)]
async fn test_three_events_one_flush_one_refresh() {
    let recorder = Arc::new(Recorder::default());
    let heartbeat = FilterRuleSet::compile(["gs.status.receive", "gs.gateway.*"]).expect("patterns");
    let mut reactor = ConnectionReactor::new(heartbeat, recorder.clone(), |event: &RawEvent| {
        Action::new("GET_GATEWAY_CONNECTION_STATS_REQUEST").with_payload(json!({ "trigger": event.name }))
    });

    let flushes: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
    let sink = flushes.clone();
    let buffer = EventBuffer::with_config(
        move |batch: Vec<Arc<RawEvent>>| {
            sink.lock().push(batch.iter().map(|e| e.name.clone()).collect());
            reactor.observe_batch(&batch);
        },
        BufferConfig {
            max_items: 20,
            delay: Duration::from_millis(200),
        },
    );

    for name in ["gs.up.receive", "gs.status.receive", "as.up.data.forward"] {
        buffer.push(Arc::new(RawEvent::new(name))).expect("push");
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(
        *flushes.lock(),
        vec![vec!["gs.up.receive", "gs.status.receive", "as.up.data.forward"]]
    );
    let refreshes = recorder.0.lock();
    assert_eq!(refreshes.len(), 1);
    assert_eq!(refreshes[0].payload, Some(json!({ "trigger": "gs.status.receive" })));
}

#[tokio::test(start_paused = true)]
async fn test_stream_controller_end_to_end() {
    let store = Store::new(ConsoleState::default());
    let stats = OperationDescriptor::new("GET_GATEWAY_CONNECTION_STATS");
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    store.add_middleware(RequestProcessor::new(
        stats.clone(),
        effect(move |ctx: EffectContext| {
            seen.lock().push(ctx.payload.clone());
            async { Ok(json!({ "uplink_count": 1 })) }
        }),
    ));

    let source = Arc::new(ChannelEventSource::new());
    let tx = source.connect();
    let controller = EventStreamController::new(store.clone(), source);
    let options = StreamOptions::new("gateway:gtw-1", vec![json!({ "gateway_ids": { "gateway_id": "gtw-1" } })])
        .heartbeat(FilterRuleSet::compile(["gs.status.receive"]).expect("patterns"));
    let handle = controller.open(options, move |_event: &RawEvent| stats.request(json!({ "gateway_id": "gtw-1" })));

    for name in ["gs.up.receive", "gs.status.receive", "as.up.data.forward"] {
        tx.send(Ok(RawEvent::new(name))).expect("send");
    }
    tokio::time::sleep(Duration::from_millis(250)).await;
    handle.stop().await;

    assert_eq!(*calls.lock(), vec![json!({ "gateway_id": "gtw-1" })]);
    let (events, fetching) = store.select(|s| {
        (
            s.events.stream("gateway:gtw-1").map_or(0, |st| st.events.len()),
            s.status.is_fetching("GET_GATEWAY_CONNECTION_STATS"),
        )
    });
    assert_eq!(events, 3);
    assert!(!fetching);
}

#[tokio::test]
async fn test_promise_matches_terminal_action() {
    let store = Store::new(ConsoleState::default());
    let op = OperationDescriptor::new("UPDATE_GATEWAY").attach_promise();
    store.add_middleware(RequestProcessor::new(
        op.clone(),
        effect(|ctx: EffectContext| async move {
            match ctx.payload.get("gateway_id").and_then(Value::as_str) {
                Some("missing") => Err(RequestError::with_status(404, "not found")),
                _ => Ok(ctx.payload),
            }
        }),
    ));
    let mut rx = store.subscribe();
    let dispatcher = store.dispatcher();

    let ok = dispatcher
        .dispatch(op.request(json!({ "gateway_id": "gtw-1" })))
        .expect("promise");
    let missing = dispatcher
        .dispatch(op.request(json!({ "gateway_id": "missing" })))
        .expect("promise");

    assert_eq!(ok.await.expect("resolved"), json!({ "gateway_id": "gtw-1" }));
    let err = missing.await.expect_err("rejected");
    assert_eq!(err.request_error().and_then(|e| e.status), Some(404));

    let mut terminal = Vec::new();
    while terminal.len() < 2 {
        let action = rx.recv().await.expect("action");
        if action.phase().is_some_and(Phase::is_terminal) {
            terminal.push(action);
        }
    }
    for action in terminal {
        let origin = action.meta.origin.clone().expect("origin");
        match action.phase() {
            Some(Phase::Success) => assert_eq!(origin["gateway_id"], "gtw-1"),
            Some(Phase::Failure) => assert_eq!(origin["gateway_id"], "missing"),
            other => panic!("unexpected phase {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_stale_list_result_is_ignored() {
    let list = OperationDescriptor::new("GET_APPLICATIONS_LIST").attach_promise();
    let store = Store::new(ConsoleState::with_collections([CollectionSpec::new(
        "applications",
        "/ids/application_id",
        list.clone(),
    )]));

    // The first request answers only after the second one has settled
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release = Arc::new(Mutex::new(Some(release_rx)));
    store.add_middleware(RequestProcessor::new(
        list.clone(),
        effect(move |ctx: EffectContext| {
            let gate = if ctx.seq == Some(1) { release.lock().take() } else { None };
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                let id = if ctx.seq == Some(1) { "old" } else { "new" };
                Ok(json!({ "entities": [{ "ids": { "application_id": id } }], "totalCount": 1 }))
            }
        }),
    ));

    let query = json!({ "page": 1, "limit": 20 });
    let dispatcher = store.dispatcher();
    let slow = dispatcher.dispatch(list.request(query.clone())).expect("promise");
    let fast = dispatcher.dispatch(list.request(query.clone())).expect("promise");

    fast.await.expect("fast");
    release_tx.send(()).expect("release");
    slow.await.expect("slow");

    let page = store.select(|s| s.page("applications", &query)).expect("collection");
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0]["ids"]["application_id"], "new");
    assert!(!page.fetching);
    assert!(store.select(|s| s.entity("applications", "old").is_none()));
}

#[test]
fn test_recency_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = RecencyConfig {
        decay_ms: 86_400_000.0,
        ..RecencyConfig::default()
    };

    {
        let tracker = RecencyTracker::new(Arc::new(FileStorage::new(dir.path()).expect("storage")), config.clone())
            .expect("tracker");
        for _ in 0..3 {
            tracker.track_access("gateway", "gtw-1").expect("track");
        }
        tracker.track_access("application", "app-1").expect("track");
    }

    let tracker = RecencyTracker::new(Arc::new(FileStorage::new(dir.path()).expect("storage")), config)
        .expect("tracker");
    let top = tracker.top_n().expect("top");
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].key, "gateway:gtw-1");
    assert_eq!(top[0].record.frequency, 3);
}
