//! Integration tests for `fetch`, with and without an id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use data_persistence::{
    Action, ActionBus, AnyAction, DataPersistence, EffectError, EffectStream, FetchOpts, Outcome,
};
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::sync::{oneshot, watch};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn get_todo(id: u64, request: u64) -> AnyAction {
    AnyAction::new("GET_TODO").with("id", id).with("request", request)
}

fn field(action: &AnyAction, key: &str) -> u64 {
    action.get(key).and_then(|v| v.as_u64()).unwrap_or_default()
}

fn loaded(action: &AnyAction) -> AnyAction {
    AnyAction::new("TODO_LOADED")
        .with("id", field(action, "id"))
        .with("request", field(action, "request"))
}

fn load_failed(action: &AnyAction, err: anyhow::Error) -> Outcome<AnyAction> {
    Outcome::action(
        AnyAction::new("TODO_LOAD_FAILED")
            .with("id", field(action, "id"))
            .with("error", err.to_string()),
    )
}

fn by_id(action: &AnyAction, _state: &()) -> u64 {
    field(action, "id")
}

/// Hands out one gate per request number; the run waits on its gate.
#[derive(Clone, Default)]
struct Gates {
    waiting: Arc<Mutex<HashMap<u64, oneshot::Receiver<()>>>>,
    senders: Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>>,
}

impl Gates {
    fn arm(&self, request: u64) {
        let (tx, rx) = oneshot::channel();
        self.senders.lock().unwrap().insert(request, tx);
        self.waiting.lock().unwrap().insert(request, rx);
    }

    fn take(&self, request: u64) -> Option<oneshot::Receiver<()>> {
        self.waiting.lock().unwrap().remove(&request)
    }

    /// `false` when the run waiting on this gate has been dropped.
    fn open(&self, request: u64) -> bool {
        let sender = self.senders.lock().unwrap().remove(&request);
        sender.map(|tx| tx.send(()).is_ok()).unwrap_or(false)
    }
}

fn gated_run(
    gates: Gates,
) -> impl Fn(&AnyAction, &()) -> anyhow::Result<Outcome<AnyAction>> + Send + Sync + 'static {
    move |action: &AnyAction, _state: &()| {
        let gate = gates.take(field(action, "request"));
        let result = loaded(action);
        Ok(Outcome::future(async move {
            if let Some(gate) = gate {
                gate.await.map_err(|_| anyhow!("gate dropped"))?;
            }
            Ok(result)
        }))
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Drive `effect` to completion on its own task.
fn collect_all(
    mut effect: EffectStream<AnyAction>,
) -> tokio::task::JoinHandle<Vec<AnyAction>> {
    tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(item) = effect.next().await {
            out.push(item.unwrap());
        }
        out
    })
}

fn setup() -> (
    ActionBus<AnyAction>,
    DataPersistence<AnyAction, (), ActionBus<AnyAction>, watch::Receiver<()>>,
) {
    let bus = ActionBus::new();
    let (_state_tx, state_rx) = watch::channel(());
    (bus.clone(), DataPersistence::new(bus, state_rx))
}

// =========================================================================
// Keyed fetch
// =========================================================================

#[tokio::test]
async fn keyed_fetch_emits_one_result_per_id_and_only_the_latest_for_repeats() {
    let (bus, persistence) = setup();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let run_calls = calls.clone();

    let mut effect = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(
            move |action: &AnyAction, _state: &()| {
                run_calls.lock().unwrap().push(field(action, "request"));
                let result = loaded(action);
                Ok(Outcome::future(async move {
                    tokio::task::yield_now().await;
                    Ok(result)
                }))
            },
            load_failed,
        )
        .with_id(by_id),
    );

    bus.dispatch(get_todo(1, 1));
    bus.dispatch(get_todo(2, 2));
    bus.dispatch(get_todo(2, 3));

    let mut results: Vec<(u64, u64)> = Vec::new();
    for _ in 0..2 {
        let action = effect.next().await.unwrap().unwrap();
        assert_eq!(action.action_type(), "TODO_LOADED");
        results.push((field(&action, "id"), field(&action, "request")));
    }
    results.sort();
    assert_eq!(results, vec![(1, 1), (2, 3)]);

    // Every request was started, even the superseded one.
    assert_eq!(*calls.lock().unwrap(), vec![1, 2, 3]);

    drop(persistence);
    drop(bus);
    assert!(effect.next().await.is_none(), "superseded result must not appear");
}

#[tokio::test]
async fn superseded_request_is_dropped_not_awaited() {
    let (bus, persistence) = setup();
    let gates = Gates::default();
    gates.arm(1);
    gates.arm(2);

    let mut effect = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(gated_run(gates.clone()), load_failed).with_id(by_id),
    );

    bus.dispatch(get_todo(5, 1));
    bus.dispatch(get_todo(5, 2));
    assert!(gates.open(2));

    let latest = effect.next().await.unwrap().unwrap();
    assert_eq!(field(&latest, "request"), 2);

    // The first request's future was dropped when the second arrived.
    assert!(!gates.open(1));
}

#[tokio::test(start_paused = true)]
async fn superseded_result_never_arrives_later() {
    let (bus, persistence) = setup();
    let gates = Gates::default();
    gates.arm(1);

    let mut effect = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(gated_run(gates.clone()), load_failed).with_id(by_id),
    );

    bus.dispatch(get_todo(9, 1));
    bus.dispatch(get_todo(9, 2));

    let latest = effect.next().await.unwrap().unwrap();
    assert_eq!(field(&latest, "request"), 2);

    let late = tokio::time::timeout(Duration::from_secs(5), effect.next()).await;
    assert!(late.is_err(), "nothing else should be emitted, got {late:?}");
}

#[tokio::test]
async fn distinct_ids_run_concurrently() {
    let (bus, persistence) = setup();
    let gates = Gates::default();
    gates.arm(1);
    gates.arm(2);

    let mut effect = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(gated_run(gates.clone()), load_failed).with_id(by_id),
    );

    bus.dispatch(get_todo(1, 1));
    bus.dispatch(get_todo(2, 2));

    // Only the later request is released; it must not wait behind the first.
    assert!(gates.open(2));
    let first = effect.next().await.unwrap().unwrap();
    assert_eq!(field(&first, "id"), 2);

    assert!(gates.open(1));
    let second = effect.next().await.unwrap().unwrap();
    assert_eq!(field(&second, "id"), 1);
}

#[tokio::test]
async fn keyed_failure_is_recovered_per_id() {
    let (bus, persistence) = setup();

    let mut effect = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(
            |action: &AnyAction, _state: &()| match field(action, "id") {
                13 => Err(anyhow!("todo 13 is cursed")),
                _ => Ok(Outcome::action(loaded(action))),
            },
            load_failed,
        )
        .with_id(by_id),
    );

    bus.dispatch(get_todo(13, 1));
    bus.dispatch(get_todo(14, 2));

    let mut by_type = HashMap::new();
    for _ in 0..2 {
        let action = effect.next().await.unwrap().unwrap();
        by_type.insert(action.kind.clone(), action);
    }

    let failed = &by_type["TODO_LOAD_FAILED"];
    assert_eq!(failed.get("id"), Some(&json!(13)));
    assert_eq!(failed.get("error"), Some(&json!("todo 13 is cursed")));
    assert_eq!(by_type["TODO_LOADED"].get("id"), Some(&json!(14)));
}

#[tokio::test]
async fn keyed_failing_recovery_ends_the_stream() {
    let (bus, persistence) = setup();

    let mut effect = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(
            |_action: &AnyAction, _state: &()| Err(anyhow!("backend down")),
            |_action: &AnyAction, _err| {
                Outcome::stream(stream::iter(vec![Err(anyhow!("fallback down too"))]))
            },
        )
        .with_id(by_id),
    );

    bus.dispatch(get_todo(1, 1));

    match effect.next().await {
        Some(Err(EffectError::Recovery {
            action_type,
            source,
        })) => {
            assert_eq!(action_type, "GET_TODO");
            assert_eq!(source.to_string(), "fallback down too");
        }
        other => panic!("expected a recovery error, got {other:?}"),
    }

    // Later actions are never picked up once the stream has failed.
    bus.dispatch(get_todo(2, 2));
    assert!(effect.next().await.is_none());
}

#[tokio::test]
async fn keyed_slots_still_finish_after_upstream_ends() {
    let (bus, persistence) = setup();
    let gates = Gates::default();
    gates.arm(1);
    gates.arm(2);

    let effect = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(gated_run(gates.clone()), load_failed).with_id(by_id),
    );
    let collected = collect_all(effect);

    bus.dispatch(get_todo(1, 1));
    bus.dispatch(get_todo(2, 2));
    settle().await;

    drop(persistence);
    drop(bus);
    settle().await;

    // Both runs are still waiting, not dropped with the upstream.
    assert!(gates.open(2));
    assert!(gates.open(1));

    let mut ids: Vec<u64> = collected
        .await
        .unwrap()
        .iter()
        .map(|action| field(action, "id"))
        .collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
}

// =========================================================================
// Fetch without id
// =========================================================================

#[tokio::test]
async fn fetch_without_id_is_ordered_and_never_supersedes() {
    let (bus, persistence) = setup();
    let gates = Gates::default();
    gates.arm(1);

    let mut effect = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(gated_run(gates.clone()), load_failed),
    );

    bus.dispatch(get_todo(3, 1));
    bus.dispatch(get_todo(3, 2));
    bus.dispatch(get_todo(4, 3));

    // The first request holds everything behind it until released.
    assert!(gates.open(1));

    let mut requests = Vec::new();
    for _ in 0..3 {
        let action = effect.next().await.unwrap().unwrap();
        requests.push(field(&action, "request"));
    }
    assert_eq!(requests, vec![1, 2, 3]);
}

#[tokio::test]
async fn fetch_without_id_recovers_and_continues() {
    let (bus, persistence) = setup();

    let mut effect = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(
            |action: &AnyAction, _state: &()| {
                let id = field(action, "id");
                let result = loaded(action);
                Ok(Outcome::future(async move {
                    if id == 0 {
                        Err(anyhow!("no todo with id 0"))
                    } else {
                        Ok(result)
                    }
                }))
            },
            load_failed,
        ),
    );

    bus.dispatch(get_todo(0, 1));
    bus.dispatch(get_todo(8, 2));

    let failed = effect.next().await.unwrap().unwrap();
    let ok = effect.next().await.unwrap().unwrap();
    assert_eq!(failed.action_type(), "TODO_LOAD_FAILED");
    assert_eq!(failed.get("error"), Some(&json!("no todo with id 0")));
    assert_eq!(ok.action_type(), "TODO_LOADED");
    assert_eq!(field(&ok, "id"), 8);
}

#[tokio::test]
async fn fetch_without_id_drains_queue_after_upstream_ends() {
    let (bus, persistence) = setup();
    let gates = Gates::default();
    gates.arm(1);

    let effect = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(gated_run(gates.clone()), load_failed),
    );
    let collected = collect_all(effect);

    bus.dispatch(get_todo(6, 1));
    bus.dispatch(get_todo(7, 2));
    settle().await;

    drop(persistence);
    drop(bus);
    settle().await;

    // The in-flight run is still alive; the second is queued behind it.
    assert!(gates.open(1));

    let requests: Vec<u64> = collected
        .await
        .unwrap()
        .iter()
        .map(|action| field(action, "request"))
        .collect();
    assert_eq!(requests, vec![1, 2]);
}
