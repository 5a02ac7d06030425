//! The stream combinators behind every effect.
//!
//! `ordered` runs one slot at a time in arrival order, `keyed_latest` runs one
//! slot per key and lets a newer pair supersede an in-flight one.
//! `run_with_error_handling` turns a single pair into a slot's output.
//!
//! Both combinators drain the upstream eagerly while slots are running, so
//! whatever the upstream attaches at pull time (a state snapshot, for
//! instance) reflects arrival order rather than execution order.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;

use async_stream::stream;
use futures::stream::{BoxStream, Fuse, Stream, StreamExt};
use tokio_stream::StreamMap;
use tracing::{debug, error, warn};

use crate::action::Action;
use crate::error::{EffectError, Result};
use crate::outcome::Outcome;

/// Output of an effect: actions for the host to dispatch.
///
/// An `Err` item is terminal.
pub type EffectStream<A> = BoxStream<'static, Result<A>>;

// ---------------------------------------------------------------------------
// Error handling for a single slot
// ---------------------------------------------------------------------------

/// Run one `(action, state)` pair, recovering from its failure.
///
/// `run` failing synchronously hands its error straight to `recover`. A
/// stream that fails part-way keeps what it already emitted; the rest is
/// dropped and `recover`'s output follows. The error given to `recover` is
/// the one `run` produced, untouched.
pub fn run_with_error_handling<A, S, R, E>(
    action: A,
    state: S,
    run: &R,
    recover: &Arc<E>,
) -> EffectStream<A>
where
    A: Action,
    R: Fn(&A, &S) -> anyhow::Result<Outcome<A>> + ?Sized,
    E: Fn(&A, anyhow::Error) -> Outcome<A> + Send + Sync + ?Sized + 'static,
{
    let outcome = match run(&action, &state) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(
                action_type = action.action_type(),
                error = %err,
                "Effect run failed, recovering"
            );
            let recovered = recover(&action, err);
            return recovery_stream(action.action_type().to_string(), recovered);
        }
    };

    let recover = Arc::clone(recover);
    let mut produced = outcome.into_stream();

    stream! {
        while let Some(item) = produced.next().await {
            match item {
                Ok(result) => {
                    yield Ok(result);
                }
                Err(err) => {
                    warn!(
                        action_type = action.action_type(),
                        error = %err,
                        "Effect stream failed, recovering"
                    );
                    let recovered = recover(&action, err);
                    let mut recovery = recovery_stream(action.action_type().to_string(), recovered);
                    while let Some(item) = recovery.next().await {
                        yield item;
                    }
                    break;
                }
            }
        }
    }
    .boxed()
}

/// Normalize a recovery outcome. A failure inside it is not recovered again.
fn recovery_stream<A: Action>(action_type: String, outcome: Outcome<A>) -> EffectStream<A> {
    let mut produced = outcome.into_stream();

    stream! {
        while let Some(item) = produced.next().await {
            match item {
                Ok(result) => {
                    yield Ok(result);
                }
                Err(source) => {
                    error!(
                        action_type = action_type.as_str(),
                        error = %source,
                        "Recovery failed, ending effect"
                    );
                    yield Err(EffectError::Recovery {
                        action_type: action_type.clone(),
                        source,
                    });
                    break;
                }
            }
        }
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// Scheduling policies
// ---------------------------------------------------------------------------

enum Step<P, T> {
    Upstream(Option<P>),
    Output(Option<T>),
}

/// Wait for whichever comes first, preferring new upstream items.
async fn next_step<P, T, U, O>(
    upstream: &mut U,
    output: &mut O,
    upstream_done: bool,
) -> Step<P, T>
where
    U: Stream<Item = P> + Unpin,
    O: Stream<Item = T> + Unpin,
{
    tokio::select! {
        biased;
        next = upstream.next(), if !upstream_done => Step::Upstream(next),
        item = output.next() => Step::Output(item),
    }
}

/// Concatenate slot outputs in arrival order, one slot at a time.
///
/// `start` is called for a pair only once the previous slot has finished.
/// Pairs arriving meanwhile wait in a FIFO queue. Ends when the upstream has
/// ended and the queue is drained, or right after an `Err` item.
pub fn ordered<P, A, F>(pairs: BoxStream<'static, P>, mut start: F) -> EffectStream<A>
where
    P: Send + 'static,
    A: Send + 'static,
    F: FnMut(P) -> EffectStream<A> + Send + 'static,
{
    let mut upstream: Fuse<BoxStream<'static, P>> = pairs.fuse();

    stream! {
        let mut pending: VecDeque<P> = VecDeque::new();
        let mut current: Option<EffectStream<A>> = None;
        let mut upstream_done = false;

        loop {
            if current.is_none() {
                match pending.pop_front() {
                    Some(pair) => current = Some(start(pair)),
                    None if upstream_done => break,
                    None => {}
                }
            }

            let step = match current.as_mut() {
                Some(slot) => next_step(&mut upstream, slot, upstream_done).await,
                None => Step::Upstream(upstream.next().await),
            };

            match step {
                Step::Upstream(Some(pair)) => {
                    pending.push_back(pair);
                    if current.is_some() {
                        debug!(queued = pending.len(), "Slot busy, queued pair");
                    }
                }
                Step::Upstream(None) => upstream_done = true,
                Step::Output(Some(Ok(action))) => {
                    yield Ok(action);
                }
                Step::Output(Some(Err(err))) => {
                    yield Err(err);
                    break;
                }
                Step::Output(None) => current = None,
            }
        }
    }
    .boxed()
}

/// Run one slot per key, concurrently across keys.
///
/// A new pair for a key whose slot is still producing drops that slot (its
/// remaining output never appears) and starts a fresh one immediately. Ends
/// when the upstream has ended and every slot has finished, or right after an
/// `Err` item.
pub fn keyed_latest<P, K, A, KF, F>(
    pairs: BoxStream<'static, P>,
    mut key_of: KF,
    mut start: F,
) -> EffectStream<A>
where
    P: Send + 'static,
    K: Hash + Eq + Clone + Unpin + Send + std::fmt::Debug + 'static,
    A: Send + 'static,
    KF: FnMut(&P) -> K + Send + 'static,
    F: FnMut(P) -> EffectStream<A> + Send + 'static,
{
    let mut upstream: Fuse<BoxStream<'static, P>> = pairs.fuse();

    stream! {
        let mut slots: StreamMap<K, EffectStream<A>> = StreamMap::new();
        let mut upstream_done = false;

        loop {
            let step = if slots.is_empty() {
                if upstream_done {
                    break;
                }
                Step::Upstream(upstream.next().await)
            } else {
                next_step(&mut upstream, &mut slots, upstream_done).await
            };

            match step {
                Step::Upstream(Some(pair)) => {
                    let key = key_of(&pair);
                    let slot = start(pair);
                    if slots.insert(key.clone(), slot).is_some() {
                        debug!(key = ?key, "Superseded in-flight slot");
                    }
                }
                Step::Upstream(None) => upstream_done = true,
                Step::Output(Some((_, Ok(action)))) => {
                    yield Ok(action);
                }
                Step::Output(Some((key, Err(err)))) => {
                    debug!(key = ?key, "Slot failed fatally");
                    yield Err(err);
                    break;
                }
                Step::Output(None) => {}
            }
        }
    }
    .boxed()
}
