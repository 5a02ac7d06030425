//! Inputs supplied by the host: where actions come from and where state is read.

use std::sync::{Arc, RwLock};

use async_stream::stream;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::warn;

use crate::action::Action;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A hot stream of dispatched actions.
///
/// Each call to `actions` starts a new subscription. Actions dispatched
/// before the call are not replayed.
pub trait ActionSource<A>: Send + Sync {
    fn actions(&self) -> BoxStream<'static, A>;
}

/// A container whose current value can be read at any instant.
///
/// Read-only from the effects' point of view.
pub trait StateSource<S>: Send + Sync + 'static {
    fn snapshot(&self) -> S;
}

// ---------------------------------------------------------------------------
// Action sources
// ---------------------------------------------------------------------------

impl<A: Action> ActionSource<A> for broadcast::Sender<A> {
    fn actions(&self) -> BoxStream<'static, A> {
        broadcast_actions(self.subscribe())
    }
}

impl<A, T> ActionSource<A> for Arc<T>
where
    T: ActionSource<A> + ?Sized,
{
    fn actions(&self) -> BoxStream<'static, A> {
        (**self).actions()
    }
}

/// Turn a broadcast receiver into a stream. Ends when every sender is gone.
///
/// A lagging receiver skips the actions it missed and keeps going.
pub(crate) fn broadcast_actions<A: Action>(
    mut rx: broadcast::Receiver<A>,
) -> BoxStream<'static, A> {
    stream! {
        loop {
            match rx.recv().await {
                Ok(action) => {
                    yield action;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Action subscriber lagged, dropped actions");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// State sources
// ---------------------------------------------------------------------------

impl<S: Clone + Send + Sync + 'static> StateSource<S> for watch::Receiver<S> {
    fn snapshot(&self) -> S {
        self.borrow().clone()
    }
}

impl<S: Clone + Send + Sync + 'static> StateSource<S> for watch::Sender<S> {
    fn snapshot(&self) -> S {
        self.borrow().clone()
    }
}

impl<S: Clone + Send + Sync + 'static> StateSource<S> for RwLock<S> {
    fn snapshot(&self) -> S {
        // A poisoned lock still holds the last written state.
        match self.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl<S, T> StateSource<S> for Arc<T>
where
    T: StateSource<S> + ?Sized,
{
    fn snapshot(&self) -> S {
        (**self).snapshot()
    }
}

/// State read through a closure. Built with [`state_fn`].
#[derive(Clone)]
pub struct StateFn<F>(F);

/// Use any `Fn() -> S` as a state source.
pub fn state_fn<S, F>(f: F) -> StateFn<F>
where
    F: Fn() -> S + Send + Sync + 'static,
{
    StateFn(f)
}

impl<S, F> StateSource<S> for StateFn<F>
where
    F: Fn() -> S + Send + Sync + 'static,
{
    fn snapshot(&self) -> S {
        (self.0)()
    }
}

// ---------------------------------------------------------------------------
// Stream helpers
// ---------------------------------------------------------------------------

/// Keep only actions whose type tag equals `action_type`.
pub fn of_type<A: Action>(
    actions: BoxStream<'static, A>,
    action_type: impl Into<String>,
) -> BoxStream<'static, A> {
    let action_type = action_type.into();
    actions
        .filter(move |action| future::ready(action.action_type() == action_type))
        .boxed()
}

/// Pair each action with the state snapshot taken when the action is pulled.
pub fn with_latest_from<A, S, St>(
    actions: BoxStream<'static, A>,
    state: Arc<St>,
) -> BoxStream<'static, (A, S)>
where
    A: Action,
    S: Send + 'static,
    St: StateSource<S> + ?Sized,
{
    actions
        .map(move |action| {
            let snapshot = state.snapshot();
            (action, snapshot)
        })
        .boxed()
}
