//! The three effect helpers.

use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::action::Action;
use crate::operators::{keyed_latest, ordered, run_with_error_handling, EffectStream};
use crate::outcome::Outcome;
use crate::sources::{of_type, with_latest_from, ActionSource, StateSource};

/// `run(action, state)`: the side effect. `Err` is a synchronous failure.
pub type RunFn<A, S> = Arc<dyn Fn(&A, &S) -> anyhow::Result<Outcome<A>> + Send + Sync>;

/// `on_error(action, error)`: maps a failed run to output actions.
pub type RecoverFn<A> = Arc<dyn Fn(&A, anyhow::Error) -> Outcome<A> + Send + Sync>;

/// `undo_action(action, error)`: the compensating action for an optimistic update.
pub type UndoFn<A> = Arc<dyn Fn(&A, anyhow::Error) -> A + Send + Sync>;

/// `id(action, state)`: partition key for `fetch`.
pub type KeyFn<A, S, K> = Arc<dyn Fn(&A, &S) -> K + Send + Sync>;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

pub struct PessimisticUpdateOpts<A, S> {
    pub run: RunFn<A, S>,
    pub on_error: RecoverFn<A>,
}

impl<A, S> PessimisticUpdateOpts<A, S> {
    pub fn new<R, E>(run: R, on_error: E) -> Self
    where
        R: Fn(&A, &S) -> anyhow::Result<Outcome<A>> + Send + Sync + 'static,
        E: Fn(&A, anyhow::Error) -> Outcome<A> + Send + Sync + 'static,
    {
        Self {
            run: Arc::new(run),
            on_error: Arc::new(on_error),
        }
    }
}

pub struct OptimisticUpdateOpts<A, S> {
    pub run: RunFn<A, S>,
    pub undo_action: UndoFn<A>,
}

impl<A, S> OptimisticUpdateOpts<A, S> {
    pub fn new<R, U>(run: R, undo_action: U) -> Self
    where
        R: Fn(&A, &S) -> anyhow::Result<Outcome<A>> + Send + Sync + 'static,
        U: Fn(&A, anyhow::Error) -> A + Send + Sync + 'static,
    {
        Self {
            run: Arc::new(run),
            undo_action: Arc::new(undo_action),
        }
    }
}

/// Options for `fetch`. Without `id` every pair is run in order; with one,
/// pairs are grouped by key. `K` is `()` until [`FetchOpts::with_id`] is called.
pub struct FetchOpts<A, S, K = ()> {
    pub id: Option<KeyFn<A, S, K>>,
    pub run: RunFn<A, S>,
    pub on_error: RecoverFn<A>,
}

impl<A, S> FetchOpts<A, S, ()> {
    pub fn new<R, E>(run: R, on_error: E) -> Self
    where
        R: Fn(&A, &S) -> anyhow::Result<Outcome<A>> + Send + Sync + 'static,
        E: Fn(&A, anyhow::Error) -> Outcome<A> + Send + Sync + 'static,
    {
        Self {
            id: None,
            run: Arc::new(run),
            on_error: Arc::new(on_error),
        }
    }
}

impl<A, S, K> FetchOpts<A, S, K> {
    pub fn with_id<K2, F>(self, id: F) -> FetchOpts<A, S, K2>
    where
        F: Fn(&A, &S) -> K2 + Send + Sync + 'static,
    {
        FetchOpts {
            id: Some(Arc::new(id)),
            run: self.run,
            on_error: self.on_error,
        }
    }
}

// ---------------------------------------------------------------------------
// DataPersistence
// ---------------------------------------------------------------------------

/// Effect helpers bound to an action source and a state container.
///
/// Each helper subscribes to the source when called and returns a lazy
/// stream of output actions; nothing runs until the stream is polled.
/// Dispatching the output back into the source is left to the host (see
/// [`spawn_effect`](crate::spawn_effect)).
pub struct DataPersistence<A, S, Src, St>
where
    A: Action,
    S: Clone + Send + Sync + 'static,
    Src: ActionSource<A>,
    St: StateSource<S>,
{
    actions: Src,
    state: Arc<St>,
    _phantom: PhantomData<fn() -> (A, S)>,
}

impl<A, S, Src, St> DataPersistence<A, S, Src, St>
where
    A: Action,
    S: Clone + Send + Sync + 'static,
    Src: ActionSource<A>,
    St: StateSource<S>,
{
    pub fn new(actions: Src, state: St) -> Self {
        Self {
            actions,
            state: Arc::new(state),
            _phantom: PhantomData,
        }
    }

    /// Ordered, one operation in flight, failures mapped through `on_error`.
    ///
    /// For operations that must hit the backend before anything changes
    /// locally. No two of them ever race.
    pub fn pessimistic_update(
        &self,
        action_type: &str,
        opts: PessimisticUpdateOpts<A, S>,
    ) -> EffectStream<A> {
        let PessimisticUpdateOpts { run, on_error } = opts;
        ordered(self.pairs(action_type), slot_runner(run, on_error))
    }

    /// Same ordering as [`pessimistic_update`](Self::pessimistic_update), but a
    /// failure always yields exactly one action: `undo_action(action, error)`.
    pub fn optimistic_update(
        &self,
        action_type: &str,
        opts: OptimisticUpdateOpts<A, S>,
    ) -> EffectStream<A> {
        let OptimisticUpdateOpts { run, undo_action } = opts;
        let recover: RecoverFn<A> = Arc::new(move |action: &A, err: anyhow::Error| {
            Outcome::Action(undo_action(action, err))
        });
        ordered(self.pairs(action_type), slot_runner(run, recover))
    }

    /// Load data.
    ///
    /// Without `id`, ordered like [`pessimistic_update`](Self::pessimistic_update).
    /// With `id`, pairs for different keys run concurrently and a newer pair
    /// for a key abandons the in-flight one, so only the latest result per
    /// key is emitted.
    pub fn fetch<K>(&self, action_type: &str, opts: FetchOpts<A, S, K>) -> EffectStream<A>
    where
        K: Hash + Eq + Clone + Unpin + Send + std::fmt::Debug + 'static,
    {
        let FetchOpts { id, run, on_error } = opts;
        let pairs = self.pairs(action_type);
        match id {
            None => ordered(pairs, slot_runner(run, on_error)),
            Some(id) => keyed_latest(
                pairs,
                move |(action, state): &(A, S)| id(action, state),
                slot_runner(run, on_error),
            ),
        }
    }

    /// Current state, as a newly arriving action would see it.
    pub fn snapshot(&self) -> S {
        self.state.snapshot()
    }

    fn pairs(&self, action_type: &str) -> futures::stream::BoxStream<'static, (A, S)> {
        let matching = of_type(self.actions.actions(), action_type);
        with_latest_from(matching, Arc::clone(&self.state))
    }
}

fn slot_runner<A, S>(
    run: RunFn<A, S>,
    recover: RecoverFn<A>,
) -> impl FnMut((A, S)) -> EffectStream<A> + Send + 'static
where
    A: Action,
    S: Send + Sync + 'static,
{
    move |(action, state)| {
        debug!(action_type = action.action_type(), "Running effect slot");
        run_with_error_handling(action, state, &*run, &recover)
    }
}
