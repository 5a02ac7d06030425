//! Normalization of callback results into action streams.

use std::future::Future;

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};

/// What a `run`, `on_error` or `undo_action` callback produced.
///
/// Every variant normalizes to a stream of zero or more actions:
///
/// | variant   | stream                    |
/// |-----------|---------------------------|
/// | `None`    | empty                     |
/// | `Action`  | exactly that one action   |
/// | `Stream`  | used as-is                |
///
/// An `Err` item in a `Stream` is an asynchronous failure.
pub enum Outcome<A> {
    None,
    Action(A),
    Stream(BoxStream<'static, anyhow::Result<A>>),
}

impl<A: Send + 'static> Outcome<A> {
    pub fn none() -> Self {
        Outcome::None
    }

    pub fn action(action: A) -> Self {
        Outcome::Action(action)
    }

    pub fn stream<St>(stream: St) -> Self
    where
        St: Stream<Item = anyhow::Result<A>> + Send + 'static,
    {
        Outcome::Stream(stream.boxed())
    }

    /// A single asynchronous result. `Err` counts as an asynchronous failure.
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<A>> + Send + 'static,
    {
        Outcome::Stream(stream::once(fut).boxed())
    }

    /// Several already-known actions, emitted in order.
    pub fn actions(actions: impl IntoIterator<Item = A>) -> Self {
        let actions: Vec<_> = actions.into_iter().map(Ok).collect();
        Outcome::Stream(stream::iter(actions).boxed())
    }

    pub fn into_stream(self) -> BoxStream<'static, anyhow::Result<A>> {
        match self {
            Outcome::None => stream::empty().boxed(),
            Outcome::Action(action) => stream::once(future::ready(Ok(action))).boxed(),
            Outcome::Stream(stream) => stream,
        }
    }
}

impl<A> From<Option<A>> for Outcome<A> {
    fn from(action: Option<A>) -> Self {
        match action {
            Some(action) => Outcome::Action(action),
            None => Outcome::None,
        }
    }
}

impl<A> std::fmt::Debug for Outcome<A>
where
    A: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::None => f.write_str("Outcome::None"),
            Outcome::Action(action) => f.debug_tuple("Outcome::Action").field(action).finish(),
            Outcome::Stream(_) => f.write_str("Outcome::Stream(..)"),
        }
    }
}
