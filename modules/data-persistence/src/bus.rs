//! Broadcast-backed action source that effects can dispatch back into.

use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tracing::debug;

use crate::action::Action;
use crate::config::Config;
use crate::sources::{broadcast_actions, ActionSource};

/// Default number of buffered actions per subscriber before it starts lagging.
pub const DEFAULT_CAPACITY: usize = 256;

/// Largest capacity `tokio::sync::broadcast` accepts.
pub const MAX_CAPACITY: usize = usize::MAX >> 1;

/// In-memory action bus. Cloning shares the same channel.
///
/// Delivery is at-most-once: a subscriber that falls more than `capacity`
/// actions behind skips the oldest ones.
#[derive(Clone)]
pub struct ActionBus<A: Action> {
    sender: broadcast::Sender<A>,
}

impl<A: Action> ActionBus<A> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Panics if `capacity` is zero or above [`MAX_CAPACITY`].
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_capacity(config.bus_capacity)
    }

    /// Deliver an action to every current subscriber. Returns how many there were.
    pub fn dispatch(&self, action: A) -> usize {
        let action_type = action.action_type().to_string();
        match self.sender.send(action) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(action_type = action_type.as_str(), "Dispatched with no subscribers");
                0
            }
        }
    }

    /// A new subscription. Sees only actions dispatched after this call.
    pub fn subscribe(&self) -> BoxStream<'static, A> {
        broadcast_actions(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<A: Action> Default for ActionBus<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Action> ActionSource<A> for ActionBus<A> {
    fn actions(&self) -> BoxStream<'static, A> {
        self.subscribe()
    }
}
