//! Host wiring: feed an effect's output back into the bus.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::action::Action;
use crate::bus::ActionBus;
use crate::error::Result;
use crate::operators::EffectStream;

/// Spawn a task that dispatches every action `effect` emits into `bus`.
///
/// The task stops at the first fatal error and returns it, or returns the
/// number of forwarded actions once the effect ends. An effect subscribed to
/// the same bus only ends if the task is aborted, since the task keeps a
/// sender alive.
pub fn spawn_effect<A: Action>(
    name: impl Into<String>,
    mut effect: EffectStream<A>,
    bus: ActionBus<A>,
) -> JoinHandle<Result<usize>> {
    let name = name.into();

    tokio::spawn(async move {
        let mut forwarded = 0usize;

        while let Some(item) = effect.next().await {
            match item {
                Ok(action) => {
                    debug!(
                        effect = name.as_str(),
                        action_type = action.action_type(),
                        "Forwarding effect output"
                    );
                    bus.dispatch(action);
                    forwarded += 1;
                }
                Err(e) => {
                    error!(effect = name.as_str(), error = %e, "Effect failed, stopping");
                    return Err(e);
                }
            }
        }

        info!(effect = name.as_str(), forwarded, "Effect completed");
        Ok(forwarded)
    })
}
