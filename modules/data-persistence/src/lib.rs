//! Action/state effect helpers.
//!
//! Pair every matching action with the latest state snapshot, run a
//! user-supplied (usually async) operation, and map success or failure back
//! into actions for the host to re-dispatch.
//!
//! Three policies are provided by [`DataPersistence`]:
//!
//! - `pessimistic_update`: ordered, one operation in flight, failures mapped
//!   through `on_error`.
//! - `optimistic_update`: same ordering, failures mapped to a mandatory undo
//!   action.
//! - `fetch`: ordered without an id; with an id, concurrent across keys and
//!   switch-to-latest within a key.
//!
//! A failed operation never ends the output stream. Consumers bring their own
//! action source and state container through [`ActionSource`] and
//! [`StateSource`].

pub mod action;
pub mod bus;
pub mod config;
pub mod error;
pub mod operators;
pub mod outcome;
pub mod persistence;
pub mod runner;
pub mod sources;

pub use action::{Action, AnyAction};
pub use bus::ActionBus;
pub use config::{Config, LogFormat};
pub use error::{EffectError, Result};
pub use operators::{keyed_latest, ordered, run_with_error_handling, EffectStream};
pub use outcome::Outcome;
pub use persistence::{
    DataPersistence, FetchOpts, KeyFn, OptimisticUpdateOpts, PessimisticUpdateOpts, RecoverFn,
    RunFn, UndoFn,
};
pub use runner::spawn_effect;
pub use sources::{of_type, state_fn, with_latest_from, ActionSource, StateFn, StateSource};
