use thiserror::Error;

/// Failures surfaced on an effect's output stream or while configuring it.
///
/// First-level failures of a `run` callback never show up here: they are
/// handed to the recovery callback. Only a failure inside the recovery
/// outcome itself reaches the caller, and it ends the stream.
#[derive(Debug, Error)]
pub enum EffectError {
    #[error("recovery for `{action_type}` failed: {source}")]
    Recovery {
        action_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EffectError>;
