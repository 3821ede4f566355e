use crate::{policy::PolicyError, tracker::TrackerError};

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the core can tell
/// configuration defects (fatal) from per-reference failures (reported inline).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Authentication error for Trac {instance}: {source}")]
    TrackerAuth {
        instance: String,
        #[source]
        source: TrackerError,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
