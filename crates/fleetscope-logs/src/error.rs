use thiserror::Error;

use fleetscope_types::LocatorError;

/// Errors surfaced by content reads
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("cannot decode build log: {0}")]
    Decode(#[from] LocatorError),

    #[error("no content provider registered for scheme `{0}`")]
    UnknownScheme(String),

    #[error("provider for `{expected}` documents cannot serve `{found}`")]
    WrongScheme {
        expected: &'static str,
        found: String,
    },

    #[error("live log provider must be created inside a tokio runtime")]
    NoRuntime,
}
