use thiserror::Error;

/// Errors raised while opening a feed subscription
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to spawn feed command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("feed command `{0}` has no stdout pipe")]
    NoStdout(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("feed error: {0}")]
    Other(String),
}
