//! Device log feeds for fleetscope
//!
//! A feed turns a device identity into a push-based subscription of log
//! lines. The live log provider consumes feeds only through [`LogFeed`].

mod command;
mod error;
#[cfg(any(test, feature = "test-util"))]
mod scripted;
mod subscription;

use futures::future::BoxFuture;

pub use command::{CommandFeed, LineFormat};
pub use error::FeedError;
#[cfg(any(test, feature = "test-util"))]
pub use scripted::ScriptedFeed;
pub use subscription::{
    DEFAULT_BACKLOG_LINES, LineStream, SubscribeOptions, Subscription, SubscriptionHandle,
};

// Re-export types used in our public API
pub use fleetscope_types::LogLine;

/// Source of live log subscriptions keyed by device identity
pub trait LogFeed: Send + Sync {
    /// Open a subscription for `resource_id`, starting with up to
    /// `options.count` recent lines of backlog.
    ///
    /// The returned future is independent of `self` so callers can spawn it.
    fn subscribe(
        &self,
        resource_id: &str,
        options: SubscribeOptions,
    ) -> BoxFuture<'static, Result<Subscription, FeedError>>;
}
