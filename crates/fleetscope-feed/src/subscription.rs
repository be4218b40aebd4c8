use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fleetscope_types::LogLine;

/// Number of backlog lines requested when none is configured
pub const DEFAULT_BACKLOG_LINES: usize = 20;

/// Stream of lines delivered by a subscription, in arrival order
pub type LineStream = BoxStream<'static, LogLine>;

/// Options for opening a subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Recent lines to deliver before live output
    pub count: usize,
}

impl SubscribeOptions {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG_LINES)
    }
}

/// An open feed subscription: a line stream plus the right to release it
pub struct Subscription {
    lines: LineStream,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn new<S, F>(resource_id: impl Into<String>, lines: S, release: F) -> Self
    where
        S: Stream<Item = LogLine> + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        Self {
            lines: lines.boxed(),
            handle: SubscriptionHandle::new(resource_id, release),
        }
    }

    /// Subscription fed by a channel; releasing it cancels `cancel`
    pub fn from_channel(
        resource_id: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<LogLine>,
        cancel: CancellationToken,
    ) -> Self {
        let lines = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|line| (line, receiver))
        });
        Self::new(resource_id, lines, move || cancel.cancel())
    }

    pub fn resource_id(&self) -> &str {
        self.handle.resource_id()
    }

    /// Split into the line stream and the release handle
    pub fn into_parts(self) -> (LineStream, SubscriptionHandle) {
        (self.lines, self.handle)
    }
}

impl Stream for Subscription {
    type Item = LogLine;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LogLine>> {
        self.lines.poll_next_unpin(cx)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("resource_id", &self.handle.resource_id)
            .finish()
    }
}

/// Exclusive ownership of an active subscription.
///
/// `unsubscribe` consumes the handle, so a handle is released at most once.
/// A handle dropped without an explicit unsubscribe is released on drop.
pub struct SubscriptionHandle {
    resource_id: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new<F>(resource_id: impl Into<String>, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            resource_id: resource_id.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Release the subscription
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!(resource = %self.resource_id, "unsubscribing from log feed");
            release();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("resource_id", &self.resource_id)
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_unsubscribe_runs_release_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = SubscriptionHandle::new("dev", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_unreleased_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        drop(SubscriptionHandle::new("dev", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_subscription_delivers_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut subscription = Subscription::from_channel("dev", rx, cancel.clone());

        tx.send(LogLine::new("one\n")).unwrap();
        tx.send(LogLine::new("two\n")).unwrap();
        drop(tx);

        assert_eq!(subscription.next().await.unwrap().message, "one\n");
        assert_eq!(subscription.next().await.unwrap().message, "two\n");
        assert!(subscription.next().await.is_none());

        let (_, handle) = subscription.into_parts();
        assert!(!cancel.is_cancelled());
        handle.unsubscribe();
        assert!(cancel.is_cancelled());
    }
}
