//! In-memory feed driven by test code

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use fleetscope_types::LogLine;

use crate::{FeedError, LogFeed, SubscribeOptions, Subscription};

#[derive(Default)]
struct ScriptedState {
    /// Every subscribe call, in order: (resource, backlog count)
    opens: Vec<(String, usize)>,
    failures_remaining: usize,
    next_subscription: u64,
    /// Live line senders per resource, tagged with their subscription id
    senders: HashMap<String, Vec<(u64, mpsc::UnboundedSender<LogLine>)>>,
    unsubscribes: HashMap<String, usize>,
}

/// Feed whose lines, failures and open timing are scripted by tests.
///
/// Counts every subscribe and unsubscribe per resource.
#[derive(Clone)]
pub struct ScriptedFeed {
    state: Arc<Mutex<ScriptedState>>,
    gate: Arc<watch::Sender<bool>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(ScriptedState::default())),
            gate: Arc::new(gate),
        }
    }

    /// Fail the next `n` subscribe calls
    pub fn fail_next(&self, n: usize) {
        self.state.lock().failures_remaining = n;
    }

    /// Keep subscribe calls pending until [`ScriptedFeed::release_opens`]
    pub fn hold_opens(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_opens(&self) {
        self.gate.send_replace(true);
    }

    /// Deliver a line to every live subscription for `resource_id`; false
    /// when none received it
    pub fn push(&self, resource_id: &str, message: &str) -> bool {
        let state = self.state.lock();
        let Some(senders) = state.senders.get(resource_id) else {
            return false;
        };
        let mut delivered = false;
        for (_, sender) in senders {
            delivered |= sender.send(LogLine::new(message)).is_ok();
        }
        delivered
    }

    /// End every line stream for `resource_id` without releasing them
    pub fn end(&self, resource_id: &str) {
        self.state.lock().senders.remove(resource_id);
    }

    pub fn opens(&self) -> Vec<(String, usize)> {
        self.state.lock().opens.clone()
    }

    pub fn open_count(&self, resource_id: &str) -> usize {
        self.state
            .lock()
            .opens
            .iter()
            .filter(|(id, _)| id == resource_id)
            .count()
    }

    pub fn unsubscribe_count(&self, resource_id: &str) -> usize {
        self.state
            .lock()
            .unsubscribes
            .get(resource_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of subscriptions for `resource_id` whose streams are still fed
    pub fn live_count(&self, resource_id: &str) -> usize {
        self.state
            .lock()
            .senders
            .get(resource_id)
            .map_or(0, Vec::len)
    }

    pub fn is_live(&self, resource_id: &str) -> bool {
        self.live_count(resource_id) > 0
    }
}

impl Default for ScriptedFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LogFeed for ScriptedFeed {
    fn subscribe(
        &self,
        resource_id: &str,
        options: SubscribeOptions,
    ) -> BoxFuture<'static, Result<Subscription, FeedError>> {
        self.state
            .lock()
            .opens
            .push((resource_id.to_string(), options.count));

        let state = Arc::clone(&self.state);
        let mut gate = self.gate.subscribe();
        let resource_id = resource_id.to_string();

        async move {
            // The sender lives as long as the feed, so this only fails once
            // every clone of the feed is gone.
            let _ = gate.wait_for(|open| *open).await;

            let (line_tx, line_rx) = mpsc::unbounded_channel();
            let subscription_id = {
                let mut state = state.lock();
                if state.failures_remaining > 0 {
                    state.failures_remaining -= 1;
                    return Err(FeedError::ResourceNotFound(resource_id));
                }
                let id = state.next_subscription;
                state.next_subscription += 1;
                state
                    .senders
                    .entry(resource_id.clone())
                    .or_default()
                    .push((id, line_tx));
                id
            };

            let release_state = Arc::clone(&state);
            let release_id = resource_id.clone();
            let lines = futures::stream::unfold(line_rx, |mut rx| async move {
                rx.recv().await.map(|line| (line, rx))
            });

            Ok(Subscription::new(resource_id, lines, move || {
                let mut state = release_state.lock();
                *state.unsubscribes.entry(release_id.clone()).or_default() += 1;
                if let Some(senders) = state.senders.get_mut(&release_id) {
                    senders.retain(|(id, _)| *id != subscription_id);
                    if senders.is_empty() {
                        state.senders.remove(&release_id);
                    }
                }
            }))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_subscriptions_to_one_resource_are_independent() {
        let feed = ScriptedFeed::new();
        let mut first = feed
            .subscribe("abc", SubscribeOptions::default())
            .await
            .unwrap();
        let second = feed
            .subscribe("abc", SubscribeOptions::default())
            .await
            .unwrap();
        assert_eq!(feed.live_count("abc"), 2);

        assert!(feed.push("abc", "hello\n"));
        let (mut second_lines, second_handle) = second.into_parts();
        assert_eq!(first.next().await.unwrap().message, "hello\n");
        assert_eq!(second_lines.next().await.unwrap().message, "hello\n");

        second_handle.unsubscribe();
        assert_eq!(feed.live_count("abc"), 1);
        assert_eq!(feed.unsubscribe_count("abc"), 1);

        assert!(feed.push("abc", "still here\n"));
        assert_eq!(first.next().await.unwrap().message, "still here\n");
        assert!(second_lines.next().await.is_none());
    }

    #[tokio::test]
    async fn test_push_without_subscription_is_not_delivered() {
        let feed = ScriptedFeed::new();
        assert!(!feed.push("abc", "lost\n"));
        assert!(!feed.is_live("abc"));
    }
}
