use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use fleetscope_feed::{
    DEFAULT_BACKLOG_LINES, LineStream, LogFeed, SubscribeOptions, Subscription,
    SubscriptionHandle,
};
use fleetscope_types::{DEVICE_LOG_SCHEME, LocatorKind, LogLocator};

use crate::{ContentBuffer, ContentProvider, ContentSlice, ProviderError};

/// Receiving end of a live provider's change notifications.
///
/// Each event names a document whose content grew and should be re-read.
pub type ChangeEvents = mpsc::UnboundedReceiver<LogLocator>;

/// Settings for live log documents
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveLogOptions {
    /// Recent lines requested when a subscription opens
    pub backlog_lines: usize,

    /// Per-document size cap in bytes (unbounded when `None`)
    pub max_content_bytes: Option<usize>,
}

impl Default for LiveLogOptions {
    fn default() -> Self {
        Self {
            backlog_lines: DEFAULT_BACKLOG_LINES,
            max_content_bytes: None,
        }
    }
}

enum EntryState {
    /// Subscribe issued, not yet established
    Opening,
    Open {
        handle: SubscriptionHandle,
        content: ContentBuffer,
        pump: CancellationToken,
    },
}

struct Entry {
    generation: u64,
    state: EntryState,
}

impl Entry {
    fn content(&self) -> String {
        match &self.state {
            EntryState::Opening => String::new(),
            EntryState::Open { content, .. } => content.as_str().to_string(),
        }
    }

    fn content_since(&self, offset: usize) -> ContentSlice {
        match &self.state {
            EntryState::Opening => ContentSlice::default(),
            EntryState::Open { content, .. } => content.slice_since(offset),
        }
    }

    /// Stop the pump and unsubscribe. An `Opening` entry holds no handle yet;
    /// its late subscription is released by the open task.
    fn release(self) {
        if let EntryState::Open {
            handle,
            pump,
            content,
        } = self.state
        {
            debug!(
                resource = handle.resource_id(),
                lines = content.appended(),
                dropped_bytes = content.dropped(),
                "releasing live log subscription"
            );
            pump.cancel();
            handle.unsubscribe();
        }
    }
}

/// Canonical locator string -> entry
#[derive(Default)]
struct Registry {
    entries: HashMap<String, Entry>,
    next_generation: u64,
}

impl Registry {
    fn insert_opening(&mut self, key: String) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.entries.insert(
            key,
            Entry {
                generation,
                state: EntryState::Opening,
            },
        );
        generation
    }

    fn get_current(&mut self, key: &str, generation: u64) -> Option<&mut Entry> {
        self.entries
            .get_mut(key)
            .filter(|entry| entry.generation == generation)
    }
}

struct Inner {
    feed: Arc<dyn LogFeed>,
    options: LiveLogOptions,
    registry: Mutex<Registry>,
    changes: mpsc::UnboundedSender<LogLocator>,
    runtime: Handle,
    shutdown: CancellationToken,
}

impl Inner {
    fn close(&self, locator: &LogLocator) {
        let removed = self.registry.lock().entries.remove(&locator.canonical());
        match removed {
            Some(entry) => {
                info!(document = %locator, "closing live log document");
                entry.release();
            }
            None => trace!(document = %locator, "close for untracked document"),
        }
    }

    fn release_all(&self) {
        let entries: Vec<Entry> = self
            .registry
            .lock()
            .entries
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in entries {
            entry.release();
        }
    }

    /// Turn the `Opening` entry into `Open`, or release the subscription if
    /// the document closed while it was opening.
    fn attach(
        self: &Arc<Self>,
        locator: LogLocator,
        key: String,
        generation: u64,
        subscription: Subscription,
    ) {
        let (lines, handle) = subscription.into_parts();
        let pump = self.shutdown.child_token();

        let rejected = {
            let mut registry = self.registry.lock();
            match registry.get_current(&key, generation) {
                Some(entry) => {
                    entry.state = EntryState::Open {
                        handle,
                        content: ContentBuffer::new(self.options.max_content_bytes),
                        pump: pump.clone(),
                    };
                    None
                }
                None => Some(handle),
            }
        };

        if let Some(handle) = rejected {
            debug!(document = %locator, "document closed before its subscription opened");
            handle.unsubscribe();
            return;
        }

        info!(document = %locator, "live log subscription opened");
        self.runtime.spawn(pump_lines(
            Arc::downgrade(self),
            locator,
            key,
            generation,
            lines,
            pump,
        ));
    }

    /// Append to the current entry; false once the entry is gone
    fn append(&self, key: &str, generation: u64, message: &str) -> bool {
        let mut registry = self.registry.lock();
        match registry.get_current(key, generation) {
            Some(Entry {
                state: EntryState::Open { content, .. },
                ..
            }) => {
                content.push(message);
                true
            }
            _ => false,
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for (_, entry) in self.registry.get_mut().entries.drain() {
            entry.release();
        }
    }
}

/// Apply lines from one subscription to its entry, in arrival order
async fn pump_lines(
    weak: Weak<Inner>,
    locator: LogLocator,
    key: String,
    generation: u64,
    mut lines: LineStream,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next() => line,
        };

        let Some(line) = line else {
            debug!(document = %locator, "log feed ended");
            break;
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if !inner.append(&key, generation, &line.message) {
            break;
        }
        let _ = inner.changes.send(locator.clone());
    }
}

/// Serves live device log documents.
///
/// The first read of a locator returns `""` and starts a feed subscription in
/// the background; every line that arrives afterwards is appended to the
/// document and announced on the change channel. Closing the document
/// releases the subscription. Clones share one registry.
#[derive(Clone)]
pub struct LiveLogProvider {
    inner: Arc<Inner>,
}

impl LiveLogProvider {
    /// Create a provider and its change channel.
    ///
    /// Must be called inside a tokio runtime; background work is spawned on it.
    pub fn new(
        feed: Arc<dyn LogFeed>,
        options: LiveLogOptions,
    ) -> Result<(Self, ChangeEvents), ProviderError> {
        let runtime = Handle::try_current().map_err(|_| ProviderError::NoRuntime)?;
        let (changes, change_rx) = mpsc::unbounded_channel();

        let inner = Inner {
            feed,
            options,
            registry: Mutex::new(Registry::default()),
            changes,
            runtime,
            shutdown: CancellationToken::new(),
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            change_rx,
        ))
    }

    pub fn options(&self) -> LiveLogOptions {
        self.inner.options
    }

    /// Current content of the document, opening its subscription on first use.
    ///
    /// Never waits on the feed: an unseen locator yields `""` and a change
    /// notification follows once lines arrive. A failed open leaves no entry,
    /// so the next read tries again.
    pub fn request_content(&self, locator: &LogLocator) -> String {
        self.read_or_open(locator, Entry::content).unwrap_or_default()
    }

    /// Like [`LiveLogProvider::request_content`], but only the text after
    /// absolute byte `offset`.
    ///
    /// Offsets count bytes a capped document has dropped, so passing back the
    /// previous slice's `end` yields exactly the lines appended since.
    pub fn request_content_since(&self, locator: &LogLocator, offset: usize) -> ContentSlice {
        self.read_or_open(locator, |entry| entry.content_since(offset))
            .unwrap_or_default()
    }

    /// Read the entry for `locator`, or start opening it and return `None`
    fn read_or_open<T>(&self, locator: &LogLocator, read: impl FnOnce(&Entry) -> T) -> Option<T> {
        let key = locator.canonical();
        let device = locator.fragment().unwrap_or_default();
        if device.is_empty() {
            warn!(document = %locator, "live log locator has no device identity");
            return None;
        }

        let generation = {
            let mut registry = self.inner.registry.lock();
            if let Some(entry) = registry.entries.get(&key) {
                return Some(read(entry));
            }
            if self.inner.shutdown.is_cancelled() {
                return None;
            }
            registry.insert_opening(key.clone())
        };

        self.spawn_open(locator.clone(), key, generation, device);
        None
    }

    fn spawn_open(&self, locator: LogLocator, key: String, generation: u64, device: &str) {
        debug!(document = %locator, device, "opening live log subscription");
        let opening = self.inner.feed.subscribe(
            device,
            SubscribeOptions::new(self.inner.options.backlog_lines),
        );
        let weak = Arc::downgrade(&self.inner);

        self.inner.runtime.spawn(async move {
            let result = opening.await;
            let Some(inner) = weak.upgrade() else {
                // Provider is gone; the subscription handle releases on drop
                return;
            };

            match result {
                Ok(subscription) => inner.attach(locator, key, generation, subscription),
                Err(e) => {
                    warn!(document = %locator, error = %e, "failed to open live log subscription");
                    let mut registry = inner.registry.lock();
                    if registry.get_current(&key, generation).is_some() {
                        registry.entries.remove(&key);
                    }
                }
            }
        });
    }

    /// Host signal that the document is no longer displayed.
    ///
    /// Releases the subscription exactly once; closing an unknown or already
    /// closed document does nothing.
    pub fn on_document_closed(&self, locator: &LogLocator) {
        self.inner.close(locator);
    }

    /// Drive closes from the host's close-notification stream until it ends
    /// or the provider shuts down.
    pub fn spawn_close_listener(
        &self,
        mut closed: mpsc::UnboundedReceiver<LogLocator>,
    ) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();

        self.inner.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,

                    next = closed.recv() => {
                        let Some(locator) = next else { break };
                        let Some(inner) = inner.upgrade() else { break };
                        inner.close(&locator);
                    }
                }
            }
        })
    }

    /// Release every subscription and refuse new ones
    pub fn shutdown(&self) {
        info!("shutting down live log provider");
        self.inner.shutdown.cancel();
        self.inner.release_all();
    }

    /// Whether any entry, opening or open, exists for the locator
    pub fn contains(&self, locator: &LogLocator) -> bool {
        self.inner
            .registry
            .lock()
            .entries
            .contains_key(&locator.canonical())
    }

    /// Whether the locator has an established subscription
    pub fn is_open(&self, locator: &LogLocator) -> bool {
        matches!(
            self.inner.registry.lock().entries.get(&locator.canonical()),
            Some(Entry {
                state: EntryState::Open { .. },
                ..
            })
        )
    }

    /// Number of tracked documents
    pub fn len(&self) -> usize {
        self.inner.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentProvider for LiveLogProvider {
    fn provide_content(&self, locator: &LogLocator) -> Result<String, ProviderError> {
        if locator.kind() != LocatorKind::DeviceLogs {
            return Err(ProviderError::WrongScheme {
                expected: DEVICE_LOG_SCHEME,
                found: locator.scheme().to_string(),
            });
        }
        Ok(self.request_content(locator))
    }

    fn provide_content_since(
        &self,
        locator: &LogLocator,
        offset: usize,
    ) -> Result<ContentSlice, ProviderError> {
        if locator.kind() != LocatorKind::DeviceLogs {
            return Err(ProviderError::WrongScheme {
                expected: DEVICE_LOG_SCHEME,
                found: locator.scheme().to_string(),
            });
        }
        Ok(self.request_content_since(locator, offset))
    }

    fn document_closed(&self, locator: &LogLocator) {
        self.on_document_closed(locator);
    }
}
