use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use fleetscope_types::{BUILD_LOG_SCHEME, DEVICE_LOG_SCHEME, LogLocator};

use crate::{ContentSlice, LiveLogProvider, ProviderError, StaticLogProvider};

/// Something that can serve virtual document content for a scheme
pub trait ContentProvider: Send + Sync {
    /// Current content of the document
    fn provide_content(&self, locator: &LogLocator) -> Result<String, ProviderError>;

    /// Content after absolute byte `offset`, plus the document's end offset.
    ///
    /// Providers that drop old text must override this so offsets keep
    /// counting dropped bytes.
    fn provide_content_since(
        &self,
        locator: &LogLocator,
        offset: usize,
    ) -> Result<ContentSlice, ProviderError> {
        Ok(ContentSlice::tail_of(self.provide_content(locator)?, offset))
    }

    /// Host signal that the document was closed
    fn document_closed(&self, _locator: &LogLocator) {}
}

/// Dispatches document reads and closes to providers by locator scheme
#[derive(Clone, Default)]
pub struct DocumentRouter {
    providers: HashMap<String, Arc<dyn ContentProvider>>,
}

impl DocumentRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router serving `deviceLogs` from `live` and `buildLogs` statically
    pub fn with_log_providers(live: LiveLogProvider) -> Self {
        let mut router = Self::new();
        router.register(DEVICE_LOG_SCHEME, Arc::new(live));
        router.register(BUILD_LOG_SCHEME, Arc::new(StaticLogProvider::new()));
        router
    }

    /// Register a provider, returning the one it replaces
    pub fn register(
        &mut self,
        scheme: impl Into<String>,
        provider: Arc<dyn ContentProvider>,
    ) -> Option<Arc<dyn ContentProvider>> {
        self.providers.insert(scheme.into(), provider)
    }

    pub fn provider(&self, scheme: &str) -> Option<&Arc<dyn ContentProvider>> {
        self.providers.get(scheme)
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Read a document through its scheme's provider
    pub fn content(&self, locator: &LogLocator) -> Result<String, ProviderError> {
        self.provider(locator.scheme())
            .ok_or_else(|| ProviderError::UnknownScheme(locator.scheme().to_string()))?
            .provide_content(locator)
    }

    /// Read the part of a document after `offset`
    pub fn content_since(
        &self,
        locator: &LogLocator,
        offset: usize,
    ) -> Result<ContentSlice, ProviderError> {
        self.provider(locator.scheme())
            .ok_or_else(|| ProviderError::UnknownScheme(locator.scheme().to_string()))?
            .provide_content_since(locator, offset)
    }

    /// Forward a close notification; unknown schemes are ignored
    pub fn close(&self, locator: &LogLocator) {
        match self.provider(locator.scheme()) {
            Some(provider) => provider.document_closed(locator),
            None => debug!(document = %locator, "close for unrouted document"),
        }
    }
}
