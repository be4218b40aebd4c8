//! Log document providers for fleetscope
//!
//! This crate maps document locators to log text: live device logs backed by
//! feed subscriptions, and static build logs decoded from the locator itself.

mod buffer;
mod error;
mod live;
mod router;
mod static_logs;

pub use buffer::{ContentBuffer, ContentSlice};
pub use error::ProviderError;
pub use live::{ChangeEvents, LiveLogOptions, LiveLogProvider};
pub use router::{ContentProvider, DocumentRouter};
pub use static_logs::StaticLogProvider;

// Re-export types used in our public API
pub use fleetscope_types::{LocatorKind, LogLocator};
