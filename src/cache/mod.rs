//! In-memory release index cache.
//!
//! Provides the [`CacheStore`] that holds the live [`Snapshot`] and the
//! [`Refresher`] that rebuilds it in the background.
//!
//! [`Snapshot`]: crate::index::Snapshot

pub mod refresh;
pub mod store;

pub use refresh::{RefreshState, Refresher};
pub use store::CacheStore;
