//! Core building blocks for the feed client.
//!
//! This crate provides:
//! - `PagedCollection` - Resumable, cancelable accumulator over a cursor-paginated endpoint
//! - `feeds` - Author, likes, generator and discovery fetchers over a `FeedClient`
//! - `SessionBus` - Account change notifications
//! - `CurrentSession` - Active account derived from bus events
//! - Account model and the `AccountStorage` trait

pub mod bus;
pub mod collection;
pub mod current;
pub mod feeds;
pub mod model;
pub mod traits;

pub use bus::{SessionBus, SubscriptionId};
pub use collection::{CollectionError, FnFetcher, InFlight, PagedCollection, RefreshGuard};
pub use current::CurrentSession;
pub use model::{
    AppLanguage, AppSettings, AppTheme, Identity, IdentityId, LoginKind, SessionChanged,
    SessionEventKind,
};
pub use traits::{AccountStorage, DEFAULT_PAGE_LIMIT, FetchError, Page, PagedFetcher, StorageError};
pub use tokio_util::sync::CancellationToken;
