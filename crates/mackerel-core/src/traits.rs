//! Core traits for paged fetching and account storage.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    PagedCollection,
    model::{AppSettings, Identity, IdentityId},
};

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items in server order.
    pub items: Vec<T>,
    /// Cursor for the following page. Absent or empty means end of stream.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    #[must_use]
    pub const fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    /// A page that ends the stream.
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }

    /// Next cursor with empty strings treated as end of stream.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref().filter(|c| !c.is_empty())
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.cursor().is_none()
    }
}

/// Error surfaced by a [`PagedFetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The remote API answered with an error.
    #[error("Protocol error {code}: {message}")]
    Protocol { code: String, message: String },
    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The response was missing required parts.
    #[error("Malformed page: {0}")]
    Malformed(String),
}

/// One page round trip against a cursor-paginated endpoint.
///
/// Implementations must tolerate being called repeatedly with the same
/// cursor. An absent cursor asks for the first page.
#[async_trait]
pub trait PagedFetcher: Send + Sync {
    /// Item type produced by the endpoint.
    type Item: Send;

    /// Fetch up to `limit` items starting at `cursor`.
    async fn fetch(
        &self,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<Self::Item>, FetchError>;

    /// Wrap this fetcher in an empty [`PagedCollection`].
    fn into_collection(self) -> PagedCollection<Self>
    where
        Self: Sized,
    {
        PagedCollection::new(self)
    }
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Identity not found: {0}")]
    NotFound(IdentityId),
    #[error("Invalid {column} value in storage: {value}")]
    InvalidValue { column: &'static str, value: i64 },
    #[error("Storage backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for account storage backends.
///
/// Every method is all-or-nothing: a failed call leaves no partial write
/// visible to later reads. Lookups by `did` or `handle` return the row
/// with the lowest id when several match.
#[async_trait]
pub trait AccountStorage: Send + Sync {
    /// Get an identity by row id.
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>, StorageError>;

    /// Find the first identity with this `did`.
    async fn find_by_did(&self, did: &str) -> Result<Option<Identity>, StorageError>;

    /// Find the first identity with this `handle`.
    async fn find_by_handle(&self, handle: &str) -> Result<Option<Identity>, StorageError>;

    /// Find the identity flagged as default.
    async fn find_default(&self) -> Result<Option<Identity>, StorageError>;

    /// All identities ordered by id.
    async fn list(&self) -> Result<Vec<Identity>, StorageError>;

    /// Insert a new row, ignoring `identity.id`. Returns the assigned id.
    async fn insert(&self, identity: &Identity) -> Result<IdentityId, StorageError>;

    /// Overwrite the row matching `identity.id`. Returns whether a row changed.
    async fn update(&self, identity: &Identity) -> Result<bool, StorageError>;

    /// Delete a row. Returns whether a row was removed.
    async fn remove(&self, id: IdentityId) -> Result<bool, StorageError>;

    /// Write `identity` as the default account and clear the flag on every
    /// other row, atomically.
    ///
    /// Inserts when `identity.id` is `None`, otherwise updates that row
    /// (failing with [`StorageError::NotFound`] if it is gone).
    async fn promote_default(&self, identity: &Identity) -> Result<IdentityId, StorageError>;

    /// Read the settings row, creating it with defaults when missing.
    async fn load_settings(&self) -> Result<AppSettings, StorageError>;

    /// Overwrite the settings row. Returns whether a row changed.
    async fn store_settings(&self, settings: &AppSettings) -> Result<bool, StorageError>;

    /// Release the backend's resources.
    async fn close(&self);
}
