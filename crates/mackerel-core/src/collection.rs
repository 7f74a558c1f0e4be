//! Incremental paged collection over a cursor-paginated endpoint.
//!
//! A [`PagedCollection`] holds the materialized prefix of a remote
//! sequence. `load_more` appends the next page, `refresh` starts over.
//! The collection is owned by one consumer; callers that share it across
//! tasks must serialize access themselves.

use std::{
    future::Future,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::traits::{DEFAULT_PAGE_LIMIT, FetchError, Page, PagedFetcher};

/// Collection error.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("Remote fetch failed: {0}")]
    RemoteFetchFailed(#[source] FetchError),
    #[error("Fetch cancelled")]
    Cancelled,
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<FetchError> for CollectionError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Malformed(reason) => Self::InvariantViolation(reason),
            other => Self::RemoteFetchFailed(other),
        }
    }
}

/// Ordered accumulator driven by a [`PagedFetcher`].
pub struct PagedCollection<F: PagedFetcher> {
    fetcher: F,
    items: Vec<F::Item>,
    cursor: Option<String>,
    has_more: bool,
}

impl<F: PagedFetcher> PagedCollection<F> {
    /// Create an empty collection. `has_more` starts out `true`.
    #[must_use]
    pub const fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            items: Vec::new(),
            cursor: None,
            has_more: true,
        }
    }

    #[must_use]
    pub const fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub(crate) fn fetcher_mut(&mut self) -> &mut F {
        &mut self.fetcher
    }

    /// Items accumulated so far, in fetch order.
    #[must_use]
    pub fn items(&self) -> &[F::Item] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Cursor for the next page, if the stream continues.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Whether another `load_more` may yield items.
    ///
    /// After a completed fetch this equals `cursor().is_some()`. A new or
    /// cleared collection reports `true`.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.has_more
    }

    #[must_use]
    pub fn into_items(self) -> Vec<F::Item> {
        self.items
    }

    /// Drop all items and the cursor.
    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = None;
        self.has_more = true;
    }

    /// Fetch the page after the stored cursor and append it.
    ///
    /// The fetch is attempted even after the stream has ended; what an
    /// absent cursor means is up to the fetcher. State only changes once a
    /// complete page has arrived.
    ///
    /// # Errors
    /// Returns [`CollectionError::Cancelled`] if `cancel` fires before or
    /// during the call, [`CollectionError::RemoteFetchFailed`] for fetcher
    /// errors and [`CollectionError::InvariantViolation`] for malformed pages.
    pub async fn load_more(
        &mut self,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<(), CollectionError> {
        if cancel.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }

        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CollectionError::Cancelled),
            result = self.fetcher.fetch(limit, self.cursor.as_deref(), cancel) => result,
        };

        let page = result.map_err(|e| {
            tracing::warn!(error = %e, limit, "Page fetch failed");
            CollectionError::from(e)
        })?;
        self.append(page);
        Ok(())
    }

    /// Clear the collection, then load one page.
    ///
    /// Not atomic: a cancellation after the clear leaves the collection
    /// empty.
    ///
    /// # Errors
    /// Same as [`Self::load_more`].
    pub async fn refresh(
        &mut self,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<(), CollectionError> {
        if cancel.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }

        self.clear();
        self.load_more(limit, cancel).await
    }

    /// Load one page, then return every accumulated item with the cursor.
    ///
    /// # Errors
    /// Same as [`Self::load_more`].
    pub async fn get_records(
        &mut self,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<F::Item>, Option<String>), CollectionError>
    where
        F::Item: Clone,
    {
        self.load_more(limit, cancel).await?;
        Ok((self.items.clone(), self.cursor.clone()))
    }

    fn append(&mut self, page: Page<F::Item>) {
        let fetched = page.items.len();
        self.cursor = page.next_cursor.filter(|c| !c.is_empty());
        self.has_more = self.cursor.is_some();
        self.items.extend(page.items);

        tracing::debug!(
            fetched,
            total = self.items.len(),
            has_more = self.has_more,
            "Loaded page"
        );
    }
}

impl<T, Func, Fut> PagedCollection<FnFetcher<Func, T>>
where
    Func: Fn(u32, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Page<T>, FetchError>> + Send + 'static,
    T: Send + 'static,
{
    /// Build a collection over a fetch closure.
    #[must_use]
    pub const fn from_fn(fetch: Func) -> Self {
        Self::new(FnFetcher::new(fetch))
    }
}

/// [`PagedFetcher`] backed by a closure taking `(limit, cursor)`.
pub struct FnFetcher<Func, T> {
    fetch: Func,
    _item: PhantomData<fn() -> T>,
}

impl<Func, T> FnFetcher<Func, T> {
    #[must_use]
    pub const fn new(fetch: Func) -> Self {
        Self {
            fetch,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<Func, Fut, T> PagedFetcher for FnFetcher<Func, T>
where
    Func: Fn(u32, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Page<T>, FetchError>> + Send + 'static,
    T: Send + 'static,
{
    type Item = T;

    async fn fetch(
        &self,
        limit: u32,
        cursor: Option<&str>,
        _cancel: &CancellationToken,
    ) -> Result<Page<T>, FetchError> {
        (self.fetch)(limit, cursor.map(str::to_owned)).await
    }
}

/// In-flight flag for consumers that must not overlap refreshes.
#[derive(Debug, Clone, Default)]
pub struct RefreshGuard {
    in_flight: Arc<AtomicBool>,
}

impl RefreshGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the flag, or `None` if a refresh is already running.
    #[must_use]
    pub fn try_begin(&self) -> Option<InFlight> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight {
                flag: Arc::clone(&self.in_flight),
            })
    }
}

/// Held while a refresh runs; releases the [`RefreshGuard`] on drop.
#[derive(Debug)]
#[must_use]
pub struct InFlight {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
