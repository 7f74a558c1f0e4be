//! Feed fetchers bound to a protocol client.
//!
//! Each fetcher is a thin configuration over one [`FeedClient`] endpoint;
//! wrap it with [`PagedFetcher::into_collection`] to get a collection.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    PagedCollection,
    traits::{FetchError, Page, PagedFetcher},
};

/// Popular "what's hot" feed generator shown before login.
pub const DISCOVER_FEED_URI: &str =
    "at://did:plc:z72i7hdynmk6r22z27h6tvur/app.bsky.feed.generator/whats-hot";

/// Which posts an author timeline includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorFilter {
    PostsWithReplies,
    PostsNoReplies,
    PostsWithMedia,
    #[default]
    PostsAndAuthorThreads,
    PostsWithVideo,
}

impl AuthorFilter {
    /// Wire value understood by the feed API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PostsWithReplies => "posts_with_replies",
            Self::PostsNoReplies => "posts_no_replies",
            Self::PostsWithMedia => "posts_with_media",
            Self::PostsAndAuthorThreads => "posts_and_author_threads",
            Self::PostsWithVideo => "posts_with_video",
        }
    }
}

/// Raw listing response from the protocol client.
///
/// `items` is `None` when the server omitted the list entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedResponse<T> {
    pub items: Option<Vec<T>>,
    pub cursor: Option<String>,
}

impl<T> FeedResponse<T> {
    #[must_use]
    pub const fn new(items: Vec<T>, cursor: Option<String>) -> Self {
        Self {
            items: Some(items),
            cursor,
        }
    }

    /// Convert to a [`Page`], rejecting responses without an item list.
    ///
    /// # Errors
    /// Returns [`FetchError::Malformed`] if `items` is missing.
    pub fn into_page(self, endpoint: &str) -> Result<Page<T>, FetchError> {
        let items = self
            .items
            .ok_or_else(|| FetchError::Malformed(format!("{endpoint} returned no items")))?;
        Ok(Page::new(items, self.cursor))
    }
}

/// Listing endpoints of the remote protocol client.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Post view type.
    type Post: Send;
    /// Feed generator view type.
    type Generator: Send;

    /// Posts authored by `actor`.
    async fn author_feed(
        &self,
        actor: &str,
        filter: AuthorFilter,
        include_pins: bool,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FeedResponse<Self::Post>, FetchError>;

    /// Posts liked by `actor`. Requires an authenticated session.
    async fn actor_likes(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FeedResponse<Self::Post>, FetchError>;

    /// Output of the feed generator at `feed_uri`.
    async fn feed(
        &self,
        feed_uri: &str,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FeedResponse<Self::Post>, FetchError>;

    /// Popular feed generators, optionally filtered by a search query.
    async fn popular_generators(
        &self,
        query: Option<&str>,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FeedResponse<Self::Generator>, FetchError>;
}

/// Author timeline.
pub struct AuthorFeed<C> {
    client: Arc<C>,
    actor: String,
    filter: AuthorFilter,
    include_pins: bool,
}

impl<C: FeedClient> AuthorFeed<C> {
    /// Timeline of `actor` with the default filter and no pinned posts.
    #[must_use]
    pub fn new(client: Arc<C>, actor: impl Into<String>) -> Self {
        Self {
            client,
            actor: actor.into(),
            filter: AuthorFilter::default(),
            include_pins: false,
        }
    }

    #[must_use]
    pub const fn with_filter(mut self, filter: AuthorFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub const fn with_pins(mut self, include_pins: bool) -> Self {
        self.include_pins = include_pins;
        self
    }

    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    #[must_use]
    pub const fn filter(&self) -> AuthorFilter {
        self.filter
    }

    #[must_use]
    pub const fn include_pins(&self) -> bool {
        self.include_pins
    }
}

#[async_trait]
impl<C: FeedClient> PagedFetcher for AuthorFeed<C> {
    type Item = C::Post;

    async fn fetch(
        &self,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<C::Post>, FetchError> {
        self.client
            .author_feed(&self.actor, self.filter, self.include_pins, limit, cursor, cancel)
            .await?
            .into_page("author feed")
    }
}

/// Posts liked by an actor.
pub struct AuthorLikes<C> {
    client: Arc<C>,
    actor: String,
}

impl<C: FeedClient> AuthorLikes<C> {
    #[must_use]
    pub fn new(client: Arc<C>, actor: impl Into<String>) -> Self {
        Self {
            client,
            actor: actor.into(),
        }
    }

    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }
}

#[async_trait]
impl<C: FeedClient> PagedFetcher for AuthorLikes<C> {
    type Item = C::Post;

    async fn fetch(
        &self,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<C::Post>, FetchError> {
        self.client
            .actor_likes(&self.actor, limit, cursor, cancel)
            .await?
            .into_page("actor likes")
    }
}

/// Output of one feed generator.
pub struct GeneratorFeed<C> {
    client: Arc<C>,
    feed_uri: String,
}

impl<C: FeedClient> GeneratorFeed<C> {
    #[must_use]
    pub fn new(client: Arc<C>, feed_uri: impl Into<String>) -> Self {
        Self {
            client,
            feed_uri: feed_uri.into(),
        }
    }

    /// The logged-out discover feed.
    #[must_use]
    pub fn discover(client: Arc<C>) -> Self {
        Self::new(client, DISCOVER_FEED_URI)
    }

    #[must_use]
    pub fn feed_uri(&self) -> &str {
        &self.feed_uri
    }
}

#[async_trait]
impl<C: FeedClient> PagedFetcher for GeneratorFeed<C> {
    type Item = C::Post;

    async fn fetch(
        &self,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<C::Post>, FetchError> {
        self.client
            .feed(&self.feed_uri, limit, cursor, cancel)
            .await?
            .into_page("feed")
    }
}

/// Feed generator discovery, optionally narrowed by a search query.
pub struct PopularGenerators<C> {
    client: Arc<C>,
    query: Option<String>,
}

impl<C: FeedClient> PopularGenerators<C> {
    #[must_use]
    pub const fn new(client: Arc<C>) -> Self {
        Self {
            client,
            query: None,
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into()).filter(|q| !q.is_empty());
        self
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

#[async_trait]
impl<C: FeedClient> PagedFetcher for PopularGenerators<C> {
    type Item = C::Generator;

    async fn fetch(
        &self,
        limit: u32,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<C::Generator>, FetchError> {
        self.client
            .popular_generators(self.query.as_deref(), limit, cursor, cancel)
            .await?
            .into_page("popular feed generators")
    }
}

pub type AuthorFeedCollection<C> = PagedCollection<AuthorFeed<C>>;
pub type AuthorLikesCollection<C> = PagedCollection<AuthorLikes<C>>;
pub type GeneratorFeedCollection<C> = PagedCollection<GeneratorFeed<C>>;
pub type PopularGeneratorsCollection<C> = PagedCollection<PopularGenerators<C>>;

impl<C: FeedClient> PagedCollection<PopularGenerators<C>> {
    /// Current search query.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.fetcher().query()
    }

    /// Replace the search query. Always clears the collection.
    pub fn set_query(&mut self, query: Option<String>) {
        self.clear();
        self.fetcher_mut().query = query.filter(|q| !q.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::CollectionError;

    /// Records each request and answers with one page naming the endpoint.
    #[derive(Default)]
    struct RecordingClient {
        requests: Mutex<Vec<String>>,
        omit_items: bool,
    }

    impl RecordingClient {
        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        fn respond(&self, request: String) -> FeedResponse<String> {
            let item = format!("item from {request}");
            self.requests.lock().unwrap().push(request);
            if self.omit_items {
                FeedResponse {
                    items: None,
                    cursor: None,
                }
            } else {
                FeedResponse::new(vec![item], Some("next".to_string()))
            }
        }
    }

    #[async_trait]
    impl FeedClient for RecordingClient {
        type Post = String;
        type Generator = String;

        async fn author_feed(
            &self,
            actor: &str,
            filter: AuthorFilter,
            include_pins: bool,
            limit: u32,
            cursor: Option<&str>,
            _cancel: &CancellationToken,
        ) -> Result<FeedResponse<String>, FetchError> {
            Ok(self.respond(format!(
                "author_feed {actor} {} pins={include_pins} {limit} {cursor:?}",
                filter.as_str()
            )))
        }

        async fn actor_likes(
            &self,
            actor: &str,
            limit: u32,
            cursor: Option<&str>,
            _cancel: &CancellationToken,
        ) -> Result<FeedResponse<String>, FetchError> {
            Ok(self.respond(format!("actor_likes {actor} {limit} {cursor:?}")))
        }

        async fn feed(
            &self,
            feed_uri: &str,
            limit: u32,
            cursor: Option<&str>,
            _cancel: &CancellationToken,
        ) -> Result<FeedResponse<String>, FetchError> {
            Ok(self.respond(format!("feed {feed_uri} {limit} {cursor:?}")))
        }

        async fn popular_generators(
            &self,
            query: Option<&str>,
            limit: u32,
            cursor: Option<&str>,
            _cancel: &CancellationToken,
        ) -> Result<FeedResponse<String>, FetchError> {
            Ok(self.respond(format!("popular {query:?} {limit} {cursor:?}")))
        }
    }

    #[tokio::test]
    async fn author_feed_passes_configuration() {
        let client = Arc::new(RecordingClient::default());
        let mut timeline = AuthorFeed::new(Arc::clone(&client), "alice.bsky.social")
            .with_filter(AuthorFilter::PostsWithMedia)
            .with_pins(true)
            .into_collection();
        let cancel = CancellationToken::new();

        timeline.load_more(Some(10), &cancel).await.unwrap();
        timeline.load_more(Some(10), &cancel).await.unwrap();

        assert_eq!(
            client.requests(),
            vec![
                "author_feed alice.bsky.social posts_with_media pins=true 10 None",
                "author_feed alice.bsky.social posts_with_media pins=true 10 Some(\"next\")",
            ]
        );
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn author_feed_defaults() {
        let feed = AuthorFeed::new(Arc::new(RecordingClient::default()), "bob");
        assert_eq!(feed.filter(), AuthorFilter::PostsAndAuthorThreads);
        assert!(!feed.include_pins());
        assert_eq!(feed.actor(), "bob");
    }

    #[tokio::test]
    async fn likes_and_generator_feeds_hit_their_endpoints() {
        let client = Arc::new(RecordingClient::default());
        let cancel = CancellationToken::new();

        let mut likes: AuthorLikesCollection<_> =
            AuthorLikes::new(Arc::clone(&client), "did:plc:alice").into_collection();
        likes.load_more(None, &cancel).await.unwrap();

        let mut discover: GeneratorFeedCollection<_> =
            GeneratorFeed::discover(Arc::clone(&client)).into_collection();
        discover.load_more(Some(25), &cancel).await.unwrap();

        assert_eq!(
            client.requests(),
            vec![
                "actor_likes did:plc:alice 50 None".to_string(),
                format!("feed {DISCOVER_FEED_URI} 25 None"),
            ]
        );
    }

    #[tokio::test]
    async fn changing_query_clears_generators() {
        let client = Arc::new(RecordingClient::default());
        let mut generators: PopularGeneratorsCollection<_> =
            PopularGenerators::new(Arc::clone(&client)).into_collection();
        let cancel = CancellationToken::new();

        generators.refresh(Some(20), &cancel).await.unwrap();
        assert_eq!(generators.len(), 1);

        generators.set_query(Some("cats".to_string()));
        assert!(generators.is_empty());
        assert_eq!(generators.cursor(), None);
        assert_eq!(generators.query(), Some("cats"));

        generators.load_more(Some(20), &cancel).await.unwrap();
        assert_eq!(
            client.requests().last().map(String::as_str),
            Some("popular Some(\"cats\") 20 None")
        );

        generators.set_query(Some(String::new()));
        assert_eq!(generators.query(), None);
    }

    #[tokio::test]
    async fn missing_item_list_is_an_invariant_violation() {
        let client = Arc::new(RecordingClient {
            omit_items: true,
            ..RecordingClient::default()
        });
        let mut likes = AuthorLikes::new(client, "carol").into_collection();

        let err = likes
            .load_more(None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CollectionError::InvariantViolation(_)));
        assert!(likes.is_empty());
    }
}
