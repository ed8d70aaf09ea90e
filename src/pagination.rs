//! Ranked-post pagination
//!
//! A `PostFeed` walks `bridge.get_ranked_posts` page by page for one hub.
//! It is a two-state machine:
//!
//! - **Active**: the next fetch asks for a page starting at the cursor
//! - **Exhausted**: the last page was short or empty; fetches return nothing
//!   without contacting the chain
//!
//! Changing the sort mode resets the cursor and the set of posts already
//! served. All transitions happen under the feed's async mutex, so fetches
//! on one feed never overlap and a reset can't race an in-flight page.
//!
//! `CursorManager` drops feeds that sat idle longer than its TTL and caps
//! how many feeds it holds, evicting the least recently used one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::chain::gateway::MAX_POSTS_PER_PAGE;
use crate::chain::{BlockchainGateway, ChainResponse, Post, PostCursor, PostKey, SortMode};
use crate::hubs::HubContext;
use crate::types::Result;

/// Anything that can serve ranked post pages
#[async_trait::async_trait]
pub trait RankedPostSource: Send + Sync {
    async fn ranked_page(
        &self,
        hub: &HubContext,
        sort: SortMode,
        limit: u32,
        cursor: Option<&PostCursor>,
    ) -> Result<ChainResponse<Vec<Post>>>;
}

#[async_trait::async_trait]
impl RankedPostSource for BlockchainGateway {
    async fn ranked_page(
        &self,
        hub: &HubContext,
        sort: SortMode,
        limit: u32,
        cursor: Option<&PostCursor>,
    ) -> Result<ChainResponse<Vec<Post>>> {
        self.get_ranked_posts(hub, sort, limit, cursor).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Active,
    Exhausted,
}

struct FeedState {
    sort: SortMode,
    cursor: Option<PostCursor>,
    status: FeedStatus,
    seen: HashSet<PostKey>,
}

impl FeedState {
    fn new(sort: SortMode) -> Self {
        Self {
            sort,
            cursor: None,
            status: FeedStatus::Active,
            seen: HashSet::new(),
        }
    }
}

/// One page handed back by [`PostFeed::fetch_next`]
#[derive(Debug, Clone, Serialize)]
pub struct FeedPage {
    pub sort: SortMode,
    pub posts: Vec<Post>,
    pub exhausted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<PostCursor>,
}

/// Cursor position and the number of distinct posts served since the last reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorSnapshot {
    pub sort_mode: SortMode,
    pub last_author: Option<String>,
    pub last_permlink: Option<String>,
    pub exhausted: bool,
    pub loaded: usize,
}

pub struct PostFeed {
    state: Mutex<FeedState>,
    page_size: u32,
    last_used: std::sync::Mutex<Instant>,
}

impl PostFeed {
    pub fn new(sort: SortMode, page_size: u32) -> Self {
        Self {
            state: Mutex::new(FeedState::new(sort)),
            page_size: page_size.clamp(1, MAX_POSTS_PER_PAGE),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = Instant::now();
        }
    }

    fn last_used(&self) -> Instant {
        self.last_used
            .lock()
            .map(|last_used| *last_used)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    /// Switch sort mode; returns true when that reset the feed
    pub async fn set_sort_mode(&self, sort: SortMode) -> bool {
        let mut state = self.state.lock().await;
        if state.sort == sort {
            return false;
        }
        *state = FeedState::new(sort);
        true
    }

    /// Start over with the current sort mode
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        let sort = state.sort;
        *state = FeedState::new(sort);
    }

    /// Fetch the page after the cursor.
    ///
    /// An upstream failure leaves the cursor where it was.
    pub async fn fetch_next(
        &self,
        source: &dyn RankedPostSource,
        hub: &HubContext,
    ) -> Result<ChainResponse<FeedPage>> {
        let mut state = self.state.lock().await;

        if state.status == FeedStatus::Exhausted {
            return Ok(ChainResponse::success(FeedPage {
                sort: state.sort,
                posts: Vec::new(),
                exhausted: true,
                cursor: state.cursor.clone(),
            }));
        }

        let response = source
            .ranked_page(hub, state.sort, self.page_size, state.cursor.as_ref())
            .await?;
        if !response.success {
            return Ok(response.cast());
        }

        let page = response.data.unwrap_or_default();
        let page_len = page.len();
        let last_key = page.last().map(Post::key);

        let FeedState {
            cursor,
            seen,
            status,
            sort,
        } = &mut *state;

        // the bridge may echo the cursor post as the first item
        let fresh: Vec<Post> = page
            .into_iter()
            .filter(|post| {
                let key = post.key();
                cursor.as_ref() != Some(&key) && seen.insert(key)
            })
            .collect();

        let stalled = last_key.is_none() || last_key == *cursor || fresh.is_empty();
        if page_len < self.page_size as usize || stalled {
            *status = FeedStatus::Exhausted;
        }
        if let Some(key) = last_key {
            *cursor = Some(key);
        }

        debug!(
            tenant = %hub.tenant_id,
            sort = %sort,
            received = page_len,
            fresh = fresh.len(),
            exhausted = *status == FeedStatus::Exhausted,
            "Feed page fetched"
        );

        Ok(ChainResponse::success(FeedPage {
            sort: *sort,
            posts: fresh,
            exhausted: *status == FeedStatus::Exhausted,
            cursor: cursor.clone(),
        }))
    }

    pub async fn snapshot(&self) -> CursorSnapshot {
        let state = self.state.lock().await;
        CursorSnapshot {
            sort_mode: state.sort,
            last_author: state.cursor.as_ref().map(|c| c.author.clone()),
            last_permlink: state.cursor.as_ref().map(|c| c.permlink.clone()),
            exhausted: state.status == FeedStatus::Exhausted,
            loaded: state.seen.len(),
        }
    }
}

/// Idle feeds are dropped after this long by default
pub const DEFAULT_FEED_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Default upper bound on live feeds
pub const DEFAULT_MAX_FEEDS: usize = 10_000;

/// Owns one feed per (tenant, viewer)
pub struct CursorManager {
    feeds: DashMap<(String, String), Arc<PostFeed>>,
    page_size: u32,
    idle_ttl: Duration,
    max_feeds: usize,
}

impl CursorManager {
    pub fn new(page_size: u32, idle_ttl: Duration, max_feeds: usize) -> Self {
        Self {
            feeds: DashMap::new(),
            page_size,
            idle_ttl,
            max_feeds: max_feeds.max(1),
        }
    }

    /// Feed for a viewer of a hub, created on first use
    pub fn feed(&self, tenant_id: &str, viewer: &str, sort: SortMode) -> Arc<PostFeed> {
        let key = (tenant_id.to_string(), viewer.to_string());
        if let Some(feed) = self.feeds.get(&key) {
            feed.touch();
            return Arc::clone(feed.value());
        }

        self.evict_idle();
        while self.feeds.len() >= self.max_feeds {
            if !self.evict_least_recent() {
                break;
            }
        }

        let feed = Arc::clone(
            self.feeds
                .entry(key)
                .or_insert_with(|| Arc::new(PostFeed::new(sort, self.page_size)))
                .value(),
        );
        feed.touch();
        feed
    }

    /// Drop feeds unused for longer than the idle TTL; returns how many went
    pub fn evict_idle(&self) -> usize {
        let before = self.feeds.len();
        let ttl = self.idle_ttl;
        self.feeds.retain(|_, feed| feed.last_used().elapsed() < ttl);
        let evicted = before.saturating_sub(self.feeds.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.feeds.len(), "Idle feeds evicted");
        }
        evicted
    }

    fn evict_least_recent(&self) -> bool {
        let oldest = self
            .feeds
            .iter()
            .min_by_key(|entry| entry.value().last_used())
            .map(|entry| entry.key().clone());
        match oldest {
            Some(key) => self.feeds.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn remove(&self, tenant_id: &str, viewer: &str) -> bool {
        self.feeds
            .remove(&(tenant_id.to_string(), viewer.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

impl Default for CursorManager {
    fn default() -> Self {
        Self::new(MAX_POSTS_PER_PAGE, DEFAULT_FEED_IDLE_TTL, DEFAULT_MAX_FEEDS)
    }
}
