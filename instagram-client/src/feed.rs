use crate::api::InstagramApiClient;
use crate::session::Session;
use async_trait::async_trait;
use orders_core::{CoreError, Cursor, FeedFetcher, FetchedBatch};
use std::sync::Arc;
use tracing::{debug, warn};

/// Incremental reader for one live broadcast's comments.
pub struct LiveCommentFeed {
    api: Arc<InstagramApiClient>,
    broadcast_id: String,
    page_cap: usize,
}

impl LiveCommentFeed {
    pub fn new(api: Arc<InstagramApiClient>, broadcast_id: impl Into<String>, page_cap: usize) -> Self {
        Self {
            api,
            broadcast_id: broadcast_id.into(),
            page_cap,
        }
    }

    pub fn broadcast_id(&self) -> &str {
        &self.broadcast_id
    }
}

#[async_trait]
impl FeedFetcher for LiveCommentFeed {
    type Session = Session;

    async fn fetch_since(&self, session: &Session, cursor: Cursor) -> Result<FetchedBatch, CoreError> {
        let page = self
            .api
            .get_live_comments(session, &self.broadcast_id, cursor.value())
            .await?;
        let batch = FetchedBatch::new(page.comments, page.raw_size, self.page_cap);

        debug!(
            "Fetched {} comments since {} ({} raw)",
            batch.comments.len(),
            cursor,
            batch.raw_size
        );
        if batch.possibly_truncated {
            warn!(
                "Comment page reached the cap of {} entries; some comments since {} may have been skipped",
                self.page_cap, cursor
            );
        }

        Ok(batch)
    }
}
