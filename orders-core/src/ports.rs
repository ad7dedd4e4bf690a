//! Seams between the poll loop and its collaborators.

use crate::error::CoreError;
use crate::types::{Comment, Cursor, FetchedBatch, OrderMatch, OrderRecord};
use async_trait::async_trait;

/// Yields an authenticated handle for feed requests.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: Send + Sync;

    /// Returns a usable session. With `force_fresh` any persisted session is
    /// discarded and full credential authentication is performed.
    async fn acquire(&self, force_fresh: bool) -> Result<Self::Session, CoreError>;
}

/// Issues one incremental comment request per poll tick.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    type Session: Send + Sync;

    async fn fetch_since(
        &self,
        session: &Self::Session,
        cursor: Cursor,
    ) -> Result<FetchedBatch, CoreError>;
}

/// Durable append-only destination for matched orders.
pub trait OrderSink: Send {
    fn record(&mut self, order: &OrderMatch, comment: &Comment) -> Result<OrderRecord, CoreError>;
}

/// Renders and prints a receipt for one matched order.
#[async_trait]
pub trait ReceiptPrinter: Send + Sync {
    async fn print_receipt(
        &self,
        username: &str,
        text: &str,
        order: &OrderMatch,
    ) -> Result<(), CoreError>;
}
