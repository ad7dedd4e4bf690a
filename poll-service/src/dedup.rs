use orders_core::{Comment, Cursor};
use std::collections::HashSet;

/// Remembers which comments were already evaluated and how far the feed has
/// been read. Both live for the lifetime of the process.
#[derive(Debug, Default)]
pub struct DedupTracker {
    seen: HashSet<String>,
    cursor: Cursor,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Comments not seen before, in batch order. Every returned id is marked
    /// seen, so repeats inside the same batch are admitted once.
    pub fn admit(&mut self, comments: &[Comment]) -> Vec<Comment> {
        comments
            .iter()
            .filter(|comment| self.seen.insert(comment.id.clone()))
            .cloned()
            .collect()
    }

    /// Moves the cursor to the newest `created_at` in `comments`; never back.
    pub fn advance_cursor(&mut self, comments: &[Comment]) -> Cursor {
        if let Some(newest) = comments.iter().map(|comment| comment.created_at).max() {
            self.cursor = self.cursor.max(Cursor::new(newest));
        }
        self.cursor
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
