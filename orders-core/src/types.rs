use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single live chat comment as returned by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub created_at: i64,
}

/// Watermark of the newest `created_at` observed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(i64);

impl Cursor {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One fetch response.
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    pub comments: Vec<Comment>,
    /// Number of comments the provider returned before any filtering.
    pub raw_size: usize,
    /// Set when `raw_size` reached the provider's page cap.
    pub possibly_truncated: bool,
}

impl FetchedBatch {
    /// `raw_size` counts every entry in the response, including ones that
    /// could not be turned into a [`Comment`].
    pub fn new(comments: Vec<Comment>, raw_size: usize, page_cap: usize) -> Self {
        Self {
            comments,
            raw_size,
            possibly_truncated: page_cap > 0 && raw_size >= page_cap,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }
}

/// Which order grammar the extractor applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrammarKind {
    /// `<amount> + <count>`, e.g. `500+2`.
    Amount,
    /// `<letter A-L><1-12> + <number>`, e.g. `A5+12`.
    Grouped,
}

impl GrammarKind {
    /// Output columns for this grammar, header order.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            GrammarKind::Amount => &[
                "timestamp",
                "amount",
                "count",
                "user_id",
                "username",
                "text",
            ],
            GrammarKind::Grouped => &[
                "timestamp",
                "number",
                "group_letter",
                "group_number",
                "user_id",
                "username",
                "text",
            ],
        }
    }

    pub fn default_policy(&self) -> MatchPolicy {
        match self {
            GrammarKind::Amount => MatchPolicy::FirstOnly,
            GrammarKind::Grouped => MatchPolicy::All,
        }
    }
}

impl fmt::Display for GrammarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarKind::Amount => write!(f, "amount"),
            GrammarKind::Grouped => write!(f, "grouped"),
        }
    }
}

/// How many matches a single comment may yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    FirstOnly,
    All,
}

/// A structured token extracted from comment text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderMatch {
    Amount { amount: u64, count: u32 },
    Grouped { number: u32, letter: char, group: u8 },
}

impl OrderMatch {
    pub fn grammar(&self) -> GrammarKind {
        match self {
            OrderMatch::Amount { .. } => GrammarKind::Amount,
            OrderMatch::Grouped { .. } => GrammarKind::Grouped,
        }
    }

    /// Extracted fields in output column order.
    pub fn fields(&self) -> Vec<String> {
        match self {
            OrderMatch::Amount { amount, count } => vec![amount.to_string(), count.to_string()],
            OrderMatch::Grouped {
                number,
                letter,
                group,
            } => vec![number.to_string(), letter.to_string(), group.to_string()],
        }
    }

    /// Short filesystem-safe label, e.g. `A5_12` or `500x2`.
    pub fn tag(&self) -> String {
        match self {
            OrderMatch::Amount { amount, count } => format!("{amount}x{count}"),
            OrderMatch::Grouped {
                number,
                letter,
                group,
            } => format!("{letter}{group}_{number}"),
        }
    }
}

impl fmt::Display for OrderMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderMatch::Amount { amount, count } => write!(f, "{amount}+{count}"),
            OrderMatch::Grouped {
                number,
                letter,
                group,
            } => write!(f, "{letter}{group}+{number}"),
        }
    }
}

/// A persisted order row.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub timestamp: DateTime<Local>,
    pub order: OrderMatch,
    pub user_id: String,
    pub username: String,
    pub text: String,
}

impl OrderRecord {
    pub fn new(order: OrderMatch, comment: &Comment) -> Self {
        Self {
            timestamp: Local::now(),
            order,
            user_id: comment.user_id.clone(),
            username: comment.username.clone(),
            text: comment.text.clone(),
        }
    }

    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(7);
        row.push(self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string());
        row.extend(self.order.fields());
        row.push(self.user_id.clone());
        row.push(self.username.clone());
        row.push(self.text.clone());
        row
    }
}
