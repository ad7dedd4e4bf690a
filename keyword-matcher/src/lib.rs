//! Order token extraction from free-form chat text.
//!
//! Two grammars are supported:
//!
//! * [`GrammarKind::Amount`]: `<amount>[ ,]*+<count>`, e.g. `500+2` or `500, +2`.
//!   A match whose count exceeds the configured ceiling is dropped.
//! * [`GrammarKind::Grouped`]: `<A-L><1-12>[ ]*+<1-99999>`, e.g. `A5+12`.
//!
//! Digits may be ASCII or fullwidth (`５００+２`). Extraction never fails; text
//! without a valid token yields no matches.

use orders_core::{GrammarKind, MatchPolicy, OrderMatch};
use regex::{Captures, Regex};
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

static AMOUNT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<amount>[0-9０-９]+)[\s,]*\+(?P<count>[0-9０-９]+)")
        .expect("amount pattern is valid")
});

static GROUPED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<letter>[A-L])(?P<group>[1１][0-2０-２]|[1-9１-９])\s*\+(?P<number>[1-9１-９][0-9０-９]{0,4})",
    )
    .expect("grouped pattern is valid")
});

#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    grammar: GrammarKind,
    policy: MatchPolicy,
    ceiling: Option<u32>,
}

impl KeywordExtractor {
    /// Extractor with the grammar's default match policy and no ceiling.
    pub fn new(grammar: GrammarKind) -> Self {
        Self {
            grammar,
            policy: grammar.default_policy(),
            ceiling: None,
        }
    }

    /// Drop amount matches whose count is above `ceiling`.
    pub fn with_ceiling(mut self, ceiling: Option<u32>) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn grammar(&self) -> GrammarKind {
        self.grammar
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn ceiling(&self) -> Option<u32> {
        self.ceiling
    }

    /// Scans `text` left to right and returns the matches the policy keeps.
    pub fn extract(&self, text: &str) -> Vec<OrderMatch> {
        let pattern: &Regex = match self.grammar {
            GrammarKind::Amount => &*AMOUNT_PATTERN,
            GrammarKind::Grouped => &*GROUPED_PATTERN,
        };

        match self.policy {
            // Only the leftmost token is considered; if it is rejected the
            // comment yields nothing.
            MatchPolicy::FirstOnly => pattern
                .captures(text)
                .and_then(|caps| self.parse(&caps))
                .into_iter()
                .collect(),
            MatchPolicy::All => pattern
                .captures_iter(text)
                .filter_map(|caps| self.parse(&caps))
                .collect(),
        }
    }

    fn parse(&self, caps: &Captures) -> Option<OrderMatch> {
        match self.grammar {
            GrammarKind::Amount => self.parse_amount(caps),
            GrammarKind::Grouped => self.parse_grouped(caps),
        }
    }

    fn parse_amount(&self, caps: &Captures) -> Option<OrderMatch> {
        let amount = parse_digits::<u64>(&caps["amount"])?;
        let count = parse_digits::<u32>(&caps["count"])?;
        if let Some(ceiling) = self.ceiling {
            if count > ceiling {
                debug!("Dropping {}+{}: count above ceiling {}", amount, count, ceiling);
                return None;
            }
        }
        Some(OrderMatch::Amount { amount, count })
    }

    fn parse_grouped(&self, caps: &Captures) -> Option<OrderMatch> {
        let letter = caps["letter"].chars().next()?;
        let group = parse_digits::<u8>(&caps["group"])?;
        let number = parse_digits::<u32>(&caps["number"])?;
        Some(OrderMatch::Grouped {
            number,
            letter,
            group,
        })
    }
}

/// Parses a run of ASCII or fullwidth digits; `None` on overflow.
fn parse_digits<T: FromStr>(digits: &str) -> Option<T> {
    let ascii: String = digits
        .chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32),
            '0'..='9' => Some(c),
            _ => None,
        })
        .collect::<Option<String>>()?;
    ascii.parse().ok()
}
