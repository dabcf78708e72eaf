//! Splits "A but not B" style queries into a positive and a negative part.

use regex::Regex;
use std::sync::OnceLock;

const NEGATIVE_TRIGGERS: &[&str] = &[
    "but not",
    "without",
    "and not",
    "except",
    "do not have",
    "don't have",
    "not including",
    "excluding",
];

static TRIGGER_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn trigger_pattern() -> Option<&'static Regex> {
    TRIGGER_PATTERN
        .get_or_init(|| {
            let alternatives = NEGATIVE_TRIGGERS
                .iter()
                .map(|t| regex::escape(t))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!("(?i) (?:{alternatives}) ")).ok()
        })
        .as_ref()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub positive: String,
    pub negative: Option<String>,
}

/// Split at the first negation trigger. Triggers only count with a space on
/// each side, so `"without"` at the very start of a query is left alone.
pub fn parse_query(text: &str) -> ParsedQuery {
    let whole = ParsedQuery {
        positive: text.trim().to_string(),
        negative: None,
    };

    let Some(m) = trigger_pattern().and_then(|re| re.find(text)) else {
        return whole;
    };

    let positive = text[..m.start()].trim();
    let negative = text[m.end()..].trim();
    if positive.is_empty() {
        return whole;
    }

    ParsedQuery {
        positive: positive.to_string(),
        negative: (!negative.is_empty()).then(|| negative.to_string()),
    }
}
