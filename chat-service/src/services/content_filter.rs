//! Input screening applied before a message touches any state.

use once_cell::sync::Lazy;
use regex::Regex;

/// Patterns that look like injection attempts: HTML script tags, template
/// interpolation and SQL `SELECT ... FROM` fragments.
static FORBIDDEN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<\s*/?\s*script\b",
        r"\{\{[\s\S]*?\}\}",
        r"\$\{[\s\S]*?\}",
        r"(?is)\bselect\b.+?\bfrom\b",
    ]
    .iter()
    .filter_map(|pattern| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(pattern = %pattern, error = %e, "Invalid content filter pattern");
            None
        }
    })
    .collect()
});

/// Why a message was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Missing,
    TooLong { length: usize, max: usize },
    Forbidden,
}

#[derive(Debug, Clone)]
pub struct ContentFilter {
    max_chars: usize,
}

impl ContentFilter {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Length is checked before patterns, so an oversized message is always a
    /// length violation whatever it contains.
    pub fn check<'a>(&self, message: Option<&'a str>) -> Result<&'a str, Rejection> {
        let message = match message {
            Some(m) if !m.trim().is_empty() => m,
            _ => return Err(Rejection::Missing),
        };

        let length = message.chars().count();
        if length > self.max_chars {
            return Err(Rejection::TooLong {
                length,
                max: self.max_chars,
            });
        }

        if FORBIDDEN_PATTERNS.iter().any(|re| re.is_match(message)) {
            return Err(Rejection::Forbidden);
        }

        Ok(message)
    }
}
