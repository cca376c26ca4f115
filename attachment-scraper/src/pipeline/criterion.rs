use std::fmt;

use thiserror::Error;

/// The criterion was blank
#[derive(Debug, Error, PartialEq, Eq)]
#[error("search criterion must not be empty")]
pub struct EmptyCriterion;

/// Originator whose messages are scraped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriterion(String);

impl SearchCriterion {
    /// Creates a criterion from user input, trimming surrounding whitespace
    ///
    /// # Errors
    ///
    /// Returns `EmptyCriterion` if nothing is left after trimming
    pub fn new(sender: impl AsRef<str>) -> Result<Self, EmptyCriterion> {
        let sender = sender.as_ref().trim();
        if sender.is_empty() {
            return Err(EmptyCriterion);
        }
        Ok(Self(sender.to_string()))
    }

    /// Mailbox search query selecting messages from the originator
    #[must_use]
    pub fn query(&self) -> String {
        format!("from:{}", self.0)
    }
}

impl fmt::Display for SearchCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
