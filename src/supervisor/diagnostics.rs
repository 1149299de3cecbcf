//! Failure detection in free-text diagnostic output.

use regex::{Regex, RegexBuilder};

/// Keywords that mark a diagnostic line as failure-indicating.
pub const DEFAULT_ERROR_KEYWORDS: &[&str] = &[
    "error",
    "failed",
    "corrupt",
    "unable",
    "invalid",
    "refused",
    "could not",
];

/// Case-insensitive matcher over a fixed keyword set.
#[derive(Debug, Clone)]
pub struct DiagnosticMatcher {
    pattern: Option<Regex>,
}

impl DiagnosticMatcher {
    /// Build a matcher for `keywords`. Keywords are matched literally as
    /// substrings; an empty set never matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the combined pattern exceeds the regex size limit.
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(AsRef::as_ref)
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    #[must_use]
    pub fn is_failure(&self, line: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(line))
    }
}

impl Default for DiagnosticMatcher {
    fn default() -> Self {
        // The built-in keywords are plain literals, well under the size limit.
        Self::new(DEFAULT_ERROR_KEYWORDS).unwrap_or(Self { pattern: None })
    }
}
