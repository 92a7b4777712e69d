//! Content safety filters
//!
//! Filters run on the prompt before any model call and on the final answer
//! before it is recorded. Any violation aborts the invocation with a
//! [`TollgateError::Safety`].

use regex::{Regex, RegexBuilder};

use crate::error::{Result, TollgateError};

/// Checks text and reports violations
pub trait SafetyFilter: Send + Sync {
    /// Names of the rules `text` violates; empty when clean
    fn check(&self, text: &str) -> Vec<String>;

    fn enforce(&self, text: &str) -> Result<()> {
        let violations = self.check(text);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(TollgateError::Safety(format!(
                "Safety filter triggered: {}",
                violations.join(", ")
            )))
        }
    }
}

/// Run every filter in order, stopping at the first violation
pub fn enforce_all(filters: &[std::sync::Arc<dyn SafetyFilter>], text: &str) -> Result<()> {
    filters.iter().try_for_each(|f| f.enforce(text))
}

/// Rejects text containing any blocked term.
///
/// Terms match case-insensitively on word boundaries.
#[derive(Debug, Clone)]
pub struct BlocklistFilter {
    patterns: Vec<(String, Regex)>,
}

impl BlocklistFilter {
    pub fn new<I, S>(terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = terms
            .into_iter()
            .map(|term| {
                let term = term.into();
                let regex = RegexBuilder::new(&format!(r"\b{}\b", regex::escape(&term)))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        TollgateError::Configuration(format!("Invalid blocklist term {term}: {e}"))
                    })?;
                Ok((term, regex))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl SafetyFilter for BlocklistFilter {
    fn check(&self, text: &str) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|(_, regex)| regex.is_match(text))
            .map(|(term, _)| term.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_blocklist_matches_whole_words() {
        let filter = BlocklistFilter::new(["secret", "drop table"]).unwrap();
        assert_eq!(filter.check("the SECRET plan"), vec!["secret"]);
        assert!(filter.check("secretary").is_empty());
        assert_eq!(filter.check("please Drop Table users"), vec!["drop table"]);
    }

    #[test]
    fn test_enforce_lists_violations() {
        let filter = BlocklistFilter::new(["alpha", "beta"]).unwrap();
        let err = filter.enforce("alpha and beta").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Safety error: Safety filter triggered: alpha, beta"
        );
        assert!(filter.enforce("gamma").is_ok());
    }

    #[test]
    fn test_enforce_all() {
        let filters: Vec<Arc<dyn SafetyFilter>> = vec![
            Arc::new(BlocklistFilter::new(["one"]).unwrap()),
            Arc::new(BlocklistFilter::new(["two"]).unwrap()),
        ];
        assert!(enforce_all(&filters, "three").is_ok());
        assert!(matches!(
            enforce_all(&filters, "two"),
            Err(TollgateError::Safety(_))
        ));
    }
}
