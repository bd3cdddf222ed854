// src/prefilter.rs
//! Cheap local rules applied before any state mutation or model call.
//!
//! Pure and order-preserving: running it twice over the same input yields the
//! same output.

use crate::ingest::types::Candidate;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefilterRules {
    /// Lower-cased allow-list; empty means no keyword filtering.
    keywords: Vec<String>,
    /// Candidates without an engagement metric always pass this rule.
    pub min_engagement: Option<f64>,
    /// Minimum chars of `title + " " + summary`; 0 disables the rule.
    pub min_length: usize,
}

impl PrefilterRules {
    pub fn new(keywords: Vec<String>, min_engagement: Option<f64>, min_length: usize) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keywords,
            min_engagement,
            min_length,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn passes(&self, c: &Candidate) -> bool {
        if self.min_length > 0 {
            let len = c.title.chars().count() + 1 + c.summary.chars().count();
            if len < self.min_length {
                return false;
            }
        }

        if !self.keywords.is_empty() {
            let title = c.title.to_lowercase();
            let summary = c.summary.to_lowercase();
            if !self
                .keywords
                .iter()
                .any(|k| title.contains(k.as_str()) || summary.contains(k.as_str()))
            {
                return false;
            }
        }

        match (self.min_engagement, c.engagement) {
            (Some(min), Some(e)) => e >= min,
            _ => true,
        }
    }
}

/// Keep candidates passing every rule, in input order.
pub fn filter(candidates: &[Candidate], rules: &PrefilterRules) -> Vec<Candidate> {
    candidates
        .iter()
        .filter(|c| rules.passes(c))
        .cloned()
        .collect()
}
