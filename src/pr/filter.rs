use std::collections::BTreeSet;

use super::types::RawPullRequest;

/// Label excluded when the caller does not supply its own exclusion set.
pub const DEFAULT_EXCLUDED_LABEL: &str = "dependencies";

/// Label-based inclusion rule.
///
/// Exclusion always wins: a record carrying any excluded label is dropped
/// even when it also carries the required label. Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    required: Option<String>,
    excluded: BTreeSet<String>,
}

impl Default for LabelFilter {
    fn default() -> Self {
        LabelFilter {
            required: None,
            excluded: BTreeSet::from([DEFAULT_EXCLUDED_LABEL.to_string()]),
        }
    }
}

impl LabelFilter {
    /// An empty `excluded` set disables exclusion entirely.
    pub fn new<I, S>(required: Option<String>, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LabelFilter {
            required,
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    pub fn required(&self) -> Option<&str> {
        self.required.as_deref()
    }

    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    pub fn include(&self, record: &RawPullRequest) -> bool {
        if record.labels.iter().any(|l| self.excluded.contains(l)) {
            return false;
        }
        match &self.required {
            Some(required) => record.labels.iter().any(|l| l == required),
            None => true,
        }
    }
}
