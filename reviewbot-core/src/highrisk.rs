//! High-risk file classification.
//!
//! The list is a newline-delimited set of path prefixes. Matching is a literal
//! prefix comparison, not a glob.

/// Path prefixes whose files need extra scrutiny.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighRiskList {
    prefixes: Vec<String>,
}

impl HighRiskList {
    /// Parse one prefix per non-blank line. Surrounding whitespace is ignored.
    pub fn parse(text: &str) -> Self {
        let prefixes = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Whether `path` starts with any listed prefix.
    pub fn is_high_risk(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Count the entries of `paths` that fall under a listed prefix.
    pub fn count_high_risk_files<S: AsRef<str>>(&self, paths: &[S]) -> usize {
        paths
            .iter()
            .filter(|path| self.is_high_risk(path.as_ref()))
            .count()
    }
}
