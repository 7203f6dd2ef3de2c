//! Line-level CODEOWNERS syntax.

use std::sync::LazyLock;

use glob::{MatchOptions, Pattern};
use regex::Regex;

use super::OwnershipError;

static LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(@*\S+)\s*(.*)$").expect("line regex is valid"));

static OWNER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"@{1,2}"?[\w\s]+"?"#).expect("owner regex is valid"));

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// One meaningful CODEOWNERS line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Line {
    Group { name: String, members: Vec<String> },
    Ignore { pattern: String },
    Path { pattern: String, owners: Vec<String> },
}

/// Classify a raw line, or `None` for blanks, comments and `Check(` directives.
pub(super) fn parse_line(raw: &str) -> Option<Line> {
    let line = match raw.split_once('#') {
        Some((before, _)) => before,
        None => raw,
    }
    .trim();
    if line.is_empty() || line.starts_with("Check(") {
        return None;
    }

    let caps = LINE_RE.captures(line)?;
    let head = caps.get(1)?.as_str();
    let rest = caps.get(2).map_or("", |m| m.as_str());

    if head.starts_with("@@") {
        return Some(Line::Group {
            name: group_name(head),
            members: owner_tokens(rest),
        });
    }
    if let Some(pattern) = head.strip_prefix('!') {
        return Some(Line::Ignore {
            pattern: normalize_pattern(pattern),
        });
    }
    Some(Line::Path {
        pattern: normalize_pattern(head),
        owners: owner_tokens(rest),
    })
}

/// Group references keep exactly one leading `@`.
pub(super) fn is_group(token: &str) -> bool {
    token.starts_with('@')
}

/// Declarations drop exactly the leading `@@`, so `@@@Name` declares `@Name`.
fn group_name(head: &str) -> String {
    let name = head.strip_prefix("@@").unwrap_or(head);
    match name.strip_prefix('@') {
        Some(rest) => format!("@{}", rest.trim_matches('"')),
        None => name.trim_matches('"').to_string(),
    }
}

/// Extract owner tokens. `@@name` refers to a group and becomes `@name`;
/// `@name` and `@"Display Name"` are individuals and lose the `@` and quotes.
fn owner_tokens(rest: &str) -> Vec<String> {
    OWNER_RE
        .find_iter(rest)
        .filter_map(|m| {
            let raw = m.as_str();
            let name = raw.trim_matches(|c: char| c == '@' || c == '"' || c.is_whitespace());
            if name.is_empty() {
                None
            } else if raw.starts_with("@@") {
                Some(format!("@{name}"))
            } else {
                Some(name.to_string())
            }
        })
        .collect()
}

/// Anchor a CODEOWNERS pattern for the glob engine.
///
/// Unanchored patterns match at any depth, directories match everything below
/// them, and a trailing `/**` needs an explicit `/*` to match files.
pub(super) fn normalize_pattern(pattern: &str) -> String {
    let mut pattern = if pattern.starts_with('/') || pattern.starts_with("**/") {
        pattern.to_string()
    } else {
        format!("**/{pattern}")
    };
    if pattern.ends_with('/') {
        pattern.push_str("**/*");
    } else if pattern.ends_with("/**") {
        pattern.push_str("/*");
    }
    pattern
}

/// A normalized pattern together with its compiled matcher.
#[derive(Debug, Clone)]
pub(super) struct PathRule {
    pub(super) pattern: String,
    matcher: Pattern,
}

impl PathRule {
    pub(super) fn compile(pattern: String) -> Result<Self, OwnershipError> {
        let matcher = Pattern::new(&pattern).map_err(|source| OwnershipError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        Ok(Self { pattern, matcher })
    }

    /// `path` must already carry its leading `/`.
    pub(super) fn matches(&self, path: &str) -> bool {
        self.matcher.matches_with(path, MATCH_OPTIONS)
    }
}
