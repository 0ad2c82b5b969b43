//! Ignore rules for the base tree.
//!
//! One regular expression per line. Everything from the first `#` on a line
//! is a comment; lines that are blank after stripping are skipped. Each
//! pattern must match the *whole* base-relative path (`/`-separated), so
//! `doc/.*` excludes everything under `doc/` but not `tex/latex/doc/x.sty`.
//! The path is tried both bare and rooted (`doc/x` and `/doc/x`), so
//! `/doc/.*` is equivalent to `doc/.*`.

use std::path::{Component, Path};

use regex::Regex;

use crate::error::{Result, SelectError};

/// A single compiled ignore pattern.
#[derive(Debug, Clone)]
struct IgnoreRule {
    /// The pattern exactly as written.
    source: String,
    regex: Regex,
}

/// Ordered set of ignore rules.
///
/// Matching is a pure predicate, so rule order never changes the outcome;
/// it is preserved only so diagnostics can point at the first matching line.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRuleSet {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRuleSet {
    /// A rule set that ignores nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load rules from `path`.
    ///
    /// A missing file yields an empty rule set.
    ///
    /// # Errors
    /// Returns [`SelectError::Config`] if the file exists but cannot be read
    /// or contains an invalid pattern.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no ignore file, selecting everything");
                return Ok(Self::empty());
            }
            Err(e) => {
                return Err(SelectError::config(
                    path,
                    format!("could not read ignore file: {e}"),
                ));
            }
        };
        Self::parse(&text).map_err(|e| match e {
            SelectError::Config { message, .. } => SelectError::config(path, message),
            other => other,
        })
    }

    /// Parse rules from text.
    ///
    /// # Errors
    /// Returns [`SelectError::Config`] (with an empty path) naming the line of
    /// the first invalid pattern.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let pattern = strip_comment(line);
            if pattern.is_empty() {
                continue;
            }
            let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                SelectError::config(
                    "",
                    format!("line {}: invalid pattern `{pattern}`: {e}", lineno + 1),
                )
            })?;
            rules.push(IgnoreRule {
                source: pattern.to_owned(),
                regex,
            });
        }
        Ok(Self { rules })
    }

    /// Does any rule fully match `rel`?
    #[must_use]
    pub fn matches(&self, rel: &str) -> bool {
        self.first_match(rel).is_some()
    }

    /// The first rule (as written) that fully matches `rel` or `/rel`, if
    /// any.
    #[must_use]
    pub fn first_match(&self, rel: &str) -> Option<&str> {
        if self.rules.is_empty() {
            return None;
        }
        let rooted = format!("/{rel}");
        self.rules
            .iter()
            .find(|r| r.regex.is_match(rel) || r.regex.is_match(&rooted))
            .map(|r| r.source.as_str())
    }

    /// [`matches`](Self::matches) for a relative filesystem path.
    #[must_use]
    pub fn matches_path(&self, rel: &Path) -> bool {
        self.matches(&slash_path(rel))
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` when nothing will be ignored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or_default().trim()
}

/// Join the normal components of a relative path with `/`.
///
/// Used wherever a path becomes part of a rule match, an index entry or a
/// hash input, so results are identical on every platform.
#[must_use]
pub fn slash_path(rel: &Path) -> String {
    let mut out = String::new();
    for comp in rel.components() {
        if let Component::Normal(part) = comp {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&part.to_string_lossy());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
