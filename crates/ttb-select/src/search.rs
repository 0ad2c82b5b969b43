//! Search-order rules and resolvability checks.
//!
//! A downstream consumer finds a file by name alone, trying an ordered list
//! of directory rules. A rule is either
//!
//! - an exact parent directory, e.g. `/texlive/tex/latex/base`, or
//! - a recursive prefix, written with a trailing `//`, e.g.
//!   `/texlive/tex/latex//` (that directory and everything below it).
//!
//! Directories are compared as `/` + the content-relative parent, so the
//! candidate `texlive/tex/latex/foo/foo.sty` lives in `/texlive/tex/latex/foo`.
//!
//! For every name with more than one candidate path, the first rule that
//! matches any candidate decides: exactly one match resolves, more than one
//! is ambiguous, and no matching rule at all means the consumer will not
//! find the file.
//!
//! Search-order files support brace expansion: `/a/{b,c}/d//` expands to
//! `/a/b/d//` and `/a/c/d//`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{Result, SelectError};
use crate::index::Index;
use crate::ignore::slash_path;

/// Suffix marking a recursive rule.
pub const RECURSIVE_MARKER: &str = "//";

// ---------------------------------------------------------------------------
// SearchRule
// ---------------------------------------------------------------------------

/// One directory-resolution rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchRule {
    /// Matches files whose parent directory is exactly this one.
    Exact(PathBuf),
    /// Matches files anywhere under this directory.
    Recursive(PathBuf),
}

impl SearchRule {
    /// Parse one already-expanded rule line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        line.strip_suffix(RECURSIVE_MARKER).map_or_else(
            || Self::Exact(rooted(line)),
            |prefix| Self::Recursive(rooted(prefix)),
        )
    }

    /// Does this rule select files in directory `dir` (`/`-rooted)?
    #[must_use]
    pub fn matches_dir(&self, dir: &Path) -> bool {
        match self {
            Self::Exact(d) => dir == d,
            Self::Recursive(prefix) => dir.starts_with(prefix),
        }
    }

    /// Does this rule select the content-relative file `candidate`?
    #[must_use]
    pub fn matches_candidate(&self, candidate: &str) -> bool {
        self.matches_dir(&parent_dir(candidate))
    }
}

impl fmt::Display for SearchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(d) => write!(f, "{}", d.display()),
            Self::Recursive(p) if p == Path::new("/") => f.write_str(RECURSIVE_MARKER),
            Self::Recursive(p) => write!(f, "{}{RECURSIVE_MARKER}", p.display()),
        }
    }
}

/// Normalize a rule directory: always `/`-rooted, no trailing slash.
fn rooted(s: &str) -> PathBuf {
    let trimmed = s.trim_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(format!("/{trimmed}"))
    }
}

/// The `/`-rooted parent directory of a content-relative file path.
fn parent_dir(candidate: &str) -> PathBuf {
    let parent = candidate.rsplit_once('/').map_or("", |(dir, _)| dir);
    rooted(parent)
}

// ---------------------------------------------------------------------------
// SearchOrder
// ---------------------------------------------------------------------------

/// An ordered list of rules, plus their expanded text form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOrder {
    lines: Vec<String>,
    rules: Vec<SearchRule>,
}

impl SearchOrder {
    /// Load a search-order file. A missing file yields an empty order.
    ///
    /// # Errors
    /// Returns [`SelectError::Config`] if the file cannot be read or a line
    /// has malformed braces.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no search-order file");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(SelectError::config(
                    path,
                    format!("could not read search order: {e}"),
                ));
            }
        };
        Self::parse(&text).map_err(|e| match e {
            SelectError::Config { message, .. } => SelectError::config(path, message),
            other => other,
        })
    }

    /// Parse search-order text. Blank lines and lines starting with `#` are
    /// skipped; everything else is trimmed and brace-expanded.
    ///
    /// # Errors
    /// Returns [`SelectError::Config`] naming the first malformed line.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let expanded = expand_braces(line)
                .map_err(|msg| SelectError::config("", format!("line {}: {msg}", lineno + 1)))?;
            lines.extend(expanded);
        }
        Ok(Self::from_lines(lines))
    }

    /// Build an order from already-expanded lines.
    #[must_use]
    pub fn from_lines(lines: Vec<String>) -> Self {
        let rules = lines.iter().map(|l| SearchRule::parse(l)).collect();
        Self { lines, rules }
    }

    /// The rules, in priority order.
    #[must_use]
    pub fn rules(&self) -> &[SearchRule] {
        &self.rules
    }

    /// The expanded rule lines, as written to the bundle's `SEARCH` file.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Render the `SEARCH` file body.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Is `dir` (`/`-rooted) covered by any rule?
    #[must_use]
    pub fn is_searched(&self, dir: &Path) -> bool {
        self.rules.iter().any(|r| r.matches_dir(dir))
    }

    /// Resolve a name given its candidate paths.
    #[must_use]
    pub fn resolve<S: AsRef<str>>(&self, candidates: &[S]) -> Resolution {
        for (i, rule) in self.rules.iter().enumerate() {
            let mut matched: Vec<String> = Vec::new();
            for candidate in candidates {
                let candidate: &str = candidate.as_ref();
                if rule.matches_candidate(candidate) {
                    matched.push(candidate.to_owned());
                }
            }
            match matched.len() {
                0 => {}
                1 => {
                    return Resolution::Unique {
                        rule: i,
                        path: matched.pop().unwrap_or_default(),
                    };
                }
                _ => {
                    return Resolution::Ambiguous {
                        rule: i,
                        matches: matched,
                    };
                }
            }
        }
        Resolution::NotFound
    }
}

/// Expand `{a,b}` groups left to right.
///
/// # Errors
/// Returns a message for unbalanced, nested or empty groups.
pub fn expand_braces(s: &str) -> std::result::Result<Vec<String>, String> {
    let Some(open) = s.find(['{', '}']) else {
        return Ok(vec![s.to_owned()]);
    };
    if s.as_bytes()[open] == b'}' {
        return Err(format!("unbalanced `}}` in `{s}`"));
    }
    let close = s[open..]
        .find('}')
        .map(|i| open + i)
        .ok_or_else(|| format!("unbalanced `{{` in `{s}`"))?;

    let head = &s[..open];
    let mid = &s[open + 1..close];
    if mid.contains('{') {
        return Err(format!("nested braces in `{s}`"));
    }
    if mid.is_empty() {
        return Err(format!("empty brace group in `{s}`"));
    }

    // Only the tail can hold further groups, since `open` is the first brace.
    let tails = expand_braces(&s[close + 1..])?;

    let mut out = Vec::new();
    for alt in mid.split(',') {
        if alt.is_empty() {
            return Err(format!("empty alternative in `{s}`"));
        }
        for tail in &tails {
            out.push(format!("{head}{alt}{tail}"));
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// How the consumer's lookup ends for one name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Rule `rule` selects exactly one candidate.
    Unique {
        /// Index of the deciding rule.
        rule: usize,
        /// The selected candidate.
        path: String,
    },
    /// Rule `rule` is the first to match and selects several candidates.
    Ambiguous {
        /// Index of the deciding rule.
        rule: usize,
        /// The candidates it cannot tell apart.
        matches: Vec<String>,
    },
    /// No rule matches any candidate.
    NotFound,
}

impl Resolution {
    /// Did lookup settle on a single file?
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        matches!(self, Self::Unique { .. })
    }
}

/// A name the consumer cannot resolve to a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedName {
    /// The looked-up name.
    pub name: String,
    /// All of its candidate paths, sorted.
    pub candidates: Vec<String>,
    /// Why resolution failed (never `Unique`).
    pub resolution: Resolution,
}

impl UnresolvedName {
    /// One-line reason, with the deciding rule when there is one.
    #[must_use]
    pub fn reason(&self, order: &SearchOrder) -> String {
        match &self.resolution {
            Resolution::Ambiguous { rule, matches } => {
                let rule = order
                    .lines()
                    .get(*rule)
                    .map_or_else(|| format!("#{rule}"), Clone::clone);
                format!("ambiguous under `{rule}` ({} matches)", matches.len())
            }
            Resolution::NotFound => "not found by any rule".to_owned(),
            Resolution::Unique { .. } => "resolved".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// SearchValidator
// ---------------------------------------------------------------------------

/// Checks an index against a search order.
#[derive(Debug, Clone, Copy)]
pub struct SearchValidator<'a> {
    order: &'a SearchOrder,
}

impl<'a> SearchValidator<'a> {
    /// Validate against `order`.
    #[must_use]
    pub const fn new(order: &'a SearchOrder) -> Self {
        Self { order }
    }

    /// Every name with several candidates that the order cannot resolve
    /// uniquely, sorted by name.
    #[must_use]
    pub fn validate(&self, index: &Index) -> Vec<UnresolvedName> {
        let mut out = Vec::new();
        for (name, candidates) in index.by_name() {
            if candidates.len() < 2 {
                continue;
            }
            let resolution = self.order.resolve(&candidates);
            if resolution.is_unique() {
                continue;
            }
            let mut candidates: Vec<String> =
                candidates.into_iter().map(str::to_owned).collect();
            candidates.sort();
            tracing::debug!(name, ?resolution, "name does not resolve uniquely");
            out.push(UnresolvedName {
                name: name.to_owned(),
                candidates,
                resolution,
            });
        }
        out
    }
}

/// Every directory under `content_root` (as `/`-rooted paths, in sorted
/// walk order, root included) that no rule in `order` covers.
///
/// # Errors
/// Returns [`SelectError::Walk`] if the directory cannot be traversed.
pub fn unsearched_dirs(order: &SearchOrder, content_root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(content_root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(content_root) else {
            continue;
        };
        let dir = rooted(&slash_path(rel));
        if !order.is_searched(&dir) {
            out.push(dir);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
