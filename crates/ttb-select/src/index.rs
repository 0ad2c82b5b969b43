//! The name → location index.
//!
//! Each indexed name maps to one or more content-relative target paths
//! (`/`-separated, no leading slash), each with an optional digest.
//! Generated metadata files (`SHA256SUM`, `INDEX`) are listed without a
//! digest and render as `nohash`.
//!
//! The on-disk form is one line per `(name, path)` pair:
//!
//! ```text
//! <name> <path> <hex-digest | nohash>
//! ```
//!
//! sorted by name, then path. Fields are space-separated, so neither a name
//! nor a path may contain whitespace; the selector keeps such files out of
//! the bundle and [`Index::parse`] rejects lines that would need it.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::hash::ContentDigest;

/// Placeholder written instead of a digest for unhashed entries.
pub const NO_HASH: &str = "nohash";

/// One `(name, path, digest)` line of the index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    /// Basename the consumer looks up.
    pub name: String,
    /// Content-relative path of the file.
    pub path: String,
    /// Digest of the file, `None` for generated metadata.
    pub digest: Option<ContentDigest>,
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.digest {
            Some(d) => write!(f, "{} {} {d}", self.name, self.path),
            None => write!(f, "{} {} {NO_HASH}", self.name, self.path),
        }
    }
}

/// Error parsing an index file line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct IndexParseError {
    /// 1-based line number.
    pub line: usize,
    /// What was wrong.
    pub message: String,
}

/// Can `field` be written as one space-separated index field?
#[must_use]
pub fn is_indexable(field: &str) -> bool {
    !field.is_empty() && !field.contains(char::is_whitespace)
}

/// Name → candidate paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    entries: BTreeMap<String, Vec<(String, Option<ContentDigest>)>>,
}

impl Index {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` is available at `path`.
    ///
    /// Re-inserting an existing `(name, path)` pair replaces its digest.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        path: impl Into<String>,
        digest: Option<ContentDigest>,
    ) {
        let path = path.into();
        let slots = self.entries.entry(name.into()).or_default();
        if let Some(slot) = slots.iter_mut().find(|(p, _)| *p == path) {
            slot.1 = digest;
        } else {
            slots.push((path, digest));
        }
    }

    /// Candidate paths for `name`, in insertion order.
    pub fn candidates(&self, name: &str) -> impl Iterator<Item = &str> {
        self.entries
            .get(name)
            .into_iter()
            .flatten()
            .map(|(p, _)| p.as_str())
    }

    /// Does the index know `name`?
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Distinct names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Names paired with all their candidate paths, sorted by name.
    pub fn by_name(&self) -> impl Iterator<Item = (&str, Vec<&str>)> {
        self.entries.iter().map(|(name, slots)| {
            (
                name.as_str(),
                slots.iter().map(|(p, _)| p.as_str()).collect(),
            )
        })
    }

    /// Number of distinct names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing has been indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every `(name, path, digest)` line, sorted by name then path.
    #[must_use]
    pub fn sorted_entries(&self) -> Vec<IndexEntry> {
        let mut out: Vec<IndexEntry> = self
            .entries
            .iter()
            .flat_map(|(name, slots)| {
                slots.iter().map(move |(path, digest)| IndexEntry {
                    name: name.clone(),
                    path: path.clone(),
                    digest: *digest,
                })
            })
            .collect();
        out.sort();
        out
    }

    /// `(name, digest)` pairs of every hashed entry; input to the fingerprint.
    pub fn hashed_pairs(&self) -> impl Iterator<Item = (&str, &ContentDigest)> {
        self.entries.iter().flat_map(|(name, slots)| {
            slots
                .iter()
                .filter_map(move |(_, d)| d.as_ref().map(|d| (name.as_str(), d)))
        })
    }

    /// `(path, digest)` pairs of every hashed entry, sorted by path.
    #[must_use]
    pub fn hashed_paths(&self) -> Vec<(&str, &ContentDigest)> {
        let mut out: Vec<(&str, &ContentDigest)> = self
            .entries
            .values()
            .flatten()
            .filter_map(|(p, d)| d.as_ref().map(|d| (p.as_str(), d)))
            .collect();
        out.sort();
        out
    }

    /// Render the index file.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in self.sorted_entries() {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    /// Parse an index file produced by [`render`](Self::render).
    ///
    /// # Errors
    /// Returns [`IndexParseError`] for lines without exactly three fields or
    /// with a digest that is neither 64 hex characters nor `nohash`.
    pub fn parse(text: &str) -> Result<Self, IndexParseError> {
        let mut index = Self::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let err = |message: &str| IndexParseError {
                line: i + 1,
                message: message.to_owned(),
            };
            let mut fields = line.split(' ');
            let name = fields.next().unwrap_or_default();
            let path = fields.next().ok_or_else(|| err("missing path"))?;
            let hash = fields.next().ok_or_else(|| err("missing digest"))?;
            if fields.next().is_some() {
                return Err(err("more than three fields"));
            }
            if !is_indexable(name) || !is_indexable(path) {
                return Err(err("empty name or path"));
            }
            let digest = if hash == NO_HASH {
                None
            } else {
                Some(ContentDigest::from_hex(hash).ok_or_else(|| err("invalid digest"))?)
            };
            index.insert(name, path, digest);
        }
        Ok(index)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
