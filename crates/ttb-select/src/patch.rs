//! Patch discovery and application.
//!
//! Diff files live in the overlay tree next to replacement files. A diff's
//! target is named by its file name minus the final extension, so
//! `include/patches/hyperref.sty.diff` patches whichever `hyperref.sty` ends
//! up selected, overlay or base.
//!
//! Application is delegated to a [`PatchApplier`]. The default,
//! [`ExternalPatch`], runs the system `patch` utility. A failed application
//! is an outcome, not an error: the engine counts it and carries on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{trace, warn};
use walkdir::WalkDir;

use crate::error::{Result, SelectError};
use crate::ignore::slash_path;

/// Default glob selecting diff files in the overlay tree.
pub const DEFAULT_DIFF_GLOB: &str = "*.diff";

// ---------------------------------------------------------------------------
// DiffMatcher
// ---------------------------------------------------------------------------

/// Decides which overlay files are diffs.
///
/// The glob is matched against the overlay-relative path; `*` also matches
/// `/`, so `*.diff` finds diffs at any depth.
#[derive(Debug, Clone)]
pub struct DiffMatcher {
    pattern: glob::Pattern,
}

impl DiffMatcher {
    /// Compile a diff glob.
    ///
    /// # Errors
    /// Returns [`SelectError::Config`] for an invalid glob.
    pub fn new(glob: &str) -> Result<Self> {
        let pattern = glob::Pattern::new(glob)
            .map_err(|e| SelectError::config(glob, format!("invalid diff glob: {e}")))?;
        Ok(Self { pattern })
    }

    /// Is the overlay-relative path `rel` a diff file?
    #[must_use]
    pub fn matches(&self, rel: &Path) -> bool {
        self.pattern.matches(&slash_path(rel))
    }

    /// The basename a diff file patches: its file name minus the final
    /// extension. `None` for names without one.
    #[must_use]
    pub fn target_name(diff: &Path) -> Option<String> {
        diff.extension()?;
        diff.file_stem().map(|s| s.to_string_lossy().into_owned())
    }

    /// The glob as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Default for DiffMatcher {
    fn default() -> Self {
        Self {
            pattern: glob::Pattern::new(DEFAULT_DIFF_GLOB).unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// PatchSet
// ---------------------------------------------------------------------------

/// Mapping from target basename to the diff that patches it.
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    diffs: BTreeMap<String, PathBuf>,
    conflicts: usize,
}

impl PatchSet {
    /// Find every diff under `overlay_root`.
    ///
    /// Traversal is sorted by file name, so when two diffs name the same
    /// target the first one in that order is kept. A missing overlay root
    /// yields an empty set.
    ///
    /// # Errors
    /// Returns [`SelectError::Walk`] if the tree cannot be traversed.
    pub fn scan(overlay_root: &Path, matcher: &DiffMatcher) -> Result<Self> {
        let mut set = Self::default();
        if !overlay_root.is_dir() {
            return Ok(set);
        }

        for entry in WalkDir::new(overlay_root).sort_by_file_name() {
            let entry = entry?;
            if !crate::selector::is_file_entry(&entry) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(overlay_root) else {
                continue;
            };
            if !matcher.matches(rel) {
                continue;
            }
            let Some(target) = DiffMatcher::target_name(entry.path()) else {
                continue;
            };
            set.insert(target, entry.into_path());
        }

        Ok(set)
    }

    /// Register `diff` as the patch for `target`. Returns `false` (and counts
    /// a conflict) if `target` already has a diff.
    pub fn insert(&mut self, target: String, diff: PathBuf) -> bool {
        if let Some(existing) = self.diffs.get(&target) {
            warn!(
                target = %target,
                kept = %existing.display(),
                discarded = %diff.display(),
                "diff target conflicts with an earlier diff, ignoring"
            );
            self.conflicts += 1;
            return false;
        }
        trace!(target = %target, diff = %diff.display(), "found diff");
        self.diffs.insert(target, diff);
        true
    }

    /// Is there a diff for `name`?
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.diffs.contains_key(name)
    }

    /// The diff for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.diffs.get(name).map(PathBuf::as_path)
    }

    /// Number of distinct targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    /// `true` when no diffs were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    /// Number of diffs discarded because their target was already taken.
    #[must_use]
    pub const fn conflicts(&self) -> usize {
        self.conflicts
    }

    /// `(target, diff)` pairs in target order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.diffs.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }
}

// ---------------------------------------------------------------------------
// PatchApplier
// ---------------------------------------------------------------------------

/// Result of applying one diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The target was rewritten in place.
    Applied,
    /// The patch step failed; the target may or may not have been touched.
    Failed {
        /// Exit code, when the process ran and exited normally.
        code: Option<i32>,
        /// Captured stderr or spawn error.
        detail: String,
    },
}

impl PatchOutcome {
    /// Did the patch apply?
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Applies a diff to a staged file in place.
pub trait PatchApplier {
    /// Apply `diff` to `target`, modifying `target`.
    fn apply(&self, target: &Path, diff: &Path) -> PatchOutcome;
}

/// Runs an external `patch`-compatible program as
/// `<program> --quiet --no-backup-if-mismatch --reject-file=- <target> <diff>`.
///
/// Rejected hunks are discarded rather than written next to the target, so
/// a failed patch never leaves a `.rej` file in the content area.
#[derive(Debug, Clone)]
pub struct ExternalPatch {
    program: String,
}

impl ExternalPatch {
    /// Use `program` instead of `patch`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The program this applier runs.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for ExternalPatch {
    fn default() -> Self {
        Self::new("patch")
    }
}

impl PatchApplier for ExternalPatch {
    fn apply(&self, target: &Path, diff: &Path) -> PatchOutcome {
        let output = Command::new(&self.program)
            .args(["--quiet", "--no-backup-if-mismatch", "--reject-file=-"])
            .arg(target)
            .arg(diff)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(out) if out.status.success() => PatchOutcome::Applied,
            Ok(out) => {
                let mut detail = String::from_utf8_lossy(&out.stderr).trim().to_owned();
                if detail.is_empty() {
                    detail = String::from_utf8_lossy(&out.stdout).trim().to_owned();
                }
                PatchOutcome::Failed {
                    code: out.status.code(),
                    detail,
                }
            }
            Err(e) => PatchOutcome::Failed {
                code: None,
                detail: format!("could not run `{}`: {e}", self.program),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
