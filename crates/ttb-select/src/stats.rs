//! Run statistics and the end-of-run summary.

use std::cmp::Ordering;
use std::fmt::Write as _;

use serde::Serialize;

/// Counters accumulated over one selection run.
///
/// None of these are errors; they describe how much the run had to
/// arbitrate and are flushed into the summary at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PickStatistics {
    /// Overlay files staged.
    pub overlay_added: usize,
    /// Overlay files discarded because another overlay file had the same name.
    pub overlay_conflicts: usize,
    /// Base files staged.
    pub base_added: usize,
    /// Base files skipped by ignore rules.
    pub ignored: usize,
    /// Files skipped because their name or path contains whitespace.
    pub unindexable: usize,
    /// Base files skipped because an overlay file has the same name.
    pub replaced: usize,
    /// Basenames supplied with more than one distinct content.
    pub clashes: usize,
    /// Later sources excluded because their content differed (one per file).
    pub clash_contenders: usize,
    /// Later sources dropped because their content was identical.
    pub identical: usize,
    /// Distinct diff targets discovered.
    pub patches_found: usize,
    /// Diffs discarded because their target already had one.
    pub patch_conflicts: usize,
    /// Diffs applied successfully.
    pub patches_applied: usize,
    /// Diffs whose application failed.
    pub patch_failures: usize,
}

impl PickStatistics {
    /// Total files staged into the content area.
    #[must_use]
    pub const fn total_files(&self) -> usize {
        self.overlay_added + self.base_added
    }

    /// Did we find as many, fewer, or more patches than we applied?
    #[must_use]
    pub fn compare_patch_found_applied(&self) -> Ordering {
        self.patches_found.cmp(&self.patches_applied)
    }

    /// `true` when every discovered diff was applied exactly once.
    #[must_use]
    pub fn patches_balanced(&self) -> bool {
        self.compare_patch_found_applied() == Ordering::Equal
    }

    /// Human-readable boxed summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let rows: [(&str, String); 12] = [
            ("overlay conflicts", self.overlay_conflicts.to_string()),
            ("files ignored", self.ignored.to_string()),
            ("unindexable names", self.unindexable.to_string()),
            ("files replaced", self.replaced.to_string()),
            ("name clashes", self.clashes.to_string()),
            ("identical duplicates", self.identical.to_string()),
            ("diff conflicts", self.patch_conflicts.to_string()),
            (
                "diffs applied/found",
                format!("{}/{}", self.patches_applied, self.patches_found),
            ),
            ("diff failures", self.patch_failures.to_string()),
            ("overlay files", self.overlay_added.to_string()),
            ("base files", self.base_added.to_string()),
            ("total files", self.total_files().to_string()),
        ];

        let mut out = String::new();
        let _ = writeln!(out, "{:=^39}", " Summary ");
        for (i, (label, value)) in rows.iter().enumerate() {
            if i == 9 {
                let _ = writeln!(out, "    {}", "=".repeat(31));
            }
            let _ = writeln!(out, "    {:<22}{value}", format!("{label}:"));
        }
        let _ = write!(out, "{}", "=".repeat(39));
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
