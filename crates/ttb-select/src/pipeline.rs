//! End-to-end bundle assembly.
//!
//! [`build_bundle`] validates an [`EngineConfig`], loads the rule files,
//! runs the [`Selector`], writes the content-area metadata and the
//! diagnostic reports, and returns a [`BuildSummary`]. A fatal error rolls
//! back every output written and removes the staged content.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{IoContext, Result, SelectError};
use crate::hash::{ContentDigest, bundle_fingerprint};
use crate::ignore::IgnoreRuleSet;
use crate::patch::{DEFAULT_DIFF_GLOB, DiffMatcher, PatchApplier, PatchSet};
use crate::report::{FINGERPRINT_FILE, INDEX_FILE, ReportWriter, SEARCH_FILE};
use crate::search::{SearchOrder, SearchValidator, unsearched_dirs};
use crate::selector::{Selector, SourceTrees};
use crate::stats::PickStatistics;

/// Name of the content area inside the output directory.
pub const CONTENT_DIR: &str = "content";

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// All paths and knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root of the base distribution tree.
    pub base_root: PathBuf,
    /// Root of the overlay tree; may be absent.
    pub overlay_root: PathBuf,
    /// Ignore rules; a missing file means no rules.
    pub ignore_file: PathBuf,
    /// Search order; a missing file means no rules.
    pub search_order_file: PathBuf,
    /// Glob selecting diff files in the overlay tree.
    pub diff_glob: String,
    /// Where `content/` and the reports go.
    pub output_dir: PathBuf,
    /// Also write `unsearched-dirs`.
    pub debug_reports: bool,
    /// `patch`-compatible program used for diffs.
    pub patch_program: String,
}

impl EngineConfig {
    /// Config using the conventional relative names `include`, `ignore` and
    /// `search-order` for the remaining inputs.
    #[must_use]
    pub fn new(base_root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_root: base_root.into(),
            overlay_root: PathBuf::from("include"),
            ignore_file: PathBuf::from("ignore"),
            search_order_file: PathBuf::from("search-order"),
            diff_glob: DEFAULT_DIFF_GLOB.to_owned(),
            output_dir: output_dir.into(),
            debug_reports: true,
            patch_program: "patch".to_owned(),
        }
    }

    /// `<output_dir>/content`.
    #[must_use]
    pub fn content_dir(&self) -> PathBuf {
        self.output_dir.join(CONTENT_DIR)
    }

    /// Check everything that can be checked before touching the disk.
    ///
    /// # Errors
    /// [`SelectError::Config`] when the base root is not a directory, the
    /// overlay root or output directory exists but is not a directory, the
    /// diff glob is invalid, the patch program is empty, or the content
    /// directory is non-empty.
    pub fn validate(&self) -> Result<()> {
        if !self.base_root.is_dir() {
            return Err(SelectError::config(
                &self.base_root,
                "base tree does not exist or is not a directory",
            ));
        }
        if self.overlay_root.exists() && !self.overlay_root.is_dir() {
            return Err(SelectError::config(
                &self.overlay_root,
                "overlay root is not a directory",
            ));
        }
        if self.output_dir.exists() && !self.output_dir.is_dir() {
            return Err(SelectError::config(
                &self.output_dir,
                "output path is not a directory",
            ));
        }
        DiffMatcher::new(&self.diff_glob)?;
        if self.patch_program.trim().is_empty() {
            return Err(SelectError::config("patch.program", "patch program is empty"));
        }
        check_content_dir(&self.content_dir())
    }
}

/// The content area must be absent or an empty directory.
fn check_content_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    if !dir.is_dir() {
        return Err(SelectError::config(dir, "content path is not a directory"));
    }
    let mut entries = fs::read_dir(dir).at(dir)?;
    if entries.next().is_some() {
        return Err(SelectError::config(
            dir,
            "content directory is not empty; remove it before rebuilding",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// BuildSummary
// ---------------------------------------------------------------------------

/// What a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    /// Bundle fingerprint, also written to `SHA256SUM`.
    pub fingerprint: ContentDigest,
    /// Selection counters.
    pub stats: PickStatistics,
    /// Distinct names in the final index, metadata included.
    pub indexed_names: usize,
    /// Names supplied with differing contents.
    pub clashed_names: Vec<String>,
    /// Names the search order cannot resolve uniquely.
    pub unresolved_names: Vec<String>,
    /// The content area.
    pub content_dir: PathBuf,
    /// Every file written besides staged content.
    pub outputs: Vec<PathBuf>,
}

impl BuildSummary {
    /// Did the run finish without clashes, unresolved names, or unapplied
    /// diffs?
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.clashed_names.is_empty()
            && self.unresolved_names.is_empty()
            && self.stats.patches_balanced()
            && self.stats.patch_failures == 0
    }
}

// ---------------------------------------------------------------------------
// build_bundle
// ---------------------------------------------------------------------------

/// Assemble a bundle as described by `config`, patching with `applier`.
///
/// # Errors
/// Any fatal [`SelectError`]. Outputs are rolled back and the staged
/// content is removed before the error is returned.
pub fn build_bundle<A: PatchApplier>(config: &EngineConfig, applier: A) -> Result<BuildSummary> {
    config.validate()?;

    let content_dir = config.content_dir();
    let existed = content_dir.exists();
    let mut writer = ReportWriter::new(&content_dir, &config.output_dir);

    match run(config, applier, &mut writer) {
        Ok(summary) => Ok(summary),
        Err(e) => {
            error!(error = %e, "bundle build failed, rolling back");
            writer.rollback();
            discard_content(&content_dir, existed);
            Err(e)
        }
    }
}

fn run<A: PatchApplier>(
    config: &EngineConfig,
    applier: A,
    writer: &mut ReportWriter,
) -> Result<BuildSummary> {
    let ignore = IgnoreRuleSet::load(&config.ignore_file)?;
    let order = SearchOrder::load(&config.search_order_file)?;
    let matcher = DiffMatcher::new(&config.diff_glob)?;
    let patches = PatchSet::scan(&config.overlay_root, &matcher)?;
    info!(
        ignore_rules = ignore.len(),
        search_rules = order.len(),
        diffs = patches.len(),
        "inputs loaded"
    );

    let content_dir = config.content_dir();
    fs::create_dir_all(&content_dir).at(&content_dir)?;

    let trees = SourceTrees {
        overlay: config.overlay_root.clone(),
        base: config.base_root.clone(),
    };
    let outcome = Selector::new(trees, content_dir.clone(), applier)
        .with_ignore(ignore)
        .with_patches(patches, matcher)
        .select()?;
    let clashes = outcome.clash_table();
    let stats = outcome.stats;
    let mut index = outcome.index;

    // SEARCH is bundle content: hashed, indexed, fingerprinted.
    let search_digest = writer.write_search(&order)?;
    index.insert(SEARCH_FILE, SEARCH_FILE, Some(search_digest));

    let fingerprint = bundle_fingerprint(index.hashed_pairs());
    info!(fingerprint = %fingerprint, "computed bundle fingerprint");

    // Listed but never hashed; added after the fingerprint is fixed.
    index.insert(FINGERPRINT_FILE, FINGERPRINT_FILE, None);
    index.insert(INDEX_FILE, INDEX_FILE, None);
    writer.write_fingerprint(&fingerprint)?;
    writer.write_index(&index)?;

    // Basenames are flattened to one path each, so a freshly built index
    // always resolves; the check guards the INDEX format for `ttb search`.
    let unresolved = SearchValidator::new(&order).validate(&index);

    writer.write_file_hashes(&index)?;
    writer.write_listing(&index)?;
    writer.write_clash_report(&clashes)?;
    writer.write_search_report(&unresolved, &order)?;
    if config.debug_reports {
        let dirs = unsearched_dirs(&order, &content_dir)?;
        if !dirs.is_empty() {
            warn!(dirs = dirs.len(), "content directories not covered by any search rule");
        }
        writer.write_unsearched_dirs(&dirs)?;
    }

    info!(
        files = stats.total_files(),
        clashes = clashes.len(),
        unresolved = unresolved.len(),
        "bundle assembled"
    );

    Ok(BuildSummary {
        fingerprint,
        stats,
        indexed_names: index.len(),
        clashed_names: clashes.into_keys().collect(),
        unresolved_names: unresolved.into_iter().map(|u| u.name).collect(),
        content_dir,
        outputs: writer.written().to_vec(),
    })
}

/// Remove staged content after a failed run. A content directory that
/// existed (empty) beforehand is left in place, emptied.
fn discard_content(content_dir: &Path, existed: bool) {
    if let Err(e) = fs::remove_dir_all(content_dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %content_dir.display(), error = %e, "could not remove content directory");
            return;
        }
    }
    if existed {
        if let Err(e) = fs::create_dir(content_dir) {
            warn!(path = %content_dir.display(), error = %e, "could not recreate content directory");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::patch::PatchOutcome;

    /// Appends the diff file's contents to the target.
    struct AppendApplier;

    impl PatchApplier for AppendApplier {
        fn apply(&self, target: &Path, diff: &Path) -> PatchOutcome {
            let mut text = fs::read_to_string(target).unwrap();
            text.push_str(&fs::read_to_string(diff).unwrap());
            fs::write(target, text).unwrap();
            PatchOutcome::Applied
        }
    }

    struct Project {
        dir: tempfile::TempDir,
    }

    impl Project {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join("base")).unwrap();
            Self { dir }
        }

        fn file(&self, rel: &str, contents: &str) {
            let path = self.dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.dir.path().join(rel)
        }

        fn config(&self) -> EngineConfig {
            let root = self.dir.path();
            EngineConfig {
                overlay_root: root.join("include"),
                ignore_file: root.join("ignore"),
                search_order_file: root.join("search-order"),
                ..EngineConfig::new(root.join("base"), root.join("out"))
            }
        }

        fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.path(rel)).unwrap()
        }
    }

    #[test]
    fn full_run_writes_bundle_metadata() {
        let p = Project::new();
        p.file("base/tex/latex/foo/foo.sty", "foo");
        p.file("base/doc/foo.pdf", "pdf");
        p.file("include/bar.tex", "bar");
        p.file("include/foo.sty.diff", "+patched");
        p.file("ignore", "doc/.*  # documentation\n");
        p.file("search-order", "/include//\n/texlive/tex//\n");

        let summary = build_bundle(&p.config(), AppendApplier).unwrap();
        assert_eq!(summary.stats.total_files(), 2);
        assert_eq!(summary.stats.ignored, 1);
        assert_eq!(summary.stats.patches_applied, 1);
        assert!(summary.is_clean());

        let index = Index::parse(&p.read("out/content/INDEX")).unwrap();
        assert!(index.contains("SEARCH"));
        assert!(!index.contains("foo.pdf"));
        let nohash: Vec<_> = index
            .sorted_entries()
            .into_iter()
            .filter(|e| e.digest.is_none())
            .map(|e| e.name)
            .collect();
        assert_eq!(nohash, vec!["INDEX", "SHA256SUM"]);

        // The fingerprint can be recomputed from INDEX alone.
        let fp = bundle_fingerprint(index.hashed_pairs());
        assert_eq!(fp, summary.fingerprint);
        assert_eq!(p.read("out/content/SHA256SUM"), format!("{fp}\n"));

        assert_eq!(
            p.read("out/content/texlive/tex/latex/foo/foo.sty"),
            "foo+patched"
        );
        assert_eq!(p.read("out/listing"), "INDEX\nSEARCH\nSHA256SUM\nbar.tex\nfoo.sty\n");
        assert!(!p.path("out/clash-report").exists());
        assert!(!p.path("out/search-report").exists());
        assert!(p.path("out/unsearched-dirs").exists());
    }

    #[test]
    fn clashes_produce_a_report() {
        let p = Project::new();
        p.file("base/a/dup.sty", "one");
        p.file("base/b/dup.sty", "two");

        let summary = build_bundle(&p.config(), AppendApplier).unwrap();
        assert_eq!(summary.clashed_names, vec!["dup.sty"]);
        assert!(!summary.is_clean());
        let report = p.read("out/clash-report");
        assert!(report.starts_with("dup.sty:\n"));
        assert_eq!(report.matches("\t\t").count(), 2);
    }

    #[test]
    fn fresh_bundle_never_has_a_search_report() {
        let p = Project::new();
        p.file("base/a/dup.sty", "one");
        p.file("base/b/dup.sty", "two");
        p.file("base/c/same.tex", "same");
        p.file("base/d/same.tex", "same");
        p.file("base/e/lost.cls", "uncovered");
        p.file("include/other.sty", "overlay");
        p.file("search-order", "/include//\n/texlive/a//\n");

        let summary = build_bundle(&p.config(), AppendApplier).unwrap();
        assert_eq!(summary.clashed_names, vec!["dup.sty"]);
        assert!(summary.unresolved_names.is_empty());
        assert!(!p.path("out/search-report").exists());

        let index = Index::parse(&p.read("out/content/INDEX")).unwrap();
        assert!(index.by_name().all(|(_, paths)| paths.len() == 1));
    }

    #[test]
    fn debug_reports_can_be_disabled() {
        let p = Project::new();
        p.file("base/a.sty", "a");
        let config = EngineConfig {
            debug_reports: false,
            ..p.config()
        };
        build_bundle(&config, AppendApplier).unwrap();
        assert!(!p.path("out/unsearched-dirs").exists());
    }

    #[test]
    fn non_empty_content_dir_is_rejected() {
        let p = Project::new();
        p.file("base/a.sty", "a");
        p.file("out/content/leftover", "x");
        let err = build_bundle(&p.config(), AppendApplier).unwrap_err();
        assert!(err.is_config());
        assert!(p.path("out/content/leftover").exists());
    }

    #[test]
    fn missing_base_is_config_error() {
        let p = Project::new();
        let config = EngineConfig {
            base_root: p.path("nope"),
            ..p.config()
        };
        assert!(build_bundle(&config, AppendApplier).unwrap_err().is_config());
    }

    #[test]
    fn bad_ignore_rule_names_file_and_line() {
        let p = Project::new();
        p.file("base/a.sty", "a");
        p.file("ignore", "doc/.*\n(unclosed\n");
        let err = build_bundle(&p.config(), AppendApplier).unwrap_err();
        let msg = err.to_string();
        assert!(err.is_config());
        assert!(msg.contains("ignore"), "{msg}");
        assert!(msg.contains("line 2"), "{msg}");
        assert!(!p.path("out/content").exists());
    }

    #[test]
    fn failed_output_write_rolls_back() {
        let p = Project::new();
        p.file("base/a.sty", "a");
        // A directory where the listing should go makes the rename fail.
        fs::create_dir_all(p.path("out/listing/blocker")).unwrap();

        let err = build_bundle(&p.config(), AppendApplier).unwrap_err();
        assert!(matches!(err, SelectError::Io { .. }));
        assert!(!p.path("out/content").exists());
        assert!(!p.path("out/file-hashes").exists());
        assert!(!p.path("out/.listing.tmp").exists());
    }

    #[test]
    fn existing_empty_content_dir_is_kept_on_failure() {
        let p = Project::new();
        p.file("base/a.sty", "a");
        fs::create_dir_all(p.path("out/content")).unwrap();
        fs::create_dir_all(p.path("out/listing/blocker")).unwrap();

        build_bundle(&p.config(), AppendApplier).unwrap_err();
        assert!(p.path("out/content").is_dir());
        assert_eq!(fs::read_dir(p.path("out/content")).unwrap().count(), 0);
    }
}
