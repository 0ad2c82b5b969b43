//! Output files of a bundle run.
//!
//! Every file is written to `.<name>.tmp` beside its final path, fsynced,
//! then renamed into place. The writer remembers each path it produced so
//! a failed run can be rolled back.
//!
//! Content area (part of the bundle):
//!
//! - `SEARCH`: the expanded search rules
//! - `SHA256SUM`: the bundle fingerprint
//! - `INDEX`: the name → path index
//!
//! Output directory (diagnostics):
//!
//! - `file-hashes`, `listing`, and when non-empty `clash-report` and
//!   `search-report`; `unsearched-dirs` on request

use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{IoContext, Result};
use crate::hash::ContentDigest;
use crate::index::Index;
use crate::search::{SearchOrder, UnresolvedName};
use crate::selector::ClashTable;

/// Search-rule file inside the content area.
pub const SEARCH_FILE: &str = "SEARCH";
/// Fingerprint file inside the content area.
pub const FINGERPRINT_FILE: &str = "SHA256SUM";
/// Index file inside the content area.
pub const INDEX_FILE: &str = "INDEX";

/// Per-file hash listing in the output directory.
pub const FILE_HASHES_REPORT: &str = "file-hashes";
/// Sorted names in the output directory.
pub const LISTING_REPORT: &str = "listing";
/// Clash table in the output directory.
pub const CLASH_REPORT: &str = "clash-report";
/// Unresolvable names in the output directory.
pub const SEARCH_REPORT: &str = "search-report";
/// Content directories no search rule covers.
pub const UNSEARCHED_REPORT: &str = "unsearched-dirs";

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// `<path>\t<hex>` for every hashed index entry, sorted by path.
#[must_use]
pub fn render_file_hashes(index: &Index) -> String {
    let mut out = String::new();
    for (path, digest) in index.hashed_paths() {
        let _ = writeln!(out, "{path}\t{digest}");
    }
    out
}

/// One name per line, sorted.
#[must_use]
pub fn render_listing(index: &Index) -> String {
    let mut out = String::new();
    for name in index.names() {
        out.push_str(name);
        out.push('\n');
    }
    out
}

/// Clash table as
///
/// ```text
/// dup.sty:
/// 	1a2b3c4d:
/// 		/base/x/dup.sty
/// ```
///
/// with a blank line after each name.
#[must_use]
pub fn render_clash_report(table: &ClashTable) -> String {
    let mut out = String::new();
    for (name, groups) in table {
        let _ = writeln!(out, "{name}:");
        for (digest, paths) in groups {
            let _ = writeln!(out, "\t{}:", digest.short_hex());
            for path in paths {
                let _ = writeln!(out, "\t\t{}", path.display());
            }
        }
        out.push('\n');
    }
    out
}

/// `name: reason` followed by the tab-indented candidates.
#[must_use]
pub fn render_search_report(unresolved: &[UnresolvedName], order: &SearchOrder) -> String {
    let mut out = String::new();
    for entry in unresolved {
        let _ = writeln!(out, "{}: {}", entry.name, entry.reason(order));
        for candidate in &entry.candidates {
            let _ = writeln!(out, "\t{candidate}");
        }
    }
    out
}

/// `/`-rooted directories, indented by one tab per level below the root.
#[must_use]
pub fn render_unsearched_dirs(dirs: &[PathBuf]) -> String {
    let mut out = String::new();
    for dir in dirs {
        let s = dir.to_string_lossy();
        let depth = s.matches('/').count().saturating_sub(1);
        let _ = writeln!(out, "{}{s}", "\t".repeat(depth));
    }
    out
}

// ---------------------------------------------------------------------------
// ReportWriter
// ---------------------------------------------------------------------------

/// Writes run outputs atomically and can undo them.
#[derive(Debug)]
pub struct ReportWriter {
    content_dir: PathBuf,
    output_dir: PathBuf,
    written: Vec<PathBuf>,
    pending: Option<PathBuf>,
}

impl ReportWriter {
    /// Writer for the given content area and output directory.
    #[must_use]
    pub fn new(content_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
            output_dir: output_dir.into(),
            written: Vec::new(),
            pending: None,
        }
    }

    /// Every path written so far, in write order.
    #[must_use]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Write the expanded search rules into the content area and return
    /// their digest.
    ///
    /// # Errors
    /// I/O failure creating or renaming the file.
    pub fn write_search(&mut self, order: &SearchOrder) -> Result<ContentDigest> {
        let text = order.render();
        let dir = self.content_dir.clone();
        self.write_file(&dir, SEARCH_FILE, text.as_bytes())?;
        Ok(ContentDigest::of(text.as_bytes()))
    }

    /// Write `SHA256SUM`.
    ///
    /// # Errors
    /// I/O failure.
    pub fn write_fingerprint(&mut self, fingerprint: &ContentDigest) -> Result<PathBuf> {
        let dir = self.content_dir.clone();
        self.write_file(&dir, FINGERPRINT_FILE, format!("{fingerprint}\n").as_bytes())
    }

    /// Write `INDEX`.
    ///
    /// # Errors
    /// I/O failure.
    pub fn write_index(&mut self, index: &Index) -> Result<PathBuf> {
        let dir = self.content_dir.clone();
        self.write_file(&dir, INDEX_FILE, index.render().as_bytes())
    }

    /// Write `file-hashes`.
    ///
    /// # Errors
    /// I/O failure.
    pub fn write_file_hashes(&mut self, index: &Index) -> Result<PathBuf> {
        let dir = self.output_dir.clone();
        self.write_file(&dir, FILE_HASHES_REPORT, render_file_hashes(index).as_bytes())
    }

    /// Write `listing`.
    ///
    /// # Errors
    /// I/O failure.
    pub fn write_listing(&mut self, index: &Index) -> Result<PathBuf> {
        let dir = self.output_dir.clone();
        self.write_file(&dir, LISTING_REPORT, render_listing(index).as_bytes())
    }

    /// Write `clash-report` unless `table` is empty.
    ///
    /// # Errors
    /// I/O failure.
    pub fn write_clash_report(&mut self, table: &ClashTable) -> Result<Option<PathBuf>> {
        if table.is_empty() {
            return Ok(None);
        }
        warn!(clashes = table.len(), "file clashes were found");
        let dir = self.output_dir.clone();
        let path = self.write_file(&dir, CLASH_REPORT, render_clash_report(table).as_bytes())?;
        info!(path = %path.display(), "wrote clash report");
        Ok(Some(path))
    }

    /// Write `search-report` unless every name resolves.
    ///
    /// # Errors
    /// I/O failure.
    pub fn write_search_report(
        &mut self,
        unresolved: &[UnresolvedName],
        order: &SearchOrder,
    ) -> Result<Option<PathBuf>> {
        if unresolved.is_empty() {
            return Ok(None);
        }
        warn!(names = unresolved.len(), "some names do not resolve uniquely");
        let dir = self.output_dir.clone();
        let text = render_search_report(unresolved, order);
        self.write_file(&dir, SEARCH_REPORT, text.as_bytes()).map(Some)
    }

    /// Write `unsearched-dirs`.
    ///
    /// # Errors
    /// I/O failure.
    pub fn write_unsearched_dirs(&mut self, dirs: &[PathBuf]) -> Result<PathBuf> {
        let dir = self.output_dir.clone();
        self.write_file(&dir, UNSEARCHED_REPORT, render_unsearched_dirs(dirs).as_bytes())
    }

    /// Delete everything written so far, plus any half-written temp file.
    /// Best effort: failures are logged, not returned.
    pub fn rollback(&mut self) {
        if let Some(tmp) = self.pending.take() {
            let _ = fs::remove_file(&tmp);
        }
        for path in self.written.drain(..).rev() {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "rolled back"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "rollback failed"),
            }
        }
    }

    /// Write `contents` to `<dir>/<name>` via a temp file, fsync, and rename.
    fn write_file(&mut self, dir: &Path, name: &str, contents: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(dir).at(dir)?;

        let final_path = dir.join(name);
        let tmp_path = dir.join(format!(".{name}.tmp"));
        self.pending = Some(tmp_path.clone());

        let mut file = fs::File::create(&tmp_path).at(&tmp_path)?;
        file.write_all(contents).at(&tmp_path)?;
        file.sync_all().at(&tmp_path)?;
        drop(file);

        fs::rename(&tmp_path, &final_path).at(&final_path)?;
        self.pending = None;

        debug!(path = %final_path.display(), bytes = contents.len(), "wrote");
        self.written.push(final_path.clone());
        Ok(final_path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Resolution, SearchValidator};
    use std::collections::BTreeMap;

    fn d(s: &str) -> ContentDigest {
        ContentDigest::of(s.as_bytes())
    }

    #[test]
    fn file_hashes_sorted_by_path() {
        let mut idx = Index::new();
        idx.insert("b.tex", "texlive/b.tex", Some(d("b")));
        idx.insert("a.tex", "texlive/z/a.tex", Some(d("a")));
        idx.insert("INDEX", "INDEX", None);
        assert_eq!(
            render_file_hashes(&idx),
            format!("texlive/b.tex\t{}\ntexlive/z/a.tex\t{}\n", d("b"), d("a"))
        );
    }

    #[test]
    fn clash_report_layout() {
        let mut groups = BTreeMap::new();
        groups.insert(d("one"), vec![PathBuf::from("/base/x/dup.sty")]);
        let mut table = ClashTable::new();
        table.insert("dup.sty".to_owned(), groups);

        let text = render_clash_report(&table);
        assert_eq!(
            text,
            format!("dup.sty:\n\t{}:\n\t\t/base/x/dup.sty\n\n", d("one").short_hex())
        );
    }

    #[test]
    fn search_report_lists_reason_and_candidates() {
        let order = SearchOrder::parse("/texlive//\n").unwrap();
        let mut idx = Index::new();
        idx.insert("x.sty", "texlive/b/x.sty", None);
        idx.insert("x.sty", "texlive/a/x.sty", None);
        let unresolved = SearchValidator::new(&order).validate(&idx);
        assert!(matches!(unresolved[0].resolution, Resolution::Ambiguous { .. }));

        let text = render_search_report(&unresolved, &order);
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("x.sty: ambiguous under `/texlive//`"));
        assert_eq!(lines.next(), Some("\ttexlive/a/x.sty"));
        assert_eq!(lines.next(), Some("\ttexlive/b/x.sty"));
    }

    #[test]
    fn unsearched_dirs_are_indented_by_depth() {
        let dirs = vec![
            PathBuf::from("/"),
            PathBuf::from("/unknown"),
            PathBuf::from("/texlive/doc"),
        ];
        assert_eq!(render_unsearched_dirs(&dirs), "/\n/unknown\n\t/texlive/doc\n");
    }

    #[test]
    fn empty_reports_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ReportWriter::new(dir.path().join("content"), dir.path().join("out"));
        let order = SearchOrder::default();
        assert_eq!(w.write_clash_report(&ClashTable::new()).unwrap(), None);
        assert_eq!(w.write_search_report(&[], &order).unwrap(), None);
        assert!(w.written().is_empty());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn writes_are_atomic_and_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path().join("content");
        let mut w = ReportWriter::new(&content, dir.path().join("out"));
        let fp = d("bundle");
        let path = w.write_fingerprint(&fp).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{fp}\n"));
        assert!(!content.join(".SHA256SUM.tmp").exists());
        assert_eq!(w.written(), &[path]);
    }

    #[test]
    fn search_digest_matches_written_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path().join("content");
        let mut w = ReportWriter::new(&content, dir.path().join("out"));
        let order = SearchOrder::parse("/include//\n/texlive/{a,b}//\n").unwrap();
        let digest = w.write_search(&order).unwrap();
        let bytes = fs::read(content.join(SEARCH_FILE)).unwrap();
        assert_eq!(digest, ContentDigest::of(&bytes));
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "/include//\n/texlive/a//\n/texlive/b//\n"
        );
    }

    #[test]
    fn rollback_removes_written_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ReportWriter::new(dir.path().join("content"), dir.path().join("out"));
        let idx = Index::new();
        let a = w.write_index(&idx).unwrap();
        let b = w.write_listing(&idx).unwrap();
        fs::write(dir.path().join("out/.stray.tmp"), "x").unwrap();
        w.pending = Some(dir.path().join("out/.stray.tmp"));

        w.rollback();
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(!dir.path().join("out/.stray.tmp").exists());
        assert!(w.written().is_empty());
    }
}
