//! The selection engine.
//!
//! Walks the overlay tree, then the base tree, and decides for every file
//! whether it enters the bundle. Per basename the state machine is
//!
//! ```text
//! Unseen ──stage──▶ Staged ──digest/patch──▶ Finalized ──differing source──▶ Clashed
//! ```
//!
//! - Overlay files always win over base files of the same name.
//! - The basename is the identity key: every name has exactly one
//!   authoritative [`FileRecord`], whose target path mirrors its source tree
//!   (`include/<rel>` for overlay files, `texlive/<rel>` for base files).
//! - A later base file with the same name is compared by *source* digest.
//!   Identical content is dropped silently (counted); different content turns
//!   the name into a [`Selection::Clashed`], which keeps the first record and
//!   lists every contributing source per digest. Later contenders are never
//!   copied.
//! - Diffs are applied to the staged copy, and the record's digest is taken
//!   from the staged bytes afterwards, so it always describes what consumers
//!   will read.
//!
//! Overlay processing must finish before base processing starts; offering an
//! overlay file afterwards is a [`SelectError::PhaseOrder`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{IoContext, Result, SelectError};
use crate::hash::ContentDigest;
use crate::ignore::{IgnoreRuleSet, slash_path};
use crate::index::{Index, is_indexable};
use crate::patch::{DiffMatcher, PatchApplier, PatchOutcome, PatchSet};
use crate::stats::PickStatistics;

/// Log a progress line every this many staged files.
const PROGRESS_EVERY: usize = 1937;

/// A regular file, or a symlink that resolves to one. Links are not
/// followed into directories.
pub(crate) fn is_file_entry(entry: &DirEntry) -> bool {
    entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file())
}

// ---------------------------------------------------------------------------
// Origin / SourceFile
// ---------------------------------------------------------------------------

/// Which tree a file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    /// The project-maintained overlay tree.
    Overlay,
    /// The large base tree.
    Base,
    /// Outside both known roots.
    Unknown,
}

impl Origin {
    /// Subdirectory of the content area holding files of this origin.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Overlay => "include",
            Self::Base => "texlive",
            Self::Unknown => "unknown",
        }
    }
}

/// A candidate file, read lazily and at most once.
#[derive(Debug)]
struct SourceFile {
    name: String,
    origin: Origin,
    path: PathBuf,
    /// Path relative to its tree root, if it is inside it.
    rel: Option<PathBuf>,
    contents: Option<Vec<u8>>,
    digest: Option<ContentDigest>,
}

impl SourceFile {
    fn new(path: &Path, origin: Origin, root: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        let rel = path.strip_prefix(root).ok().map(Path::to_path_buf);
        Some(Self {
            name,
            origin: if rel.is_some() { origin } else { Origin::Unknown },
            path: path.to_owned(),
            rel,
            contents: None,
            digest: None,
        })
    }

    /// Tree-relative path with `/` separators; the bare name outside a tree.
    fn rel_string(&self) -> String {
        self.rel
            .as_deref()
            .map_or_else(|| self.name.clone(), slash_path)
    }

    /// Can this file be listed in the index? The target path contains the
    /// name, so checking it covers both fields.
    fn indexable(&self) -> bool {
        is_indexable(&self.target())
    }

    /// Content-relative target path.
    fn target(&self) -> String {
        match &self.rel {
            Some(rel) => format!("{}/{}", self.origin.dir_name(), slash_path(rel)),
            None => format!("{}/{}", self.origin.dir_name(), self.name),
        }
    }

    fn contents(&mut self) -> Result<&[u8]> {
        if self.contents.is_none() {
            self.contents = Some(fs::read(&self.path).at(&self.path)?);
        }
        Ok(self.contents.as_deref().unwrap_or_default())
    }

    fn digest(&mut self) -> Result<ContentDigest> {
        if let Some(d) = self.digest {
            return Ok(d);
        }
        let d = ContentDigest::of(self.contents()?);
        self.digest = Some(d);
        Ok(d)
    }
}

// ---------------------------------------------------------------------------
// FileRecord / Selection
// ---------------------------------------------------------------------------

/// The authoritative entry for one selected basename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Basename.
    pub name: String,
    /// Content-relative target path (`/`-separated).
    pub target: String,
    /// Tree the file came from.
    pub origin: Origin,
    /// Where the file was copied from.
    pub source: PathBuf,
    /// Digest of the source bytes, before any patch.
    pub source_digest: ContentDigest,
    /// Digest of the staged bytes consumers will read.
    pub digest: ContentDigest,
    /// Whether a diff was applied successfully.
    pub patched: bool,
}

/// Per-name selection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Only one distinct source content has been seen.
    Unique(FileRecord),
    /// Several distinct source contents were offered; `record` (the first)
    /// stays authoritative.
    Clashed {
        /// The authoritative record.
        record: FileRecord,
        /// Source digest → every source path that had it.
        by_digest: BTreeMap<ContentDigest, Vec<PathBuf>>,
    },
}

impl Selection {
    /// The authoritative record.
    #[must_use]
    pub const fn record(&self) -> &FileRecord {
        match self {
            Self::Unique(record) | Self::Clashed { record, .. } => record,
        }
    }

    /// Has this name clashed?
    #[must_use]
    pub const fn is_clashed(&self) -> bool {
        matches!(self, Self::Clashed { .. })
    }

    /// Register a differing source. Returns `true` if this turned a unique
    /// name into a clashed one.
    fn add_contender(&mut self, digest: ContentDigest, path: PathBuf) -> bool {
        let newly_clashed = if let Self::Unique(record) = self {
            let record = record.clone();
            let mut by_digest = BTreeMap::new();
            by_digest.insert(record.source_digest, vec![record.source.clone()]);
            *self = Self::Clashed { record, by_digest };
            true
        } else {
            false
        };
        if let Self::Clashed { by_digest, .. } = self {
            by_digest.entry(digest).or_default().push(path);
        }
        newly_clashed
    }
}

/// Basename → source digest → contributing source paths.
pub type ClashTable = BTreeMap<String, BTreeMap<ContentDigest, Vec<PathBuf>>>;

// ---------------------------------------------------------------------------
// SelectionOutcome
// ---------------------------------------------------------------------------

/// Everything a finished selection run produced.
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    /// Per-name state, sorted by name.
    pub selections: BTreeMap<String, Selection>,
    /// Run counters.
    pub stats: PickStatistics,
    /// Name → staged location and digest.
    pub index: Index,
}

impl SelectionOutcome {
    /// The authoritative record for `name`.
    #[must_use]
    pub fn record(&self, name: &str) -> Option<&FileRecord> {
        self.selections.get(name).map(Selection::record)
    }

    /// All authoritative records, sorted by name.
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.selections.values().map(Selection::record)
    }

    /// Clashed names with their digest groups; paths sorted within a group.
    #[must_use]
    pub fn clash_table(&self) -> ClashTable {
        self.selections
            .iter()
            .filter_map(|(name, sel)| match sel {
                Selection::Clashed { by_digest, .. } => {
                    let groups = by_digest
                        .iter()
                        .map(|(d, paths)| {
                            let mut paths = paths.clone();
                            paths.sort();
                            (*d, paths)
                        })
                        .collect();
                    Some((name.clone(), groups))
                }
                Selection::Unique(_) => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// The overlay and base trees a run draws from.
#[derive(Debug, Clone)]
pub struct SourceTrees {
    /// Replacement files and diffs; may be absent.
    pub overlay: PathBuf,
    /// The distribution being packaged.
    pub base: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Overlay,
    Base,
}

/// Stateful selector for one run.
#[derive(Debug)]
pub struct Selector<A> {
    trees: SourceTrees,
    content_root: PathBuf,
    ignore: IgnoreRuleSet,
    patches: PatchSet,
    diff_matcher: DiffMatcher,
    applier: A,
    selections: BTreeMap<String, Selection>,
    overlay_names: BTreeSet<String>,
    stats: PickStatistics,
    phase: Phase,
}

impl<A: PatchApplier> Selector<A> {
    /// A selector staging into `content_root`, with no ignore rules and no
    /// patches.
    pub fn new(trees: SourceTrees, content_root: PathBuf, applier: A) -> Self {
        Self {
            trees,
            content_root,
            ignore: IgnoreRuleSet::empty(),
            patches: PatchSet::default(),
            diff_matcher: DiffMatcher::default(),
            applier,
            selections: BTreeMap::new(),
            overlay_names: BTreeSet::new(),
            stats: PickStatistics::default(),
            phase: Phase::Overlay,
        }
    }

    /// Exclude base files matching `ignore`.
    #[must_use]
    pub fn with_ignore(mut self, ignore: IgnoreRuleSet) -> Self {
        self.ignore = ignore;
        self
    }

    /// Apply `patches`; overlay files matching `matcher` are diffs and are
    /// never staged themselves.
    #[must_use]
    pub fn with_patches(mut self, patches: PatchSet, matcher: DiffMatcher) -> Self {
        self.stats.patches_found = patches.len();
        self.stats.patch_conflicts = patches.conflicts();
        self.patches = patches;
        self.diff_matcher = matcher;
        self
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> &PickStatistics {
        &self.stats
    }

    /// Run both phases and finish.
    ///
    /// # Errors
    /// Any fatal [`SelectError`] from either walk.
    pub fn select(mut self) -> Result<SelectionOutcome> {
        self.add_overlay_tree()?;
        self.add_base_tree()?;
        Ok(self.finish())
    }

    /// Walk the overlay tree in sorted order. A missing overlay root is
    /// treated as empty.
    ///
    /// # Errors
    /// Walk or I/O failures; [`SelectError::PhaseOrder`] after base phase.
    pub fn add_overlay_tree(&mut self) -> Result<()> {
        let root = self.trees.overlay.clone();
        if !root.is_dir() {
            debug!(root = %root.display(), "no overlay tree");
            return Ok(());
        }
        info!(root = %root.display(), "selecting overlay files");
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry?;
            if is_file_entry(&entry) {
                self.consider_overlay_file(entry.path())?;
            }
        }
        info!(
            added = self.stats.overlay_added,
            conflicts = self.stats.overlay_conflicts,
            "overlay selection done"
        );
        Ok(())
    }

    /// Walk the base tree in sorted order.
    ///
    /// # Errors
    /// Walk or I/O failures.
    pub fn add_base_tree(&mut self) -> Result<()> {
        let root = self.trees.base.clone();
        info!(root = %root.display(), "selecting base files");
        self.phase = Phase::Base;
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry?;
            if is_file_entry(&entry) {
                self.consider_base_file(entry.path())?;
            }
        }
        info!(
            added = self.stats.base_added,
            ignored = self.stats.ignored,
            unindexable = self.stats.unindexable,
            replaced = self.stats.replaced,
            clashes = self.stats.clashes,
            identical = self.stats.identical,
            "base selection done"
        );
        Ok(())
    }

    /// Offer one overlay file.
    ///
    /// # Errors
    /// [`SelectError::PhaseOrder`] once base processing has begun; I/O
    /// failures while staging.
    pub fn consider_overlay_file(&mut self, path: &Path) -> Result<()> {
        if self.phase == Phase::Base {
            return Err(SelectError::PhaseOrder {
                path: path.to_owned(),
            });
        }
        let Some(mut file) = SourceFile::new(path, Origin::Overlay, &self.trees.overlay) else {
            return Ok(());
        };

        if self.diff_matcher.matches(Path::new(&file.rel_string())) {
            trace!(path = %path.display(), "diff file, not staged");
            return Ok(());
        }

        if !file.indexable() {
            self.skip_unindexable(&file);
            return Ok(());
        }

        if let Some(existing) = self.selections.get(&file.name) {
            warn!(
                name = %file.name,
                kept = %existing.record().source.display(),
                discarded = %path.display(),
                "overlay file has a name conflict, ignoring"
            );
            self.stats.overlay_conflicts += 1;
            return Ok(());
        }

        let record = self.stage(&mut file)?;
        self.stats.overlay_added += 1;
        self.overlay_names.insert(record.name.clone());
        self.selections
            .insert(record.name.clone(), Selection::Unique(record));
        Ok(())
    }

    /// Offer one base-tree file.
    ///
    /// # Errors
    /// I/O failures while reading or staging.
    pub fn consider_base_file(&mut self, path: &Path) -> Result<()> {
        self.phase = Phase::Base;
        let Some(mut file) = SourceFile::new(path, Origin::Base, &self.trees.base) else {
            return Ok(());
        };

        let rel = file.rel_string();
        if let Some(rule) = self.ignore.first_match(&rel) {
            debug!(path = %rel, rule, "ignored");
            self.stats.ignored += 1;
            return Ok(());
        }

        if !file.indexable() {
            self.skip_unindexable(&file);
            return Ok(());
        }

        let Some(existing) = self.selections.get(&file.name) else {
            let record = self.stage(&mut file)?;
            self.stats.base_added += 1;
            self.selections
                .insert(record.name.clone(), Selection::Unique(record));
            return Ok(());
        };

        if self.overlay_names.contains(&file.name) {
            trace!(path = %rel, "replaced by overlay file");
            self.stats.replaced += 1;
            return Ok(());
        }

        let digest = file.digest()?;
        let first_digest = existing.record().source_digest;
        if digest == first_digest {
            debug!(name = %file.name, path = %rel, "identical duplicate");
            self.stats.identical += 1;
            return Ok(());
        }

        warn!(
            name = %file.name,
            kept = %existing.record().source.display(),
            excluded = %path.display(),
            "name clash with different contents"
        );
        self.stats.clash_contenders += 1;
        if let Some(sel) = self.selections.get_mut(&file.name) {
            if sel.add_contender(digest, file.path.clone()) {
                self.stats.clashes += 1;
            }
        }
        Ok(())
    }

    fn skip_unindexable(&mut self, file: &SourceFile) {
        warn!(
            path = %file.path.display(),
            "name or path contains whitespace and cannot be indexed, skipping"
        );
        self.stats.unindexable += 1;
    }

    /// Copy `file` into the content area, patch it if needed, and digest
    /// the result.
    fn stage(&mut self, file: &mut SourceFile) -> Result<FileRecord> {
        let target = file.target();
        let dest = self.content_root.join(&target);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }

        let source_digest = file.digest()?;
        fs::write(&dest, file.contents()?).at(&dest)?;

        let count = self.selections.len() + 1;
        if count % PROGRESS_EVERY == 0 {
            info!(staged = count, "selecting files");
        }
        trace!(name = %file.name, target = %target, "staged");

        let mut digest = source_digest;
        let mut patched = false;
        if let Some(diff) = self.patches.get(&file.name) {
            match self.applier.apply(&dest, diff) {
                PatchOutcome::Applied => {
                    info!(target = %target, diff = %diff.display(), "patched");
                    self.stats.patches_applied += 1;
                    patched = true;
                }
                PatchOutcome::Failed { code, detail } => {
                    warn!(target = %target, diff = %diff.display(), ?code, %detail, "patch failed");
                    self.stats.patch_failures += 1;
                }
            }
            // Digest whatever is on disk now; a failed patch may have
            // partially rewritten the file.
            let staged = fs::File::open(&dest).at(&dest)?;
            digest = ContentDigest::of_reader(staged).at(&dest)?;
        }

        Ok(FileRecord {
            name: file.name.clone(),
            target,
            origin: file.origin,
            source: file.path.clone(),
            source_digest,
            digest,
            patched,
        })
    }

    /// Close the run: build the index and report patch discrepancies.
    #[must_use]
    pub fn finish(self) -> SelectionOutcome {
        let stats = self.stats;
        match stats.compare_patch_found_applied() {
            std::cmp::Ordering::Greater => warn!(
                found = stats.patches_found,
                applied = stats.patches_applied,
                "not all diffs were applied"
            ),
            std::cmp::Ordering::Less => warn!(
                found = stats.patches_found,
                applied = stats.patches_applied,
                "some diffs were applied more than once"
            ),
            std::cmp::Ordering::Equal => {}
        }

        let mut index = Index::new();
        for (name, sel) in &self.selections {
            let record = sel.record();
            index.insert(name.clone(), record.target.clone(), Some(record.digest));
        }

        SelectionOutcome {
            selections: self.selections,
            stats,
            index,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
