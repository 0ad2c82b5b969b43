//! Selection engine for TeX bundles.
//!
//! Builds a self-contained bundle from a large base distribution tree and a
//! small overlay tree: overlay files take precedence, diffs are applied to
//! staged copies, same-named files with differing contents are reported as
//! clashes, and the result is indexed by name and identified by one
//! fingerprint over all file digests.
//!
//! # Crate layout
//!
//! - [`hash`]: file digests and the bundle fingerprint.
//! - [`ignore`]: regex rules excluding base files.
//! - [`patch`]: diff discovery and the [`PatchApplier`] seam.
//! - [`selector`]: the per-name state machine.
//! - [`index`]: name → path index and its file format.
//! - [`search`]: search-order rules and resolvability checks.
//! - [`report`]: atomic output writing and rollback.
//! - [`stats`]: run counters and the text summary.
//! - [`pipeline`]: [`EngineConfig`] and [`build_bundle`].
//! - [`error`]: the [`SelectError`] enum.

pub mod error;
pub mod hash;
pub mod ignore;
pub mod index;
pub mod patch;
pub mod pipeline;
pub mod report;
pub mod search;
pub mod selector;
pub mod stats;


pub use error::{Result, SelectError};
pub use hash::{ContentDigest, bundle_fingerprint};
pub use ignore::{IgnoreRuleSet, slash_path};
pub use index::{Index, IndexEntry, IndexParseError};
pub use patch::{DiffMatcher, ExternalPatch, PatchApplier, PatchOutcome, PatchSet};
pub use pipeline::{BuildSummary, EngineConfig, build_bundle};
pub use report::ReportWriter;
pub use search::{Resolution, SearchOrder, SearchRule, SearchValidator, UnresolvedName};
pub use selector::{
    ClashTable, FileRecord, Origin, Selection, SelectionOutcome, Selector, SourceTrees,
};
pub use stats::PickStatistics;
