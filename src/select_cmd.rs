use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;
use ttb::config::{BundleFile, ConfigOverrides, DEFAULT_CONFIG_FILE};
use ttb::format::OutputFormat;
use ttb_select::report::{CLASH_REPORT, SEARCH_REPORT};
use ttb_select::{BuildSummary, ExternalPatch, build_bundle};

#[derive(Args, Debug)]
pub struct SelectArgs {
    /// Bundle config file; relative paths in it resolve against its directory
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Base distribution tree (overrides [inputs] base)
    #[arg(long)]
    pub base: Option<PathBuf>,

    /// Overlay tree (overrides [inputs] overlay)
    #[arg(long)]
    pub overlay: Option<PathBuf>,

    /// Output directory (overrides [output] dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Summary format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: &SelectArgs) -> Result<()> {
    let file = BundleFile::load(&args.config)?;
    let config_dir = args.config.parent().unwrap_or_else(|| Path::new("."));
    let overrides = ConfigOverrides {
        base: args.base.clone(),
        overlay: args.overlay.clone(),
        output: args.output.clone(),
    };
    let engine = file.engine_config(config_dir, &overrides)?;

    info!(
        bundle = file.name(),
        base = %engine.base_root.display(),
        overlay = %engine.overlay_root.display(),
        output = %engine.output_dir.display(),
        "building bundle"
    );

    let applier = ExternalPatch::new(engine.patch_program.clone());
    let summary = build_bundle(&engine, applier)
        .with_context(|| format!("failed to build bundle `{}`", file.name()))?;

    let output_dir = engine.output_dir;
    let rendered = args
        .format
        .render(&summary, |s| render_text(s, &output_dir))?;
    println!("{rendered}");
    Ok(())
}

fn render_text(summary: &BuildSummary, output_dir: &Path) -> String {
    let mut out = summary.stats.summary();
    let _ = write!(
        out,
        "\nfingerprint: {}\ncontent:     {}",
        summary.fingerprint,
        summary.content_dir.display()
    );
    if !summary.clashed_names.is_empty() {
        let _ = write!(
            out,
            "\nwarning: {} name clash(es), see {}",
            summary.clashed_names.len(),
            output_dir.join(CLASH_REPORT).display()
        );
    }
    if !summary.unresolved_names.is_empty() {
        let _ = write!(
            out,
            "\nwarning: {} name(s) do not resolve uniquely, see {}",
            summary.unresolved_names.len(),
            output_dir.join(SEARCH_REPORT).display()
        );
    }
    if !summary.stats.patches_balanced() {
        let _ = write!(
            out,
            "\nwarning: applied {} of {} diffs",
            summary.stats.patches_applied, summary.stats.patches_found
        );
    }
    out
}
