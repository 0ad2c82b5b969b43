use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

mod search_cmd;
mod select_cmd;
mod telemetry;

/// TeX bundle builder
///
/// Assembles a self-contained TeX bundle from a base distribution tree and
/// a project overlay tree. Overlay files replace base files of the same
/// name, diffs in the overlay are applied to the staged copies, and every
/// file is indexed by name and hashed into a single bundle fingerprint.
///
/// QUICK START:
///
///   # bundle.toml names the base tree; see 'ttb select --help'
///   ttb select
///
///   # Check an existing bundle's INDEX against a search order
///   ttb search --index build/output/tl/content/INDEX --search-order search-order
///
/// OUTPUT:
///
///   <output>/content/       the bundle: include/, texlive/, SEARCH, INDEX, SHA256SUM
///   <output>/file-hashes    per-file digests
///   <output>/listing        every bundled name
///   <output>/clash-report   same-named files with different contents (if any)
///   <output>/search-report  names the search order cannot resolve (if any)
#[derive(Parser)]
#[command(name = "ttb")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'ttb <command> --help' for more information on a specific command.")]
struct Cli {
    /// More log output on stderr (repeatable: -v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log line format
    #[arg(long, value_enum, default_value_t, global = true)]
    log_format: telemetry::LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a bundle
    ///
    /// Selects overlay files, then base files, applies diffs, writes the
    /// content area with SEARCH, SHA256SUM and INDEX, and the reports.
    /// Fails only on fatal errors; clashes are reported and summarized.
    /// Every name maps to a single path, so a fresh bundle always resolves
    /// under its search order; use `ttb search` to check other indexes.
    Select(select_cmd::SelectArgs),

    /// Validate an existing INDEX against a search order
    ///
    /// Lists every name whose candidate paths the search order cannot
    /// resolve to exactly one file. Always exits 0 when inputs are readable.
    Search(search_cmd::SearchArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Select(ref args) => select_cmd::run(args),
        Commands::Search(ref args) => search_cmd::run(args),
    }
}
