use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde::Serialize;
use ttb::format::OutputFormat;
use ttb_select::report::render_search_report;
use ttb_select::{Index, SearchOrder, SearchValidator, UnresolvedName};

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// INDEX file of an existing bundle
    #[arg(long)]
    pub index: PathBuf,

    /// Search-order file to check against
    #[arg(long)]
    pub search_order: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct SearchCheck {
    names: usize,
    rules: usize,
    unresolved: Vec<UnresolvedName>,
}

pub fn run(args: &SearchArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.index)
        .with_context(|| format!("could not read index {}", args.index.display()))?;
    let index = Index::parse(&text)
        .with_context(|| format!("malformed index {}", args.index.display()))?;

    if !args.search_order.is_file() {
        bail!("search-order file {} does not exist", args.search_order.display());
    }
    let order = SearchOrder::load(&args.search_order)?;

    let check = SearchCheck {
        names: index.len(),
        rules: order.len(),
        unresolved: SearchValidator::new(&order).validate(&index),
    };
    tracing::info!(
        names = check.names,
        rules = check.rules,
        unresolved = check.unresolved.len(),
        "search check done"
    );

    let rendered = args.format.render(&check, |c| {
        if c.unresolved.is_empty() {
            format!("all {} names resolve under {} rules", c.names, c.rules)
        } else {
            render_search_report(&c.unresolved, &order).trim_end().to_owned()
        }
    })?;
    println!("{rendered}");
    Ok(())
}
