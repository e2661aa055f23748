//! The `parse` subcommand.

use clap::Args;

use crate::{
    parser::{FieldParser, Tier},
    pipeline::parse_rows,
    prelude::*,
    sources::read_raw_text_rows,
    store::RecordStore,
    ui::Ui,
};

use super::ConfigOpts;

/// Parse command line arguments.
#[derive(Debug, Args)]
pub struct ParseOpts {
    /// A raw text cache CSV, with page, box and raw text columns.
    pub input: PathBuf,

    /// The record table to create or update. Existing values are kept.
    #[clap(short = 'o', long = "out")]
    pub output_path: PathBuf,

    /// How hard to try. `repair` uses the looser tiers on its own, so the
    /// default is usually what you want.
    #[clap(long, value_enum, default_value = "strict")]
    pub tier: Tier,

    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// The `parse` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_parse(ui: Ui, opts: &ParseOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let parser = FieldParser::new(config.parser);

    let rows = read_raw_text_rows(&opts.input)?;
    if rows.is_empty() {
        return Err(anyhow!("no usable rows in {:?}", opts.input));
    }

    let store = RecordStore::new(&opts.output_path);
    let mut records = store.load_existing()?;
    parse_rows(&mut records, &parser, opts.tier, &rows);
    store.save(&records)?;

    ui.display_message("📋", &format!("Parsed {} records: {}", records.len(), records.counts()));
    Ok(())
}
