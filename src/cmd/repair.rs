//! The `repair` subcommand.

use clap::Args;

use crate::{
    cascade::RepairCascade,
    extractors::ExtractorKind,
    parser::FieldParser,
    prelude::*,
    rate_limit::RateLimit,
    sources::{ImageIndex, TextIndex},
    store::RecordStore,
    ui::{ProgressConfig, Ui},
};

use super::ConfigOpts;

/// Repair command line arguments.
#[derive(Debug, Args)]
pub struct RepairOpts {
    /// The record table to repair.
    pub records: PathBuf,

    /// Where to write the repaired table. Defaults to replacing the input.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// A raw text cache CSV to re-parse before paying for OCR. The raw text
    /// in the record table is always used as well.
    #[clap(long)]
    pub text_cache: Option<PathBuf>,

    /// A directory of crops, as written by `crop`. Records without a crop
    /// can't be sent to paid OCR.
    #[clap(long)]
    pub images: Option<PathBuf>,

    /// Which OCR engine to use for paid repairs.
    #[clap(long, value_enum, default_value = "vision")]
    pub extractor: ExtractorKind,

    /// A rate limit for paid OCR calls, of the form "2/s" or "60/m".
    /// Overrides the config file.
    #[clap(long)]
    pub rate_limit: Option<RateLimit>,

    /// Don't ask before making paid OCR calls.
    #[clap(short = 'y', long, conflicts_with = "no_paid")]
    pub yes: bool,

    /// Never make paid OCR calls. Records that need them are left for
    /// review.
    #[clap(long)]
    pub no_paid: bool,

    /// Also retry records marked `unrecoverable` by an earlier run.
    #[clap(long)]
    pub retry_unrecoverable: bool,

    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// The `repair` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_repair(ui: Ui, opts: &RepairOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let mut records = RecordStore::new(&opts.records).load_existing()?;
    if records.is_empty() {
        return Err(anyhow!("no records found in {:?}", opts.records));
    }

    // Texts from the cache are tried before texts stored in the table.
    let mut texts = match &opts.text_cache {
        Some(path) => TextIndex::from_csv(path)?,
        None => TextIndex::default(),
    };
    texts.extend(TextIndex::from_records(&records));
    let images = match &opts.images {
        Some(dir) => ImageIndex::from_dir(dir)?,
        None => ImageIndex::default(),
    };
    debug!(texts = texts.len(), images = images.len(), "Loaded repair sources");

    let cascade = RepairCascade::new(FieldParser::new(config.parser.clone()))
        .include_unrecoverable(opts.retry_unrecoverable);
    let queue = cascade.run_tier1(&mut records, &texts);
    ui.display_message(
        "🧹",
        &format!(
            "Fixed {} records from cached text; {} still need paid OCR",
            queue.report().fixed_by_tier1,
            queue.len()
        ),
    );
    debug!(keys = ?queue.keys(), "Records queued for paid OCR");

    let report = if queue.is_empty() {
        queue.decline(&mut records)
    } else if opts.no_paid {
        info!(queued = queue.len(), "Skipping paid OCR");
        queue.decline(&mut records)
    } else if !opts.yes
        && !ui
            .confirm(&format!("Repair {} records using paid OCR?", queue.len()))
            .await?
    {
        queue.decline(&mut records)
    } else {
        if images.is_empty() {
            warn!("No crop images available, so paid OCR can't fix anything");
        }
        let extractor = opts.extractor.create(&config)?;
        let limiter = opts
            .rate_limit
            .clone()
            .unwrap_or_else(|| config.repair.rate_limit.clone())
            .to_rate_limiter();
        let pb = ui.new_progress_bar(
            &ProgressConfig {
                emoji: "💸",
                msg: "Repairing with paid OCR",
                done_msg: "Repaired with paid OCR",
            },
            queue.len() as u64,
        );
        let report = cascade
            .run_tier2(
                queue.approve(),
                &mut records,
                &images,
                extractor.as_ref(),
                &limiter,
                Some(&pb),
            )
            .await;
        pb.finish_using_style();
        report
    };

    for key in report.history.keys() {
        debug!(%key, state = ?report.final_state(key), "Repair finished");
    }

    let output_path = opts.output_path.as_deref().unwrap_or(&opts.records);
    RecordStore::new(output_path).save(&records)?;

    ui.display_message("🔧", &report.to_string());
    ui.display_message("📋", &records.counts().to_string());
    Ok(())
}
