//! The `ocr-crops` subcommand.

use clap::Args;

use crate::{
    extractors::ExtractorKind,
    pipeline::ocr_crops,
    prelude::*,
    sources::ImageIndex,
    ui::{ProgressConfig, Ui},
};

use super::{ConfigOpts, PoolOpts};

/// OCR crops command line arguments.
#[derive(Debug, Args)]
pub struct OcrCropsOpts {
    /// A directory of crops, as written by `crop`.
    pub images: PathBuf,

    /// Where to write the raw text cache CSV.
    #[clap(short = 'o', long = "out")]
    pub output_path: PathBuf,

    /// Which OCR engine to use.
    #[clap(long, value_enum, default_value = "tesseract")]
    pub extractor: ExtractorKind,

    #[clap(flatten)]
    pub config: ConfigOpts,

    #[clap(flatten)]
    pub pool: PoolOpts,
}

/// The `ocr-crops` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_ocr_crops(ui: Ui, opts: &OcrCropsOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let images = ImageIndex::from_dir(&opts.images)?;
    let extractors = opts.extractor.factory(&config)?;

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🔍",
            msg: "OCRing crops",
            done_msg: "OCRed crops",
        },
        images.len() as u64,
    );
    let rows = ocr_crops(
        &images,
        extractors,
        &opts.output_path,
        opts.pool.worker_count(),
        Some(pb.clone()),
    )
    .await?;
    pb.finish_using_style();

    let blank = rows.iter().filter(|row| row.raw_text.is_empty()).count();
    ui.display_message(
        "📝",
        &format!(
            "Wrote {} rows ({blank} blank) to {}",
            rows.len(),
            opts.output_path.display()
        ),
    );
    Ok(())
}
