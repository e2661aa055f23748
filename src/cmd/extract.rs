//! The `extract` subcommand.

use std::sync::Arc;

use clap::Args;

use crate::{
    extractors::ExtractorKind,
    layout::Layout,
    parser::FieldParser,
    pipeline::{DEFAULT_CHECKPOINT_PAGES, ExtractPass},
    prelude::*,
    render::PdfRenderer,
    store::RecordStore,
    ui::{ProgressConfig, Ui},
};

use super::{ConfigOpts, PoolOpts};

/// Extract command line arguments.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// The voter roll PDF.
    pub pdf: PathBuf,

    /// The record table to write. If it already exists, we resume after the
    /// last page it contains.
    #[clap(short = 'o', long = "out")]
    pub output_path: PathBuf,

    /// Password for encrypted PDFs.
    #[clap(long)]
    pub password: Option<String>,

    /// Which OCR engine to use.
    #[clap(long, value_enum, default_value = "tesseract")]
    pub extractor: ExtractorKind,

    /// Save the record table after this many pages.
    #[clap(long, default_value_t = DEFAULT_CHECKPOINT_PAGES)]
    pub checkpoint_pages: u32,

    #[clap(flatten)]
    pub config: ConfigOpts,

    #[clap(flatten)]
    pub pool: PoolOpts,
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let layout = Layout::new(config.layout.clone())?;
    let renderer = PdfRenderer::new(&opts.pdf, opts.password.clone(), config.render.timeout())?;
    let extractors = opts.extractor.factory(&config)?;

    let pass = ExtractPass {
        renderer: Arc::new(renderer),
        layout,
        parser: FieldParser::new(config.parser.clone()),
        extractors,
        worker_count: opts.pool.worker_count(),
        checkpoint_pages: opts.checkpoint_pages,
    };

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📄",
            msg: "Extracting pages",
            done_msg: "Extracted pages",
        },
        0,
    );
    let store = RecordStore::new(&opts.output_path);
    let records = pass.run(&store, Some(pb.clone())).await?;
    pb.finish_using_style();

    ui.display_message(
        "📋",
        &format!("Extracted {} records: {}", records.len(), records.counts()),
    );
    Ok(())
}
