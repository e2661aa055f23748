//! The `crop` subcommand.

use std::sync::Arc;

use clap::Args;

use crate::{
    layout::Layout,
    pipeline::crop_pages,
    prelude::*,
    render::PdfRenderer,
    ui::{ProgressConfig, Ui},
};

use super::{ConfigOpts, PoolOpts};

/// Crop command line arguments.
#[derive(Debug, Args)]
pub struct CropOpts {
    /// The voter roll PDF.
    pub pdf: PathBuf,

    /// Directory to write `Page_NNN/Box_NN.png` crops to.
    #[clap(short = 'o', long = "out-dir")]
    pub out_dir: PathBuf,

    /// Password for encrypted PDFs.
    #[clap(long)]
    pub password: Option<String>,

    #[clap(flatten)]
    pub config: ConfigOpts,

    #[clap(flatten)]
    pub pool: PoolOpts,
}

/// The `crop` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_crop(ui: Ui, opts: &CropOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let layout = Layout::new(config.layout)?;
    let renderer = PdfRenderer::new(&opts.pdf, opts.password.clone(), config.render.timeout())?;

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "✂️",
            msg: "Cropping pages",
            done_msg: "Cropped pages",
        },
        0,
    );
    let written = crop_pages(
        Arc::new(renderer),
        &layout,
        &opts.out_dir,
        opts.pool.worker_count(),
        Some(pb.clone()),
    )
    .await?;
    pb.finish_using_style();

    ui.display_message(
        "📁",
        &format!("Wrote {written} crops to {}", opts.out_dir.display()),
    );
    Ok(())
}
