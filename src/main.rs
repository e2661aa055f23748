use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod cascade;
mod cmd;
mod config;
mod cpu_limit;
mod digits;
mod extractors;
mod key;
mod layout;
mod parser;
mod pipeline;
mod pool;
mod prelude;
mod rate_limit;
mod record;
mod render;
mod retry;
mod sources;
mod store;
mod ui;

/// Turn scanned Bengali voter rolls into voter records, and repair the
/// records that OCR got wrong.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - GOOGLE_VISION_API_KEY: The Google Cloud Vision API key, used by
    `--extractor vision` and by `repair`.
  - RUST_LOG (optional): Log filter, such as `debug` or
    `voter_roll_ocr=trace`.

  These variables may be set in a standard `.env` file.

External tools:
  - `pdfinfo` and `pdftocairo` from Poppler, for `crop` and `extract`.
  - `tesseract` with Bengali (`ben`) language data, for
    `--extractor tesseract`.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Render a PDF and write every record box as `Page_NNN/Box_NN.png`.
    Crop(cmd::crop::CropOpts),
    /// OCR a directory of crops into a raw text cache CSV.
    OcrCrops(cmd::ocr_crops::OcrCropsOpts),
    /// Parse a raw text cache CSV into a record table.
    Parse(cmd::parse::ParseOpts),
    /// Render, OCR and parse a PDF into a record table, resuming if
    /// interrupted.
    Extract(cmd::extract::ExtractOpts),
    /// Fill in missing fields, from cached text first and then paid OCR.
    Repair(cmd::repair::RepairOpts),
    /// Print schemas for our file formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Schema(opts) => opts.output_path.is_none(),
            Cmd::Crop(_)
            | Cmd::OcrCrops(_)
            | Cmd::Parse(_)
            | Cmd::Extract(_)
            | Cmd::Repair(_) => false,
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Crop(opts) => cmd::crop::cmd_crop(ui, opts).await?,
        Cmd::OcrCrops(opts) => cmd::ocr_crops::cmd_ocr_crops(ui, opts).await?,
        Cmd::Parse(opts) => cmd::parse::cmd_parse(ui, opts).await?,
        Cmd::Extract(opts) => cmd::extract::cmd_extract(ui, opts).await?,
        Cmd::Repair(opts) => cmd::repair::cmd_repair(ui, opts).await?,
        Cmd::Schema(schema_opts) => cmd::schema::cmd_schema(schema_opts).await?,
    }
    Ok(())
}
