//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;

use crate::{
    async_utils::io::write_text, config::Config, prelude::*, record::FlatVoterRecord,
    sources::RawTextRow,
};

/// The different schema types we support.
///
/// We parse these as PascalCase, because they represent type names.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum SchemaType {
    /// A row of the record table.
    Record,
    /// A row of the raw text cache.
    RawText,
    /// The config file.
    Config,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::Record => schema_for!(FlatVoterRecord),
        SchemaType::RawText => schema_for!(RawTextRow),
        SchemaType::Config => schema_for!(Config),
    };
    let schema_str =
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?;
    write_text(schema_opts.output_path.as_deref(), &format!("{schema_str}\n")).await
}
