//! CLI argument definitions and dispatch.

pub mod extract;
pub mod list;

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use layerx_common::config::{Compression, FlattenConfig, SelectionPolicy};
use layerx_common::constants::{APP_NAME, DEFAULT_COMPRESSION_LEVEL, DEFAULT_LOG_LEVEL};
use layerx_flatten::{SelectionSpec, resolve_selection};
use layerx_image::{SavedImageArchive, inspect_layers};
use tracing_subscriber::EnvFilter;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Flatten selected layers of a container image into one tar archive.
///
/// Layer specifications are applied in the order given: a layer named
/// later overwrites or removes content from a layer named earlier. Without
/// a target, the selected layers are described on standard output.
#[derive(Parser, Debug)]
#[allow(clippy::struct_excessive_bools)]
#[command(name = APP_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Repo tag or ID (prefix) of the image whose layers are selected.
    #[arg(value_name = "IMAGE_SPEC")]
    pub image: String,

    /// Saved image archive (`docker save` output, optionally gzipped).
    #[arg(long, env = "LAYERX_ARCHIVE", value_name = "PATH")]
    pub archive: PathBuf,

    /// Selected layer(s): `ID`, `ID:ID` (inclusive range) or a repo tag.
    /// Defaults to every layer from root to leaf.
    #[arg(short, long = "layers", value_name = "LAYER_SPEC")]
    pub layers: Vec<SelectionSpec>,

    /// Reverse the layer order from that specified.
    #[arg(short, long, overrides_with = "no_reverse")]
    pub reverse: bool,

    /// Preserve the layer order as specified (default).
    #[arg(short = 'R', long)]
    pub no_reverse: bool,

    /// Treat a layer specification that selects no known layer as an error.
    #[arg(short, long, env = "LAYERX_STRICT", overrides_with = "no_strict")]
    pub strict: bool,

    /// Ignore layer specifications that select no known layer (default).
    #[arg(short = 'S', long)]
    pub no_strict: bool,

    /// Path to write the archive to (`-` for standard output).
    #[arg(short, long, value_name = "PATH")]
    pub target: Option<String>,

    /// Without a target, print only the layer IDs.
    #[arg(short, long, overrides_with = "no_quiet")]
    pub quiet: bool,

    /// Without a target, print a table of layer details (default).
    #[arg(short = 'Q', long)]
    pub no_quiet: bool,

    /// Overwrite the target archive if it already exists.
    #[arg(short = 'w', long, overrides_with = "no_force")]
    pub force: bool,

    /// Refuse to overwrite an existing target archive (default).
    #[arg(short = 'W', long)]
    pub no_force: bool,

    /// Compress the target archive with gzip.
    #[arg(short = 'z', long, overrides_with_all = ["bzip2", "no_compress"])]
    pub gzip: bool,

    /// Compress the target archive with bzip2.
    #[arg(short = 'j', long, overrides_with_all = ["gzip", "no_compress"])]
    pub bzip2: bool,

    /// Do not compress the target archive (default).
    #[arg(short = 'C', long, overrides_with_all = ["gzip", "bzip2"])]
    pub no_compress: bool,

    /// Compression level for the target archive.
    #[arg(
        long,
        value_name = "0..9",
        default_value_t = DEFAULT_COMPRESSION_LEVEL,
        value_parser = clap::value_parser!(u32).range(0..=9)
    )]
    pub compress_level: u32,

    /// Logging level (overrides `RUST_LOG`; defaults to "warn").
    #[arg(long, env = "LAYERX_LOG_LEVEL", value_parser = LOG_LEVELS)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Builds the run configuration from the parsed flags.
    #[must_use]
    pub fn config(&self) -> FlattenConfig {
        let compression = if self.gzip {
            Compression::Gzip
        } else if self.bzip2 {
            Compression::Bzip2
        } else {
            Compression::None
        };
        FlattenConfig {
            reverse: self.reverse,
            policy: SelectionPolicy::from_strict(self.strict),
            compression,
            compression_level: self.compress_level,
            force: self.force,
            quiet: self.quiet,
        }
    }

    /// Log filter from `--log-level`, then `RUST_LOG`, then the default.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        match &self.log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        }
    }
}

/// Resolves the selection and lists or extracts it.
///
/// # Errors
///
/// Returns an error if the image cannot be inspected, a strict layer
/// specification fails, or the target cannot be written.
pub fn execute(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.config();
    config.validate()?;

    let source = SavedImageArchive::open(&cli.archive)
        .with_context(|| format!("unable to open image archive \"{}\"", cli.archive.display()))?;
    let chain = inspect_layers(&source, &cli.image)
        .with_context(|| format!("unable to inspect image \"{}\"", cli.image))?;
    let selection = resolve_selection(&chain, &cli.layers, config.reverse, config.policy)?;
    let layers = selection.layers(&chain);

    match &cli.target {
        None => {
            let mut stdout = std::io::stdout().lock();
            list::print_layer_info(&mut stdout, &layers, config.quiet, chrono::Utc::now())?;
            stdout.flush()?;
        }
        Some(target) => {
            let summary =
                extract::extract_layers(&source, &layers, selection.top_most_layer_id(), target, &config)?;
            tracing::info!(path = %target, entries = summary.written, "archive written");
        }
    }
    Ok(())
}
