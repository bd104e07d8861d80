//! # layerx, the selective layer flattener
//!
//! Lists the layers of a saved container image, or merges a chosen set of
//! them into a single filesystem tar archive.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use layerx_common::constants::{EXIT_EXEC, EXIT_LAYER_SPEC, EXIT_USAGE};
use layerx_common::error::LayerxError;

use crate::commands::Cli;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(cli.env_filter())
        .init();

    match commands::execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

/// Maps a failure to the process exit status.
fn exit_status(err: &anyhow::Error) -> u8 {
    let layer_spec = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<LayerxError>())
        .any(LayerxError::is_layer_spec);
    if layer_spec { EXIT_LAYER_SPEC } else { EXIT_EXEC }
}
