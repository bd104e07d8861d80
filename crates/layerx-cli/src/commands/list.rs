//! Layer listing, used when no target is given.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use layerx_common::types::LayerId;
use layerx_image::LayerDescriptor;

use crate::output::{format_age, format_bytes};

/// Writes one line per layer, in the order given.
///
/// In quiet mode only short ids are written. Otherwise a tab-separated
/// table is written whose VIRTUAL SIZE column is the total size of the
/// current row and every row after it.
///
/// # Errors
///
/// Returns an error if writing to `out` fails.
pub fn print_layer_info<W: Write>(
    out: &mut W,
    layers: &[LayerDescriptor],
    quiet: bool,
    now: DateTime<Utc>,
) -> io::Result<()> {
    if quiet {
        for layer in layers {
            writeln!(out, "{}", layer.short_id())?;
        }
        return Ok(());
    }

    write_row(
        out,
        ["REPO TAG", "IMAGE ID", "PARENT ID", "CREATED", "LAYER SIZE", "VIRTUAL SIZE"],
    )?;

    let mut remaining: u64 = layers.iter().map(LayerDescriptor::size).sum();
    for layer in layers {
        let repo_tag = layer.repo_tags().first().map_or("-", String::as_str);
        let parent = layer.parent_id().map_or("-", LayerId::short);
        write_row(
            out,
            [
                repo_tag,
                layer.short_id(),
                parent,
                &format_age(layer.created(), now),
                &format_bytes(layer.size()),
                &format_bytes(remaining),
            ],
        )?;
        remaining = remaining.saturating_sub(layer.size());
    }
    Ok(())
}

fn write_row<W: Write>(out: &mut W, fields: [&str; 6]) -> io::Result<()> {
    let [tag, rest @ ..] = fields;
    let mut line = format!("{tag:<23}");
    for field in rest {
        line.push('\t');
        line.push_str(&format!("{field:<15}"));
    }
    writeln!(out, "{}", line.trim_end())
}
