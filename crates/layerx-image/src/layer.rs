//! Guarded staging of an image export.
//!
//! An export is a tar of tars: one directory per layer, named by the
//! layer's full identifier, each holding that layer's `layer.tar`. Every
//! entry's destination is checked against the scratch root before any of
//! its bytes reach the disk.

use std::fs::File;
use std::io::Read;

use layerx_common::error::{LayerxError, Result};
use layerx_common::types::LayerId;

use crate::storage::ScratchDir;

/// Unpacks an export into the scratch directory.
///
/// Returns the number of entries written.
///
/// # Errors
///
/// Returns `LayerxError::UnsafeTarPath` as soon as an entry would land
/// outside the scratch root, or an I/O error if reading or unpacking fails.
pub fn stage_export<R: Read>(export: R, scratch: &ScratchDir) -> Result<usize> {
    let root = scratch.root();
    tracing::info!(target_dir = %root.display(), "staging image export");

    let mut archive = tar::Archive::new(export);
    let entries = archive.entries().map_err(|e| LayerxError::io(root, e))?;

    let mut unpacked = 0;
    for entry in entries {
        let mut entry = entry.map_err(|e| LayerxError::io(root, e))?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

        let Some(dest) = scratch.resolve_entry(&name)? else {
            continue;
        };

        if entry
            .unpack_in(root)
            .map_err(|e| LayerxError::io(&dest, e))?
        {
            unpacked += 1;
        } else {
            tracing::debug!(entry = %name, "export entry skipped by unpacker");
        }
    }

    tracing::info!(entries = unpacked, "image export staged");
    Ok(unpacked)
}

/// Opens a staged layer's payload.
///
/// # Errors
///
/// Returns `LayerxError::NotFound` if the export did not contain the layer.
pub fn open_layer_payload(scratch: &ScratchDir, id: &LayerId) -> Result<File> {
    let path = scratch.layer_tar_path(id);
    if !path.is_file() {
        return Err(LayerxError::NotFound {
            kind: "layer payload",
            id: id.to_string(),
        });
    }
    File::open(&path).map_err(|e| LayerxError::io(&path, e))
}
