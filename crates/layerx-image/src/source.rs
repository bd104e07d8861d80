//! Layer sources.
//!
//! A [`LayerSource`] is the image-provider collaborator: it lists the
//! layers it knows about and exports a layer together with its ancestors
//! as a tar of tars. [`SavedImageArchive`] reads a saved image tarball
//! (`docker save` legacy layout) from disk, optionally gzip-compressed.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use layerx_common::constants::{LAYER_JSON_NAME, LAYER_TAR_NAME, REPOSITORIES_NAME};
use layerx_common::error::{LayerxError, Result};
use layerx_common::types::{LayerId, is_full_hex_id};

use crate::catalog::{LayerCatalog, LayerChain, LayerDescriptor, RawImage};

/// Provider of layer metadata and layer exports.
pub trait LayerSource {
    /// Lists every layer the source knows about.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be queried.
    fn list_layers(&self) -> Result<Vec<LayerDescriptor>>;

    /// Exports `top_most` and all of its ancestors as a tar of tars, with
    /// each layer's payload at `<full id>/layer.tar`.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer is unknown or the export fails.
    fn export_chain(&self, top_most: &LayerId) -> Result<Box<dyn Read + '_>>;
}

/// Lists a source's layers and walks the chain ending at `image_spec`.
///
/// # Errors
///
/// Returns an error if listing fails or the image cannot be resolved to a
/// single layer with a complete ancestry.
pub fn inspect_layers<S: LayerSource + ?Sized>(source: &S, image_spec: &str) -> Result<LayerChain> {
    let catalog = LayerCatalog::new(source.list_layers()?)?;
    tracing::debug!(layers = catalog.layers().len(), "listed layers");
    catalog.chain(image_spec)
}

/// A saved image tarball on disk.
#[derive(Debug, Clone)]
pub struct SavedImageArchive {
    path: PathBuf,
}

impl SavedImageArchive {
    /// Opens a saved image archive.
    ///
    /// # Errors
    ///
    /// Returns `LayerxError::NotFound` if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(LayerxError::NotFound {
                kind: "image archive",
                id: path.display().to_string(),
            });
        }
        tracing::info!(path = %path.display(), "opened saved image archive");
        Ok(Self { path })
    }

    /// Returns the archive path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<Box<dyn Read>> {
        let file = File::open(&self.path).map_err(|e| LayerxError::io(&self.path, e))?;
        let file = BufReader::new(file);
        if is_gzip_archive(&self.path) {
            Ok(Box::new(flate2::read::GzDecoder::new(file)))
        } else {
            Ok(Box::new(file))
        }
    }
}

impl LayerSource for SavedImageArchive {
    fn list_layers(&self) -> Result<Vec<LayerDescriptor>> {
        let mut archive = tar::Archive::new(self.reader()?);
        let entries = archive.entries().map_err(|e| LayerxError::io(&self.path, e))?;

        let mut records: Vec<RawImage> = Vec::new();
        let mut payload_sizes: HashMap<String, u64> = HashMap::new();
        let mut repositories: HashMap<String, HashMap<String, String>> = HashMap::new();

        for entry in entries {
            let mut entry = entry.map_err(|e| LayerxError::io(&self.path, e))?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let name = name.trim_start_matches("./");

            if name == REPOSITORIES_NAME {
                repositories = serde_json::from_reader(&mut entry)?;
                continue;
            }
            let Some((dir, file)) = name.split_once('/') else {
                continue;
            };
            if !is_full_hex_id(dir) {
                continue;
            }
            match file {
                LAYER_JSON_NAME => {
                    let mut record: RawImage = serde_json::from_reader(&mut entry)?;
                    if record.id.is_empty() {
                        dir.clone_into(&mut record.id);
                    }
                    records.push(record);
                }
                LAYER_TAR_NAME => {
                    let _ = payload_sizes.insert(dir.to_ascii_lowercase(), entry.size());
                }
                _ => {}
            }
        }

        let mut tags_by_id: HashMap<String, Vec<String>> = HashMap::new();
        for (repo, tags) in &repositories {
            for (tag, id) in tags {
                tags_by_id
                    .entry(id.to_ascii_lowercase())
                    .or_default()
                    .push(format!("{repo}:{tag}"));
            }
        }

        let mut layers = Vec::with_capacity(records.len());
        for mut record in records {
            let key = record.id.to_ascii_lowercase();
            if let Some(mut tags) = tags_by_id.remove(&key) {
                tags.sort();
                record.repo_tags = Some(tags);
            }
            if record.size.unwrap_or(0) <= 0 {
                record.size = payload_sizes
                    .get(&key)
                    .and_then(|s| i64::try_from(*s).ok());
            }
            layers.push(LayerDescriptor::normalize(&record)?);
        }

        tracing::debug!(path = %self.path.display(), layers = layers.len(), "read saved image metadata");
        Ok(layers)
    }

    fn export_chain(&self, top_most: &LayerId) -> Result<Box<dyn Read + '_>> {
        let known = self.list_layers()?;
        if !known.iter().any(|l| l.id() == top_most) {
            return Err(LayerxError::NotFound {
                kind: "layer",
                id: top_most.to_string(),
            });
        }
        tracing::info!(layer = top_most.short(), "exporting layer chain");
        self.reader()
    }
}

/// Determines whether the archive is gzip-compressed based on extension.
fn is_gzip_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}
