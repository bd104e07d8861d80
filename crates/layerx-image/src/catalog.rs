//! Layer catalog: normalized image records and their ancestry.
//!
//! Image providers report layers in slightly different shapes (`Id` vs
//! `id`, `ParentId` vs `Parent`, creation times as Unix seconds or RFC 3339
//! strings). [`LayerDescriptor::normalize`] folds those into one immutable
//! value, and [`LayerCatalog::chain`] walks parent links from a requested
//! image back to its root.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use layerx_common::constants::{DEFAULT_TAG, UNTAGGED_REPO_TAG};
use layerx_common::error::{LayerxError, Result};
use layerx_common::types::LayerId;
use serde::{Deserialize, Serialize};

const DIGEST_PREFIX: &str = "sha256:";

/// Creation time as reported by an image provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Seconds since the Unix epoch.
    Seconds(i64),
    /// RFC 3339 timestamp, possibly with nanosecond precision.
    Text(String),
}

/// Image record as returned by an inspection call, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawImage {
    /// Layer identifier, possibly upper-case or digest-prefixed.
    #[serde(rename = "Id", alias = "id", default)]
    pub id: String,
    /// Parent layer identifier; absent or empty for a root layer.
    #[serde(rename = "ParentId", alias = "Parent", alias = "parent", default)]
    pub parent: Option<String>,
    /// Creation time.
    #[serde(rename = "Created", alias = "created")]
    pub created: RawTimestamp,
    /// `repo:tag` names, including Docker's `<none>:<none>` placeholder.
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
    /// Size of this layer's diff in bytes. Some providers report `-1`.
    #[serde(rename = "Size", alias = "size", default)]
    pub size: Option<i64>,
}

/// Normalized, immutable description of one image layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerDescriptor {
    id: LayerId,
    parent_id: Option<LayerId>,
    created: DateTime<Utc>,
    repo_tags: Vec<String>,
    size: u64,
}

impl LayerDescriptor {
    /// Creates a descriptor from already-normalized parts.
    #[must_use]
    pub fn new(
        id: LayerId,
        parent_id: Option<LayerId>,
        created: DateTime<Utc>,
        repo_tags: Vec<String>,
        size: u64,
    ) -> Self {
        Self {
            id,
            parent_id,
            created,
            repo_tags,
            size,
        }
    }

    /// Normalizes a raw inspection record.
    ///
    /// Identifiers are lowercased and stripped of any `sha256:` prefix.
    /// `<none>:<none>` tags are dropped, and a `repo:latest` tag also
    /// contributes the bare `repo` name ahead of it.
    ///
    /// # Errors
    ///
    /// Returns `LayerxError::Config` if an identifier is not 64 hex
    /// characters or the creation time cannot be parsed.
    pub fn normalize(raw: &RawImage) -> Result<Self> {
        let id = LayerId::from_hex(strip_digest_prefix(&raw.id))?;
        let parent_id = match raw.parent.as_deref().map(strip_digest_prefix) {
            Some(parent) if !parent.is_empty() => Some(LayerId::from_hex(parent)?),
            _ => None,
        };
        let created = parse_created(&raw.created)?;

        let mut repo_tags = Vec::new();
        for repo_tag in raw.repo_tags.iter().flatten() {
            if repo_tag == UNTAGGED_REPO_TAG {
                continue;
            }
            if let Some((repo, DEFAULT_TAG)) = repo_tag.rsplit_once(':') {
                repo_tags.push(repo.to_string());
            }
            repo_tags.push(repo_tag.clone());
        }

        let size = raw.size.map_or(0, |s| u64::try_from(s).unwrap_or(0));

        Ok(Self {
            id,
            parent_id,
            created,
            repo_tags,
            size,
        })
    }

    /// Full identifier.
    #[must_use]
    pub const fn id(&self) -> &LayerId {
        &self.id
    }

    /// Abbreviated identifier.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.short()
    }

    /// Parent identifier, `None` for a root layer.
    #[must_use]
    pub const fn parent_id(&self) -> Option<&LayerId> {
        self.parent_id.as_ref()
    }

    /// Creation time.
    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Human-readable names, possibly empty.
    #[must_use]
    pub fn repo_tags(&self) -> &[String] {
        &self.repo_tags
    }

    /// Size of this layer's diff in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    fn is_parent_of(&self, other: &Self) -> bool {
        other.parent_id.as_ref() == Some(&self.id)
    }
}

fn strip_digest_prefix(id: &str) -> &str {
    id.strip_prefix(DIGEST_PREFIX).unwrap_or(id)
}

fn parse_created(created: &RawTimestamp) -> Result<DateTime<Utc>> {
    match created {
        RawTimestamp::Seconds(secs) => {
            DateTime::from_timestamp(*secs, 0).ok_or_else(|| LayerxError::Config {
                message: format!("creation time out of range: {secs}"),
            })
        }
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| LayerxError::Config {
                message: format!("invalid creation time \"{text}\": {e}"),
            }),
    }
}

/// Every layer known to an image provider, newest first.
#[derive(Debug, Clone, Default)]
pub struct LayerCatalog {
    layers: Vec<LayerDescriptor>,
}

impl LayerCatalog {
    /// Builds a catalog, ordering layers newest first.
    ///
    /// Layers created in the same second are ordered child before parent.
    ///
    /// # Errors
    ///
    /// Returns `LayerxError::InvalidChain` if an identifier appears twice.
    pub fn new(mut layers: Vec<LayerDescriptor>) -> Result<Self> {
        let mut ids = HashSet::with_capacity(layers.len());
        for layer in &layers {
            if !ids.insert(layer.id.as_str()) {
                return Err(LayerxError::InvalidChain {
                    message: format!("layer {} appears more than once", layer.id),
                });
            }
        }

        let depths = ancestry_depths(&layers);
        layers.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| depths[b.id.as_str()].cmp(&depths[a.id.as_str()]))
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(Self { layers })
    }

    /// Normalizes raw records and builds a catalog from them.
    ///
    /// # Errors
    ///
    /// Returns an error if any record fails normalization.
    pub fn from_raw(raw: &[RawImage]) -> Result<Self> {
        let layers = raw
            .iter()
            .map(LayerDescriptor::normalize)
            .collect::<Result<Vec<_>>>()?;
        Self::new(layers)
    }

    /// All layers, newest first.
    #[must_use]
    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    /// Finds the single layer named by a repo tag or identifier prefix.
    ///
    /// # Errors
    ///
    /// Returns `LayerxError::NotFound` if nothing matches and
    /// `LayerxError::Ambiguous` if more than one layer does.
    pub fn find(&self, image_spec: &str) -> Result<&LayerDescriptor> {
        let id_prefix = strip_digest_prefix(image_spec).to_ascii_lowercase();
        let mut found: Option<&LayerDescriptor> = None;

        for layer in &self.layers {
            let matches = layer.repo_tags.iter().any(|t| t == image_spec)
                || (!id_prefix.is_empty() && layer.id.as_str().starts_with(&id_prefix));
            if !matches {
                continue;
            }
            if found.is_some() {
                return Err(LayerxError::Ambiguous {
                    spec: image_spec.to_string(),
                });
            }
            found = Some(layer);
        }

        found.ok_or_else(|| LayerxError::NotFound {
            kind: "image",
            id: image_spec.to_string(),
        })
    }

    /// Walks from the named image back to its root.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be found unambiguously, a
    /// parent is missing from the catalog, or the parent links loop.
    pub fn chain(&self, image_spec: &str) -> Result<LayerChain> {
        let leaf = self.find(image_spec)?;
        tracing::debug!(image = image_spec, id = leaf.short_id(), "resolved image");

        let by_id: HashMap<&str, &LayerDescriptor> =
            self.layers.iter().map(|l| (l.id.as_str(), l)).collect();
        let mut visited = HashSet::new();
        let mut layers = Vec::new();
        let mut current = leaf;

        loop {
            if !visited.insert(current.id.as_str()) {
                return Err(LayerxError::InvalidChain {
                    message: format!("parent links of {} form a cycle", leaf.id),
                });
            }
            layers.push(current.clone());

            let Some(parent_id) = current.parent_id.as_ref() else {
                tracing::debug!(id = current.short_id(), "found root layer");
                break;
            };
            current = by_id.get(parent_id.as_str()).copied().ok_or_else(|| {
                LayerxError::InvalidChain {
                    message: format!(
                        "parent {} of {} is not in the catalog",
                        parent_id, current.id
                    ),
                }
            })?;
        }

        layers.reverse();
        LayerChain::new(layers)
    }
}

/// Number of catalog ancestors of each layer. Stops at missing parents
/// and at loops.
fn ancestry_depths(layers: &[LayerDescriptor]) -> HashMap<String, usize> {
    let parents: HashMap<&str, Option<&str>> = layers
        .iter()
        .map(|l| (l.id.as_str(), l.parent_id.as_ref().map(LayerId::as_str)))
        .collect();

    parents
        .keys()
        .map(|&id| {
            let mut depth = 0;
            let mut cursor = parents.get(id).copied().flatten();
            while let Some(parent) = cursor {
                if depth >= layers.len() || !parents.contains_key(parent) {
                    break;
                }
                depth += 1;
                cursor = parents.get(parent).copied().flatten();
            }
            (id.to_string(), depth)
        })
        .collect()
}

/// Layers from a root ancestor (index 0) down to a requested image.
#[derive(Debug, Clone)]
pub struct LayerChain {
    layers: Vec<LayerDescriptor>,
    refs: HashMap<String, Option<usize>>,
}

impl LayerChain {
    /// Builds a chain from root-first layers.
    ///
    /// Every identifier prefix of every layer becomes a lookup key; a
    /// prefix shared by two layers resolves to nothing. Repo tags are
    /// added last and take priority over identifier prefixes.
    ///
    /// # Errors
    ///
    /// Returns `LayerxError::InvalidChain` if the first layer has a parent
    /// or any layer's parent is not the layer before it.
    pub fn new(layers: Vec<LayerDescriptor>) -> Result<Self> {
        if let Some((first, parent)) = layers
            .first()
            .and_then(|l| l.parent_id().map(|p| (l, p)))
        {
            return Err(LayerxError::InvalidChain {
                message: format!("root layer {} has parent {parent}", first.id),
            });
        }
        for pair in layers.windows(2) {
            if !pair[0].is_parent_of(&pair[1]) {
                return Err(LayerxError::InvalidChain {
                    message: format!("{} is not the parent of {}", pair[0].id, pair[1].id),
                });
            }
        }

        let mut refs: HashMap<String, Option<usize>> = HashMap::new();
        for (index, layer) in layers.iter().enumerate() {
            let id = layer.id.as_str();
            for end in 1..=id.len() {
                let _ = refs
                    .entry(id[..end].to_string())
                    .and_modify(|slot| *slot = None)
                    .or_insert(Some(index));
            }
        }
        for (index, layer) in layers.iter().enumerate() {
            for tag in &layer.repo_tags {
                let _ = refs.insert(tag.clone(), Some(index));
            }
        }

        Ok(Self { layers, refs })
    }

    /// Layers, root first.
    #[must_use]
    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the chain has no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&LayerDescriptor> {
        self.layers.get(index)
    }

    /// The requested image itself.
    #[must_use]
    pub fn leaf(&self) -> Option<&LayerDescriptor> {
        self.layers.last()
    }

    /// Resolves a full id, unambiguous id prefix or repo tag to an index.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Option<usize> {
        let reference = strip_digest_prefix(reference);
        self.refs
            .get(reference)
            .copied()
            .flatten()
            .or_else(|| {
                self.refs
                    .get(&reference.to_ascii_lowercase())
                    .copied()
                    .flatten()
            })
    }
}
