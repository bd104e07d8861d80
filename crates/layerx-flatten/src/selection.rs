//! Layer selection resolution.
//!
//! Users select layers by identifier, identifier prefix or repo tag, either
//! one at a time (`abc123`) or as inclusive ranges (`abc123:def456`). The
//! specs are given in *selection order*: a layer selected later overwrites
//! or blocks one selected earlier. Resolution turns that into a
//! *precedence order* (highest precedence first) with each layer kept only
//! once, at its highest-precedence position.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use layerx_common::config::SelectionPolicy;
use layerx_common::constants::LAYER_ID_HEX_LENGTH;
use layerx_common::error::{LayerxError, Result};
use layerx_common::types::{LayerId, is_hex};
use layerx_image::catalog::{LayerChain, LayerDescriptor};

/// One user selection: a single layer or an inclusive range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSpec {
    left: String,
    right: Option<String>,
    raw: String,
}

impl SelectionSpec {
    /// Selects a single layer.
    #[must_use]
    pub fn single(reference: impl Into<String>) -> Self {
        let left = reference.into();
        Self {
            raw: left.clone(),
            left,
            right: None,
        }
    }

    /// Selects every layer between two references, inclusive.
    #[must_use]
    pub fn range(left: impl Into<String>, right: impl Into<String>) -> Self {
        let (left, right) = (left.into(), right.into());
        Self {
            raw: format!("{left}:{right}"),
            left,
            right: Some(right),
        }
    }

    /// Left (or only) reference.
    #[must_use]
    pub fn left(&self) -> &str {
        &self.left
    }

    /// Right reference of a range.
    #[must_use]
    pub fn right(&self) -> Option<&str> {
        self.right.as_deref()
    }

    /// The spec as the user wrote it.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for SelectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for SelectionSpec {
    type Err = LayerxError;

    /// Parses `ID`, `ID:ID` or a repo tag.
    ///
    /// Text of the form `hex:hex` is always read as a range, so a repo tag
    /// made only of hex digits on both sides of its colon cannot be
    /// selected by name. Neither side of a colon may be empty, and neither
    /// end of a range may be longer than a full layer id.
    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let invalid = || LayerxError::Config {
            message: format!("\"{s}\" is not a valid layer specification"),
        };
        if text.is_empty() || text.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        if text.split(':').any(str::is_empty) {
            return Err(invalid());
        }

        let spec = match text.split_once(':') {
            Some((l, r)) if is_hex(l) && is_hex(r) => {
                if l.len() > LAYER_ID_HEX_LENGTH || r.len() > LAYER_ID_HEX_LENGTH {
                    return Err(invalid());
                }
                Self {
                    left: l.to_string(),
                    right: Some(r.to_string()),
                    raw: text.to_string(),
                }
            }
            _ => Self::single(text),
        };
        Ok(spec)
    }
}

/// Selected chain indices in precedence order, without repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSelection {
    indices: Vec<usize>,
    top_most_layer_id: Option<LayerId>,
}

impl ResolvedSelection {
    /// Chain indices, highest precedence first.
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// The selected layer nearest the leaf. Exporting it exports every
    /// selected layer.
    #[must_use]
    pub const fn top_most_layer_id(&self) -> Option<&LayerId> {
        self.top_most_layer_id.as_ref()
    }

    /// Whether nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of selected layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Selected descriptors, highest precedence first.
    #[must_use]
    pub fn layers(&self, chain: &LayerChain) -> Vec<LayerDescriptor> {
        self.indices
            .iter()
            .filter_map(|&i| chain.get(i).cloned())
            .collect()
    }
}

/// Resolves specs against a chain.
///
/// # Errors
///
/// Under [`SelectionPolicy::Strict`], returns `LayerxError::LayerSpec` for
/// the first spec that names an unknown layer or selects nothing.
pub fn resolve_selection(
    chain: &LayerChain,
    specs: &[SelectionSpec],
    reverse: bool,
    policy: SelectionPolicy,
) -> Result<ResolvedSelection> {
    let sequence = precedence_sequence(chain, specs, reverse, policy)?;

    let retained: IndexSet<usize> = sequence.into_iter().collect();
    let top_most_layer_id = retained
        .iter()
        .max()
        .and_then(|&i| chain.get(i))
        .map(|layer| layer.id().clone());
    let indices: Vec<usize> = retained.into_iter().collect();

    if indices.is_empty() {
        tracing::warn!("no known layers selected");
    } else {
        tracing::debug!(selected = ?indices, "resolved layer selection");
    }

    Ok(ResolvedSelection {
        indices,
        top_most_layer_id,
    })
}

/// Resolves specs to chain indices in precedence order, repeats included.
///
/// With no specs every layer is selected root to leaf. The per-spec
/// sequences are concatenated, reversed if `reverse` is set, and then
/// flipped from selection order into precedence order.
///
/// # Errors
///
/// See [`resolve_selection`].
pub fn precedence_sequence(
    chain: &LayerChain,
    specs: &[SelectionSpec],
    reverse: bool,
    policy: SelectionPolicy,
) -> Result<Vec<usize>> {
    let mut selected: Vec<usize> = if specs.is_empty() {
        (0..chain.len()).collect()
    } else {
        let mut selected = Vec::new();
        for spec in specs {
            let before = selected.len();
            resolve_spec(chain, spec, policy, &mut selected)?;
            if selected.len() == before {
                report(policy, spec, "resolves to an empty range")?;
            }
        }
        selected
    };

    if !reverse {
        selected.reverse();
    }
    Ok(selected)
}

fn resolve_spec(
    chain: &LayerChain,
    spec: &SelectionSpec,
    policy: SelectionPolicy,
    selected: &mut Vec<usize>,
) -> Result<()> {
    let left = resolve_ref(chain, spec, spec.left(), policy)?;
    let right = match spec.right() {
        Some(reference) => Some(resolve_ref(chain, spec, reference, policy)?),
        None => None,
    };

    match (left, right) {
        (Some(l), None) => selected.push(l),
        (Some(l), Some(Some(r))) if r < l => selected.extend((r..=l).rev()),
        (Some(l), Some(Some(r))) => selected.extend(l..=r),
        (None, _) | (Some(_), Some(None)) => {}
    }
    Ok(())
}

fn resolve_ref(
    chain: &LayerChain,
    spec: &SelectionSpec,
    reference: &str,
    policy: SelectionPolicy,
) -> Result<Option<usize>> {
    let index = chain.resolve(reference);
    if index.is_none() {
        report(
            policy,
            spec,
            &format!("does not resolve to any layer (\"{reference}\")"),
        )?;
    }
    Ok(index)
}

fn report(policy: SelectionPolicy, spec: &SelectionSpec, reason: &str) -> Result<()> {
    if policy.is_strict() {
        tracing::error!(spec = spec.raw(), "{reason}");
        return Err(LayerxError::LayerSpec {
            spec: spec.raw().to_string(),
            reason: reason.to_string(),
        });
    }
    tracing::warn!(spec = spec.raw(), "{reason}");
    Ok(())
}
