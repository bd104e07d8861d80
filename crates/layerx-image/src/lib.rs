//! # layerx-image
//!
//! Image and layer plumbing for layerx.
//!
//! Handles:
//! - **Catalog**: normalizing raw image inspection records and walking a
//!   layer's ancestry into a root-to-leaf chain.
//! - **Sources**: the [`source::LayerSource`] collaborator seam and the
//!   saved-archive implementation.
//! - **Storage**: the scratch workspace an export is staged into.
//! - **Staging**: guarded extraction of an export into that workspace.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod catalog;
pub mod layer;
pub mod source;
pub mod storage;

pub use catalog::{LayerCatalog, LayerChain, LayerDescriptor, RawImage};
pub use source::{LayerSource, SavedImageArchive, inspect_layers};
pub use storage::ScratchDir;
