//! # layerx-flatten
//!
//! Turns a slice of an image's layer chain into one flat filesystem tar.
//!
//! Handles:
//! - **Selection**: resolving user layer specs against a chain into a
//!   deduplicated precedence order.
//! - **Hiding**: tracking which paths lower layers may no longer write.
//! - **Merge**: replaying staged layer payloads into the output archive,
//!   consuming whiteouts along the way.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hiding;
pub mod merge;
pub mod selection;

pub use hiding::{HideReason, HidingRule, PathHidingState};
pub use merge::{MergeSummary, Merger, flatten_in, flatten_layers};
pub use selection::{ResolvedSelection, SelectionSpec, resolve_selection};
