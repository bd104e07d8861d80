//! Integration tests for the flatten pipeline.
//!
//! These tests are implemented in:
//! `crates/layerx-flatten/tests/pipeline_test.rs`
//!
//! Covered scenarios:
//! - `pipeline_flattens_whole_image`: Default selection merges every layer, leaf winning
//! - `pipeline_range_by_prefix_matches_whole_image`: `ID:ID` range over id prefixes
//! - `pipeline_root_layer_alone_keeps_deleted_file`: Single-layer selection ignores later whiteouts
//! - `pipeline_reverse_lets_lower_layers_win`: `--reverse` flips precedence
//! - `pipeline_reads_gzipped_archive`: Gzipped saved image as the layer source
//! - `pipeline_strict_unknown_layer_aborts_before_export`: Strict failure stages nothing
//! - `pipeline_lenient_unknown_layer_yields_empty_archive`: Lenient failure yields an empty selection
//! - `pipeline_exports_nearest_leaf_selected_layer`: Export target is the selected layer nearest the leaf
