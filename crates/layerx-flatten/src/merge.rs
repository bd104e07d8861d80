//! Layer merge engine.
//!
//! Replays layer payloads highest precedence first into one output tar.
//! An entry is written only if no higher-precedence layer already wrote
//! the same path, deleted it, or put a non-directory somewhere above it.
//! Whiteout markers are consumed, never written.

use std::io::{BufReader, Read, Write};
use std::path::Path;

use layerx_common::constants::WHITEOUT_PREFIX;
use layerx_common::error::{LayerxError, Result};
use layerx_common::types::LayerId;
use layerx_image::catalog::LayerDescriptor;
use layerx_image::layer::{open_layer_payload, stage_export};
use layerx_image::source::LayerSource;
use layerx_image::storage::ScratchDir;

use crate::hiding::{HideReason, PathHidingState, normalize_entry_path};

/// Whiteout target naming an opaque directory (`.wh..wh..opq`).
const OPAQUE_MARKER: &str = ".wh..opq";

/// Counters for one merge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Layers replayed.
    pub layers: usize,
    /// Entries written to the output.
    pub written: usize,
    /// Entries skipped because a higher layer wrote the same path.
    pub overwritten: usize,
    /// Entries skipped because a hiding rule covered them.
    pub hidden: usize,
    /// Whiteout markers consumed.
    pub whiteouts: usize,
}

/// Applies layer payloads, one at a time, to an output archive.
#[derive(Debug, Default)]
pub struct Merger {
    state: PathHidingState,
    summary: MergeSummary,
}

impl Merger {
    /// Creates a merger with empty hiding state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays one layer's payload into `out`.
    ///
    /// Must be called in precedence order, highest first. `label` names the
    /// layer in logs and errors.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the payload cannot be read or an entry
    /// cannot be written.
    pub fn apply_layer<R: Read, W: Write>(
        &mut self,
        label: &str,
        payload: R,
        out: &mut tar::Builder<W>,
    ) -> Result<()> {
        let io_err = |e| LayerxError::io(label, e);
        let mut archive = tar::Archive::new(payload);
        let mut opaque_dirs = Vec::new();

        for entry in archive.entries().map_err(io_err)? {
            let mut entry = entry.map_err(io_err)?;
            let entry_path = entry.path().map_err(io_err)?.into_owned();
            let path = normalize_entry_path(&entry_path.to_string_lossy());
            let (dir, base) = path.rsplit_once('/').unwrap_or(("", path.as_str()));

            if let Some(target) = base.strip_prefix(WHITEOUT_PREFIX) {
                self.summary.whiteouts += 1;
                if target == OPAQUE_MARKER {
                    opaque_dirs.push(dir.to_string());
                } else if target.is_empty() || target.starts_with(WHITEOUT_PREFIX) {
                    tracing::debug!(path = %path, layer = label, "ignoring whiteout metadata");
                } else {
                    let removed = join_path(dir, target);
                    let _ = self.state.record(&removed, HideReason::Removal);
                    if self.state.is_seen(&removed) {
                        tracing::debug!(path = %removed, layer = label, "skipping removal of already written path");
                    } else {
                        tracing::debug!(path = %removed, layer = label, "hiding as removed");
                    }
                }
                continue;
            }

            if self.state.is_seen(&path) {
                self.summary.overwritten += 1;
                tracing::debug!(path = %path, layer = label, "skipping as overwritten");
                continue;
            }

            if let Some(rule) = self.state.hidden_by(&path) {
                self.summary.hidden += 1;
                tracing::debug!(
                    path = %path,
                    layer = label,
                    reason = %rule.reason,
                    hidden_by = %rule.path,
                    "skipping hidden entry"
                );
                continue;
            }

            let header = entry.header();
            let is_dir = header.entry_type().is_dir();
            tracing::info!(
                path = %path,
                layer = label,
                size = header.size().unwrap_or_default(),
                mode = format_args!("{:o}", header.mode().unwrap_or_default()),
                mtime = header.mtime().unwrap_or_default(),
                "writing entry"
            );

            copy_entry(&mut entry, &entry_path, out).map_err(|e| LayerxError::io(&entry_path, e))?;
            self.summary.written += 1;
            self.state.mark_seen(&path);
            if !is_dir {
                let _ = self.state.record(&path, HideReason::Presence);
            }
        }

        for dir in opaque_dirs {
            tracing::debug!(path = %dir, layer = label, "hiding lower contents of opaque directory");
            let _ = self.state.record(&dir, HideReason::Opaque);
        }

        self.summary.layers += 1;
        Ok(())
    }

    /// Hiding state accumulated so far.
    #[must_use]
    pub const fn state(&self) -> &PathHidingState {
        &self.state
    }

    /// Ends the pass and returns its counters.
    #[must_use]
    pub fn finish(self) -> MergeSummary {
        self.summary
    }
}

/// Writes an entry with its original metadata. Links carry no payload.
fn copy_entry<R: Read, W: Write>(
    entry: &mut tar::Entry<'_, R>,
    path: &Path,
    out: &mut tar::Builder<W>,
) -> std::io::Result<()> {
    let mut header = entry.header().clone();
    if let Some(target) = entry.link_name()?.map(std::borrow::Cow::into_owned) {
        header.set_size(0);
        return out.append_link(&mut header, path, target);
    }
    out.append_data(&mut header, path, entry)
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Flattens `layers` (highest precedence first) into `out`.
///
/// `top_most` names the layer whose export contains every selected layer;
/// it defaults to the first of `layers`. The export is staged in a fresh
/// scratch directory that is removed before returning.
///
/// # Errors
///
/// Returns an error if the export fails, contains an unsafe path, lacks a
/// selected layer, or an entry cannot be written.
pub fn flatten_layers<S, W>(
    source: &S,
    layers: &[LayerDescriptor],
    top_most: Option<&LayerId>,
    out: &mut tar::Builder<W>,
) -> Result<MergeSummary>
where
    S: LayerSource + ?Sized,
    W: Write,
{
    if layers.is_empty() {
        tracing::warn!("nothing to extract");
        return Ok(MergeSummary::default());
    }
    flatten_in(ScratchDir::new()?, source, layers, top_most, out)
}

/// Like [`flatten_layers`], staging into the given scratch directory.
///
/// # Errors
///
/// See [`flatten_layers`].
pub fn flatten_in<S, W>(
    scratch: ScratchDir,
    source: &S,
    layers: &[LayerDescriptor],
    top_most: Option<&LayerId>,
    out: &mut tar::Builder<W>,
) -> Result<MergeSummary>
where
    S: LayerSource + ?Sized,
    W: Write,
{
    let result = replay(&scratch, source, layers, top_most, out);
    scratch.close();
    result
}

fn replay<S, W>(
    scratch: &ScratchDir,
    source: &S,
    layers: &[LayerDescriptor],
    top_most: Option<&LayerId>,
    out: &mut tar::Builder<W>,
) -> Result<MergeSummary>
where
    S: LayerSource + ?Sized,
    W: Write,
{
    let Some(top_most) = top_most.or_else(|| layers.first().map(LayerDescriptor::id)) else {
        tracing::warn!("nothing to extract");
        return Ok(MergeSummary::default());
    };

    let export = source.export_chain(top_most)?;
    let _ = stage_export(export, scratch)?;

    let mut merger = Merger::new();
    for layer in layers {
        let payload = open_layer_payload(scratch, layer.id())?;
        merger.apply_layer(layer.short_id(), BufReader::new(payload), out)?;
    }

    let summary = merger.finish();
    tracing::info!(
        layers = summary.layers,
        written = summary.written,
        overwritten = summary.overwritten,
        hidden = summary.hidden,
        whiteouts = summary.whiteouts,
        "layers flattened"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::{TimeZone, Utc};

    use super::*;

    enum Item<'a> {
        File(&'a str, &'a [u8]),
        Dir(&'a str),
        Symlink(&'a str, &'a str),
        /// File whose name is stored exactly as given.
        Raw(&'a str, &'a [u8]),
    }

    fn layer_tar(items: &[Item<'_>]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for item in items {
            let mut header = tar::Header::new_gnu();
            header.set_mtime(1_600_000_000);
            header.set_uid(1000);
            header.set_gid(1000);
            match item {
                Item::File(path, data) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_mode(0o640);
                    header.set_size(data.len() as u64);
                    builder.append_data(&mut header, path, *data).expect("file");
                }
                Item::Dir(path) => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                    builder.append_data(&mut header, path, std::io::empty()).expect("dir");
                }
                Item::Symlink(path, target) => {
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_mode(0o777);
                    header.set_size(0);
                    builder.append_link(&mut header, path, target).expect("symlink");
                }
                Item::Raw(name, data) => {
                    let mut header = tar::Header::new_old();
                    header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_mode(0o640);
                    header.set_mtime(1_600_000_000);
                    header.set_uid(1000);
                    header.set_gid(1000);
                    header.set_size(data.len() as u64);
                    header.set_cksum();
                    builder.append(&header, *data).expect("raw");
                }
            }
        }
        builder.into_inner().expect("finish")
    }

    struct Written {
        path: String,
        kind: tar::EntryType,
        data: Vec<u8>,
        mode: u32,
        mtime: u64,
        uid: u64,
        link: Option<String>,
    }

    fn read_output(bytes: &[u8]) -> Vec<Written> {
        let mut archive = tar::Archive::new(Cursor::new(bytes));
        archive
            .entries()
            .expect("entries")
            .map(|entry| {
                let mut entry = entry.expect("entry");
                let mut data = Vec::new();
                let _ = entry.read_to_end(&mut data).expect("read");
                let header = entry.header();
                Written {
                    path: normalize_entry_path(&entry.path().expect("path").to_string_lossy()),
                    kind: header.entry_type(),
                    data,
                    mode: header.mode().expect("mode"),
                    mtime: header.mtime().expect("mtime"),
                    uid: header.uid().expect("uid"),
                    link: entry
                        .link_name()
                        .expect("link")
                        .map(|l| l.to_string_lossy().into_owned()),
                }
            })
            .collect()
    }

    fn merge(layers: &[Vec<u8>]) -> (Vec<Written>, MergeSummary, Merger) {
        let mut out = tar::Builder::new(Vec::new());
        let mut merger = Merger::new();
        for (n, layer) in layers.iter().enumerate() {
            merger
                .apply_layer(&format!("L{n}"), Cursor::new(layer), &mut out)
                .expect("apply");
        }
        let bytes = out.into_inner().expect("finish");
        let summary = merger.summary;
        (read_output(&bytes), summary, merger)
    }

    fn paths(written: &[Written]) -> Vec<&str> {
        written.iter().map(|w| w.path.as_str()).collect()
    }

    #[test]
    fn whiteouts_and_overwrites_follow_precedence() {
        let l0 = layer_tar(&[Item::File("a", b"a0"), Item::File("b/x", b"x0")]);
        let l1 = layer_tar(&[Item::File("b/x", b"x1"), Item::File(".wh.a", b"")]);
        let l2 = layer_tar(&[Item::File("c", b"c2")]);

        let (written, summary, _) = merge(&[l2, l1, l0]);

        assert_eq!(paths(&written), ["c", "b/x"]);
        assert_eq!(written[1].data, b"x1");
        assert_eq!(summary.overwritten, 1);
        assert_eq!(summary.hidden, 1);
        assert_eq!(summary.whiteouts, 1);
    }

    #[test]
    fn single_layer_is_copied_without_markers() {
        let l0 = layer_tar(&[
            Item::Dir("etc"),
            Item::File("etc/hosts", b"127.0.0.1"),
            Item::File("etc/.wh.motd", b""),
        ]);
        let (written, summary, _) = merge(&[l0]);
        assert_eq!(paths(&written), ["etc", "etc/hosts"]);
        assert_eq!(summary.whiteouts, 1);
    }

    #[test]
    fn file_blocks_lower_directory_and_descendants() {
        let upper = layer_tar(&[Item::File("d", b"plain file")]);
        let lower = layer_tar(&[
            Item::Dir("d"),
            Item::File("d/y", b"y"),
            Item::Dir("d/sub"),
            Item::File("d/sub/z", b"z"),
            Item::File("dz", b"sibling"),
        ]);

        let (written, summary, merger) = merge(&[upper, lower]);

        assert_eq!(paths(&written), ["d", "dz"]);
        assert_eq!(written[0].kind, tar::EntryType::Regular);
        assert_eq!(summary.overwritten, 1);
        assert_eq!(summary.hidden, 3);
        let rule = merger.state().hidden_by("d/sub/z").expect("hidden");
        assert_eq!(rule.reason, HideReason::Presence);
    }

    #[test]
    fn directories_merge_across_layers() {
        let upper = layer_tar(&[Item::Dir("usr"), Item::File("usr/new", b"n")]);
        let lower = layer_tar(&[Item::Dir("usr"), Item::File("usr/old", b"o")]);
        let (written, _, _) = merge(&[upper, lower]);
        assert_eq!(paths(&written), ["usr", "usr/new", "usr/old"]);
    }

    #[test]
    fn removed_directory_hides_lower_subtree() {
        let upper = layer_tar(&[Item::File(".wh.var", b"")]);
        let lower = layer_tar(&[Item::Dir("var"), Item::File("var/log", b"l"), Item::File("varnish", b"v")]);
        let (written, summary, merger) = merge(&[upper, lower]);
        assert_eq!(paths(&written), ["varnish"]);
        assert_eq!(summary.hidden, 2);
        assert_eq!(
            merger.state().hidden_by("var/log").map(|r| r.reason),
            Some(HideReason::Removal)
        );
    }

    #[test]
    fn removal_below_writer_is_recorded_without_effect() {
        let upper = layer_tar(&[Item::File("f", b"kept")]);
        let lower = layer_tar(&[Item::File(".wh.f", b"")]);
        let lowest = layer_tar(&[Item::File("f", b"old")]);
        let (written, _, merger) = merge(&[upper, lower, lowest]);
        assert_eq!(paths(&written), ["f"]);
        assert_eq!(written[0].data, b"kept");
        assert!(merger.state().rules().any(|r| r.path == "f" && r.reason == HideReason::Removal));
    }

    #[test]
    fn opaque_directory_hides_only_lower_contents() {
        let upper = layer_tar(&[
            Item::File("opt/.wh..wh..opq", b""),
            Item::Dir("opt"),
            Item::File("opt/fresh", b"f"),
        ]);
        let lower = layer_tar(&[Item::Dir("opt"), Item::File("opt/stale", b"s")]);
        let (written, _, _) = merge(&[upper, lower]);
        assert_eq!(paths(&written), ["opt", "opt/fresh"]);
    }

    #[test]
    fn links_are_written_without_payload() {
        let l0 = layer_tar(&[
            Item::File("bin/busybox", b"ELF"),
            Item::Symlink("bin/sh", "busybox"),
        ]);
        let (written, _, _) = merge(&[l0]);
        let link = written.iter().find(|w| w.path == "bin/sh").expect("link");
        assert_eq!(link.kind, tar::EntryType::Symlink);
        assert_eq!(link.link.as_deref(), Some("busybox"));
        assert!(link.data.is_empty());
    }

    #[test]
    fn metadata_is_preserved() {
        let l0 = layer_tar(&[Item::File("etc/passwd", b"root:x:0:0")]);
        let (written, _, _) = merge(&[l0]);
        assert_eq!(written[0].mode, 0o640);
        assert_eq!(written[0].mtime, 1_600_000_000);
        assert_eq!(written[0].uid, 1000);
        assert_eq!(written[0].data, b"root:x:0:0");
    }

    #[test]
    fn dotted_and_plain_names_collide() {
        let upper = layer_tar(&[Item::Raw("./etc/hostname", b"new")]);
        let lower = layer_tar(&[Item::File("etc/hostname", b"old")]);
        let (written, summary, _) = merge(&[upper, lower]);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].data, b"new");
        assert_eq!(summary.overwritten, 1);
    }

    /// Serves layers from memory as a tar of tars.
    struct MemorySource {
        layers: Vec<(LayerDescriptor, Vec<u8>)>,
        extra: Option<(String, Vec<u8>)>,
    }

    impl LayerSource for MemorySource {
        fn list_layers(&self) -> Result<Vec<LayerDescriptor>> {
            Ok(self.layers.iter().map(|(l, _)| l.clone()).collect())
        }

        fn export_chain(&self, _top_most: &LayerId) -> Result<Box<dyn Read + '_>> {
            let mut builder = tar::Builder::new(Vec::new());
            if let Some((name, data)) = &self.extra {
                let mut header = tar::Header::new_old();
                header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_mtime(1_600_000_000);
                header.set_uid(0);
                header.set_gid(0);
                header.set_entry_type(tar::EntryType::Regular);
                header.set_cksum();
                builder.append(&header, data.as_slice()).expect("raw entry");
            }
            for (layer, payload) in &self.layers {
                let mut header = tar::Header::new_gnu();
                header.set_size(payload.len() as u64);
                header.set_mode(0o644);
                builder
                    .append_data(&mut header, format!("{}/layer.tar", layer.id()), payload.as_slice())
                    .expect("layer");
            }
            Ok(Box::new(Cursor::new(builder.into_inner().expect("finish"))))
        }
    }

    fn descriptor(n: u8, parent: Option<&LayerDescriptor>) -> LayerDescriptor {
        LayerDescriptor::new(
            LayerId::from_hex(format!("{n:02x}").repeat(32)).expect("id"),
            parent.map(|p| p.id().clone()),
            Utc.timestamp_opt(i64::from(n), 0).unwrap(),
            Vec::new(),
            0,
        )
    }

    #[test]
    fn empty_selection_yields_empty_archive() {
        let source = MemorySource {
            layers: Vec::new(),
            extra: None,
        };
        let mut out = tar::Builder::new(Vec::new());
        let summary = flatten_layers(&source, &[], None, &mut out).expect("flatten");
        let bytes = out.into_inner().expect("finish");

        assert_eq!(summary, MergeSummary::default());
        assert!(read_output(&bytes).is_empty());
    }

    #[test]
    fn flatten_in_stages_and_merges() {
        let root = descriptor(1, None);
        let child = descriptor(2, Some(&root));
        let source = MemorySource {
            layers: vec![
                (root.clone(), layer_tar(&[Item::File("a", b"root")])),
                (child.clone(), layer_tar(&[Item::File("a", b"child")])),
            ],
            extra: None,
        };

        let parent = tempfile::tempdir().expect("tempdir");
        let scratch = ScratchDir::in_dir(parent.path()).expect("scratch");
        let staged = scratch.layer_tar_path(child.id());
        let mut out = tar::Builder::new(Vec::new());
        let summary = flatten_in(scratch, &source, &[child.clone(), root], Some(child.id()), &mut out)
            .expect("flatten");

        let written = read_output(&out.into_inner().expect("finish"));
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].data, b"child");
        assert_eq!(summary.layers, 2);
        assert!(!staged.exists());
    }

    #[test]
    fn unsafe_export_fails_and_cleans_up() {
        let root = descriptor(1, None);
        let source = MemorySource {
            layers: vec![(root.clone(), layer_tar(&[Item::File("a", b"root")]))],
            extra: Some(("../../outside".into(), b"evil".to_vec())),
        };

        let parent = tempfile::tempdir().expect("tempdir");
        let scratch = ScratchDir::in_dir(parent.path()).expect("scratch");
        let root_dir = scratch.root().to_path_buf();
        let mut out = tar::Builder::new(Vec::new());
        let err = flatten_in(scratch, &source, &[root], None, &mut out).unwrap_err();

        assert!(matches!(err, LayerxError::UnsafeTarPath { .. }));
        assert!(!root_dir.exists());
        assert!(read_output(&out.into_inner().expect("finish")).is_empty());
    }

    #[test]
    fn missing_layer_payload_is_an_error() {
        let root = descriptor(1, None);
        let stray = descriptor(9, None);
        let source = MemorySource {
            layers: vec![(root.clone(), layer_tar(&[]))],
            extra: None,
        };
        let mut out = tar::Builder::new(Vec::new());
        let err = flatten_layers(&source, &[stray, root], None, &mut out).unwrap_err();
        assert!(matches!(err, LayerxError::NotFound { .. }));
    }
}
