//! Archive extraction, used when a target is given.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use layerx_common::config::{Compression, FlattenConfig};
use layerx_common::constants::STDOUT_TARGET;
use layerx_common::types::LayerId;
use layerx_flatten::{MergeSummary, flatten_layers};
use layerx_image::{LayerDescriptor, LayerSource};

/// Output stream with optional compression.
pub enum ArchiveWriter<W: Write> {
    /// Uncompressed.
    Plain(W),
    /// gzip-compressed.
    Gzip(GzEncoder<W>),
    /// bzip2-compressed.
    Bzip2(BzEncoder<W>),
}

impl<W: Write> ArchiveWriter<W> {
    /// Wraps `inner` with the requested compression.
    ///
    /// bzip2 has no level 0; it is raised to 1.
    pub fn new(inner: W, compression: Compression, level: u32) -> Self {
        match compression {
            Compression::None => Self::Plain(inner),
            Compression::Gzip => Self::Gzip(GzEncoder::new(inner, flate2::Compression::new(level))),
            Compression::Bzip2 => Self::Bzip2(BzEncoder::new(
                inner,
                bzip2::Compression::new(level.clamp(1, 9)),
            )),
        }
    }

    /// Writes any compression trailer and returns the inner stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailer cannot be written.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(inner) => Ok(inner),
            Self::Gzip(encoder) => encoder.finish(),
            Self::Bzip2(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for ArchiveWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(inner) => inner.write(buf),
            Self::Gzip(encoder) => encoder.write(buf),
            Self::Bzip2(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(inner) => inner.flush(),
            Self::Gzip(encoder) => encoder.flush(),
            Self::Bzip2(encoder) => encoder.flush(),
        }
    }
}

/// Flattens `layers` into `target`.
///
/// A file target is created fresh unless `config.force` is set, and is
/// removed again if flattening fails.
///
/// # Errors
///
/// Returns an error if the target cannot be opened or written, or if
/// flattening fails.
pub fn extract_layers<S: LayerSource + ?Sized>(
    source: &S,
    layers: &[LayerDescriptor],
    top_most: Option<&LayerId>,
    target: &str,
    config: &FlattenConfig,
) -> anyhow::Result<MergeSummary> {
    if target == STDOUT_TARGET {
        let (mut stdout, summary) = write_archive(
            source,
            layers,
            top_most,
            io::stdout().lock(),
            config.compression,
            config.compression_level,
        )?;
        stdout.flush()?;
        return Ok(summary);
    }

    let path = Path::new(target);
    warn_on_extension_mismatch(path, config.compression);
    let file = open_target(path, config.force)?;

    let result = write_archive(
        source,
        layers,
        top_most,
        BufWriter::new(file),
        config.compression,
        config.compression_level,
    )
    .and_then(|(mut out, summary)| {
        out.flush()
            .with_context(|| format!("unable to write target file \"{target}\""))?;
        Ok(summary)
    });

    if result.is_err() {
        if let Err(e) = fs::remove_file(path) {
            tracing::debug!(path = %target, error = %e, "failed to remove partial target");
        }
    }
    result
}

/// Flattens `layers` into a tar stream written to `sink`.
///
/// # Errors
///
/// Returns an error if flattening fails or the archive cannot be finished.
pub fn write_archive<S, W>(
    source: &S,
    layers: &[LayerDescriptor],
    top_most: Option<&LayerId>,
    sink: W,
    compression: Compression,
    level: u32,
) -> anyhow::Result<(W, MergeSummary)>
where
    S: LayerSource + ?Sized,
    W: Write,
{
    let mut builder = tar::Builder::new(ArchiveWriter::new(sink, compression, level));
    let summary = flatten_layers(source, layers, top_most, &mut builder)?;
    let sink = builder
        .into_inner()
        .and_then(ArchiveWriter::finish)
        .context("unable to finish target archive")?;
    Ok((sink, summary))
}

fn open_target(path: &Path, force: bool) -> anyhow::Result<fs::File> {
    let opened = if force {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    } else {
        OpenOptions::new().write(true).create_new(true).open(path)
    };
    opened.with_context(|| format!("unable to open target file \"{}\"", path.display()))
}

/// Whether the target's extension matches the compression.
fn extension_matches(path: &Path, compression: Compression) -> bool {
    compression.extension().is_none_or(|expected| {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(expected))
    })
}

fn warn_on_extension_mismatch(path: &Path, compression: Compression) {
    if !extension_matches(path, compression) {
        tracing::warn!(
            path = %path.display(),
            compression = %compression,
            "target name doesn't match compression type"
        );
    }
}
