//! Configuration model for a flatten run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_COMPRESSION_LEVEL;
use crate::error::LayerxError;

/// How unresolvable layer selections are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Unresolvable selections are dropped with a warning.
    #[default]
    Lenient,
    /// Unresolvable selections abort the run.
    Strict,
}

impl SelectionPolicy {
    /// Builds a policy from a strictness flag.
    #[must_use]
    pub const fn from_strict(strict: bool) -> Self {
        if strict { Self::Strict } else { Self::Lenient }
    }

    /// Returns `true` for [`SelectionPolicy::Strict`].
    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Compression applied to the output archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain tar.
    #[default]
    None,
    /// gzip (`.gz`).
    Gzip,
    /// bzip2 (`.bz2`).
    Bzip2,
}

impl Compression {
    /// File extension conventionally used for this compression.
    #[must_use]
    pub const fn extension(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gz"),
            Self::Bzip2 => Some("bz2"),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Gzip => write!(f, "gzip"),
            Self::Bzip2 => write!(f, "bzip2"),
        }
    }
}

impl FromStr for Compression {
    type Err = LayerxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "gz" | "gzip" => Ok(Self::Gzip),
            "bz2" | "bzip2" => Ok(Self::Bzip2),
            other => Err(LayerxError::Config {
                message: format!("unknown compression: {other}"),
            }),
        }
    }
}

/// Options controlling layer selection and archive output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenConfig {
    /// Reverse the layer order from that specified.
    pub reverse: bool,
    /// Treat unresolvable layer selections as errors.
    pub policy: SelectionPolicy,
    /// Compression applied to the target archive.
    pub compression: Compression,
    /// Compression level, 0 through 9.
    pub compression_level: u32,
    /// Overwrite an existing target archive.
    pub force: bool,
    /// Print only short identifiers when listing layers.
    pub quiet: bool,
}

impl FlattenConfig {
    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `LayerxError::Config` if the compression level is above 9.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.compression_level > 9 {
            return Err(LayerxError::Config {
                message: format!(
                    "compression level must be between 0 and 9, got {}",
                    self.compression_level
                ),
            });
        }
        Ok(())
    }
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            reverse: false,
            policy: SelectionPolicy::default(),
            compression: Compression::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            force: false,
            quiet: false,
        }
    }
}
