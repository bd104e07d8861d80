//! Domain primitive types used across the layerx workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{LAYER_ID_HEX_LENGTH, SHORT_ID_LENGTH};

/// Canonical layer identifier: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct LayerId(String);

impl LayerId {
    /// Creates an identifier from a hex string, lowercasing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a 64-character hex string.
    pub fn from_hex(hex: impl AsRef<str>) -> crate::error::Result<Self> {
        let hex = hex.as_ref().to_ascii_lowercase();
        if !is_full_hex_id(&hex) {
            return Err(crate::error::LayerxError::Config {
                message: format!("invalid layer identifier: {hex}"),
            });
        }
        Ok(Self(hex))
    }

    /// Returns the full hex-encoded identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the abbreviated identifier (first 12 hex characters).
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..SHORT_ID_LENGTH]
    }
}

impl TryFrom<String> for LayerId {
    type Error = crate::error::LayerxError;

    fn try_from(hex: String) -> crate::error::Result<Self> {
        Self::from_hex(hex)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for LayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether `s` is a complete layer identifier.
#[must_use]
pub fn is_full_hex_id(s: &str) -> bool {
    s.len() == LAYER_ID_HEX_LENGTH && is_hex(s)
}

/// Whether `s` is a non-empty run of ASCII hex digits.
#[must_use]
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}
