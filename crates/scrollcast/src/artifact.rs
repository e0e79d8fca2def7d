//! Finished animated-image artifacts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// MIME type of every artifact this crate produces
pub const GIF_CONTENT_TYPE: &str = "image/gif";

/// Which output an artifact is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Straight from the encoder session
    Original,
    /// Derived with the lossless profile
    Lossless,
    /// Derived with the lossy profile
    Lossy,
    /// Derived with the ultra-lossy profile
    UltraLossy,
}

impl ArtifactKind {
    /// Name used when handing the artifact to a sink
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Lossless => "lossless",
            Self::Lossy => "lossy",
            Self::UltraLossy => "ultra-lossy",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable encoded GIF
///
/// Cloning shares the underlying buffer; nothing can mutate it.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    kind: ArtifactKind,
    bytes: Arc<[u8]>,
}

impl Artifact {
    /// Wrap encoded bytes
    #[must_use]
    pub fn new(kind: ArtifactKind, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
        }
    }

    /// Artifact kind
    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Encoded bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the artifact has no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// MIME type
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        GIF_CONTENT_TYPE
    }

    /// Whether the bytes start with a GIF signature
    #[must_use]
    pub fn has_gif_header(&self) -> bool {
        self.bytes.starts_with(b"GIF89a") || self.bytes.starts_with(b"GIF87a")
    }

    /// Logical screen size from the GIF header
    #[must_use]
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        if !self.has_gif_header() || self.bytes.len() < 10 {
            return None;
        }
        let width = u16::from_le_bytes([self.bytes[6], self.bytes[7]]);
        let height = u16::from_le_bytes([self.bytes[8], self.bytes[9]]);
        Some((width, height))
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .finish()
    }
}
