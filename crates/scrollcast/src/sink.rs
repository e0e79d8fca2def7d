//! Destinations for finished artifacts.

use crate::artifact::Artifact;
use crate::result::{CastError, CastResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Receives finished artifacts under a name
#[async_trait]
pub trait ArtifactSink: Send {
    /// Store `artifact` as `name`, returning where it went
    async fn store(&mut self, name: &str, artifact: &Artifact) -> CastResult<String>;
}

/// Keeps artifacts in memory, keyed by name
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    stored: BTreeMap<String, Artifact>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifact stored under `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.stored.get(name)
    }

    /// Stored names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.stored.keys().map(String::as_str).collect()
    }

    /// Number of stored artifacts
    #[must_use]
    pub fn len(&self) -> usize {
        self.stored.len()
    }

    /// Whether nothing was stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn store(&mut self, name: &str, artifact: &Artifact) -> CastResult<String> {
        self.stored.insert(name.to_string(), artifact.clone());
        Ok(format!("memory:{name}"))
    }
}

/// Writes `<name>.gif` files into a directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    /// Write into `root`, created on first store
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Target directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> CastResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(CastError::invalid_config(format!(
                "artifact name {name:?} is not a plain file name"
            )));
        }
        Ok(self.root.join(format!("{name}.gif")))
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn store(&mut self, name: &str, artifact: &Artifact) -> CastResult<String> {
        let path = self.path_for(name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, artifact.as_bytes()).await?;
        info!(path = %path.display(), bytes = artifact.len(), "artifact written");
        Ok(path.display().to_string())
    }
}
