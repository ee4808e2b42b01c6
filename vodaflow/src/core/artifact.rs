//! Report artifacts produced by pipelines.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What an artifact contains, used by front-ends to pick a caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A human-readable text report.
    Report,
    /// A persisted run log.
    Log,
    /// An interactive map document.
    Map,
    /// A tabular export.
    Table,
}

/// A durable file a pipeline leaves behind for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// The kind of artifact.
    pub kind: ArtifactKind,
    /// Where the file lives.
    pub path: PathBuf,
    /// Caption shown next to the file.
    pub caption: String,
}

impl Artifact {
    /// Creates a new artifact.
    #[must_use]
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>, caption: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            caption: caption.into(),
        }
    }

    /// Returns the path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the file currently exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Returns the file name for display.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otchet_inki.txt");
        let artifact = Artifact::new(ArtifactKind::Report, &path, "Full report");

        assert!(!artifact.exists());
        std::fs::write(&path, "report").unwrap();
        assert!(artifact.exists());
        assert_eq!(artifact.file_name(), "otchet_inki.txt");
    }
}
