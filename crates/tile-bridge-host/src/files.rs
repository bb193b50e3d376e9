//! Reading user-selected track files.

use async_trait::async_trait;
use tracing::debug;

use crate::SelectedFile;
use tile_bridge_common::{FileConfig, HostFunctionError};

/// Reads the contents of a selected file.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Read the whole file.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::FileReadFailed`] if the file cannot be read.
    async fn read(&self, file: &SelectedFile) -> Result<Vec<u8>, HostFunctionError>;
}

/// Reads selected files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFileSource;

#[async_trait]
impl FileSource for FsFileSource {
    async fn read(&self, file: &SelectedFile) -> Result<Vec<u8>, HostFunctionError> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| HostFunctionError::FileReadFailed {
                name: file.name.clone(),
                reason: e.to_string(),
            })?;
        debug!(name = %file.name, size = bytes.len(), "Track file read");
        Ok(bytes)
    }
}

/// Extension filter for track files.
///
/// Matching is a case-insensitive suffix check on the file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFilter {
    extension: String,
}

impl TrackFilter {
    /// Accept names ending in `extension`.
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into().to_lowercase(),
        }
    }

    /// Build the filter from the file configuration.
    pub fn from_config(config: &FileConfig) -> Self {
        Self::new(config.accepted_extension.clone())
    }

    /// Accepted extension, lowercased.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Whether `name` carries the accepted extension.
    pub fn accepts(&self, name: &str) -> bool {
        name.to_lowercase().ends_with(&self.extension)
    }

    /// Check a selected file against the filter.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::UnsupportedFile`] for any other extension.
    pub fn check(&self, file: &SelectedFile) -> Result<(), HostFunctionError> {
        if self.accepts(&file.name) {
            Ok(())
        } else {
            Err(HostFunctionError::UnsupportedFile {
                name: file.name.clone(),
                expected: self.extension.clone(),
            })
        }
    }
}

impl Default for TrackFilter {
    fn default() -> Self {
        Self::from_config(&FileConfig::default())
    }
}
