//! Login artifact capture.
//!
//! The artifact is the login link encoded in the page's QR code. How the
//! host obtains it (screenshot + decode, DOM scrape, ...) is outside this
//! crate; [`FileArtifactSource`] reads whatever the host last wrote to disk.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::traits::NotifyError;

/// A captured login artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrArtifact {
    /// The link the QR code encodes.
    pub login_url: String,
    pub captured_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn capture(&self) -> Result<QrArtifact, NotifyError>;
}

/// Reads the login link from a text file refreshed by the host page.
#[derive(Debug, Clone)]
pub struct FileArtifactSource {
    path: PathBuf,
}

impl FileArtifactSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl ArtifactSource for FileArtifactSource {
    async fn capture(&self) -> Result<QrArtifact, NotifyError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            NotifyError::Capture(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let login_url = raw.trim();
        if login_url.is_empty() {
            return Err(NotifyError::Capture(format!(
                "{} holds no login link",
                self.path.display()
            )));
        }
        tracing::debug!(path = %self.path.display(), "captured login artifact");
        Ok(QrArtifact {
            login_url: login_url.to_string(),
            captured_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_trimmed_link() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qr.txt");
        std::fs::write(&path, "  https://login.example/qr?code=abc\n").unwrap();

        let artifact = FileArtifactSource::new(&path).capture().await.unwrap();
        assert_eq!(artifact.login_url, "https://login.example/qr?code=abc");
    }

    #[tokio::test]
    async fn missing_file_is_capture_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileArtifactSource::new(dir.path().join("absent.txt"))
            .capture()
            .await;
        assert!(matches!(result, Err(NotifyError::Capture(_))));
    }

    #[tokio::test]
    async fn empty_file_is_capture_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qr.txt");
        std::fs::write(&path, "\n").unwrap();
        let result = FileArtifactSource::new(&path).capture().await;
        match result {
            Err(NotifyError::Capture(msg)) => assert!(msg.contains("no login link")),
            other => panic!("expected Capture error, got: {other:?}"),
        }
    }
}
