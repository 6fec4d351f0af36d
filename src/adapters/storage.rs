//! Artifact loading for references produced by earlier jobs.
//!
//! Remote references (`http://`, `https://`) are fetched with reqwest;
//! `file://` references and bare paths are read from disk.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::ArtifactLoader;

/// Loads artifacts over HTTP or from the local file system
pub struct HttpArtifactLoader {
    client: reqwest::Client,
}

impl HttpArtifactLoader {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactLoader for HttpArtifactLoader {
    async fn load(&self, reference: &str) -> Result<Vec<u8>> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            let response = self
                .client
                .get(reference)
                .send()
                .await
                .with_context(|| format!("Failed to fetch artifact: {}", reference))?;

            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("Artifact fetch failed ({}): {}", status, reference);
            }

            let bytes = response
                .bytes()
                .await
                .with_context(|| format!("Failed to read artifact body: {}", reference))?;
            return Ok(bytes.to_vec());
        }

        let path = reference.strip_prefix("file://").unwrap_or(reference);
        tokio::fs::read(Path::new(path))
            .await
            .with_context(|| format!("Failed to read artifact: {}", path))
    }
}

/// Guess a MIME type from a reference's extension
pub fn mime_for(reference: &str) -> &'static str {
    let ext = reference
        .rsplit('/')
        .next()
        .and_then(|name| name.split('?').next())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        _ => "image/png",
    }
}

/// Encode artifact bytes as a data URI
pub fn to_data_uri(reference: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_for(reference), STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use tempfile::TempDir;

    #[test]
    fn test_mime_guessing() {
        assert_eq!(mime_for("https://cdn/a.JPG?sig=1"), "image/jpeg");
        assert_eq!(mime_for("https://cdn/clip.mp4"), "video/mp4");
        assert_eq!(mime_for("https://cdn/noext"), "image/png");
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(to_data_uri("a.png", b"hi"), "data:image/png;base64,aGk=");
    }

    #[tokio::test]
    async fn test_load_local_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("frame.png");
        std::fs::write(&path, b"pixels").unwrap();

        let loader = HttpArtifactLoader::new(Duration::from_secs(5)).unwrap();
        let bytes = loader
            .load(&format!("file://{}", path.display()))
            .await
            .unwrap();
        assert_eq!(bytes, b"pixels");
    }

    #[tokio::test]
    async fn test_load_remote_artifact() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/a.png")
            .with_status(200)
            .with_body("png-bytes")
            .create_async()
            .await;

        let loader = HttpArtifactLoader::new(Duration::from_secs(5)).unwrap();
        let bytes = loader.load(&format!("{}/a.png", server.url())).await.unwrap();
        assert_eq!(bytes, b"png-bytes");
    }

    #[tokio::test]
    async fn test_load_remote_missing() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/gone.png")
            .with_status(404)
            .create_async()
            .await;

        let loader = HttpArtifactLoader::new(Duration::from_secs(5)).unwrap();
        assert!(loader.load(&format!("{}/gone.png", server.url())).await.is_err());
    }
}
