//! Best-effort thumbnail loading.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use tracing::debug;

/// Largest thumbnail we will hold in memory.
pub const DEFAULT_MAX_THUMBNAIL_BYTES: usize = 512 * 1024;

/// A downloaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub url: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Loads thumbnails. Failures are not errors; the notification goes out
/// without an image.
#[async_trait]
pub trait ThumbnailLoader: Send + Sync {
    async fn load(&self, url: &str) -> Option<Thumbnail>;
}

/// Loader that never returns an image.
pub struct NoThumbnails;

#[async_trait]
impl ThumbnailLoader for NoThumbnails {
    async fn load(&self, _url: &str) -> Option<Thumbnail> {
        None
    }
}

/// Loads images over HTTP, refusing anything that is not an image or is
/// larger than the configured cap.
pub struct HttpThumbnailLoader {
    http: Client,
    max_bytes: usize,
}

impl HttpThumbnailLoader {
    pub fn new() -> Self {
        Self::with_max_bytes(DEFAULT_MAX_THUMBNAIL_BYTES)
    }

    pub fn with_max_bytes(max_bytes: usize) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build HTTP client");
        Self { http, max_bytes }
    }
}

impl Default for HttpThumbnailLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThumbnailLoader for HttpThumbnailLoader {
    async fn load(&self, url: &str) -> Option<Thumbnail> {
        let mut response = match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(url, status = response.status().as_u16(), "thumbnail request failed");
                return None;
            }
            Err(e) => {
                debug!(url, error = %e, "thumbnail request failed");
                return None;
            }
        };

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("image/") {
            debug!(url, content_type, "thumbnail is not an image");
            return None;
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            debug!(url, "thumbnail too large");
            return None;
        }

        let mut bytes = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if bytes.len() + chunk.len() > self.max_bytes {
                        debug!(url, "thumbnail too large");
                        return None;
                    }
                    bytes.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(url, error = %e, "thumbnail download failed");
                    return None;
                }
            }
        }

        Some(Thumbnail {
            url: url.to_string(),
            content_type,
            bytes,
        })
    }
}

/// Load `url`, giving up after `timeout`.
pub async fn load_with_timeout(
    loader: &dyn ThumbnailLoader,
    url: &str,
    timeout: Duration,
) -> Option<Thumbnail> {
    match tokio::time::timeout(timeout, loader.load(url)).await {
        Ok(thumbnail) => thumbnail,
        Err(_) => {
            debug!(url, timeout_ms = timeout.as_millis() as u64, "thumbnail load timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct SlowLoader;

    #[async_trait]
    impl ThumbnailLoader for SlowLoader {
        async fn load(&self, url: &str) -> Option<Thumbnail> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Some(Thumbnail {
                url: url.to_string(),
                content_type: "image/png".to_string(),
                bytes: vec![1],
            })
        }
    }

    #[tokio::test]
    async fn test_loads_image() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/a.png", mock_server.uri());
        let thumbnail = HttpThumbnailLoader::new().load(&url).await.unwrap();
        assert_eq!(thumbnail.content_type, "image/png");
        assert_eq!(thumbnail.bytes, vec![0x89, 0x50, 0x4e, 0x47]);
    }

    #[tokio::test]
    async fn test_rejects_non_image_and_oversized() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html></html>"),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/big.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![0u8; 64]),
            )
            .mount(&mock_server)
            .await;

        let loader = HttpThumbnailLoader::with_max_bytes(16);
        assert!(loader.load(&format!("{}/page", mock_server.uri())).await.is_none());
        assert!(loader.load(&format!("{}/big.jpg", mock_server.uri())).await.is_none());
        assert!(loader.load(&format!("{}/missing", mock_server.uri())).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_none() {
        let thumbnail =
            load_with_timeout(&SlowLoader, "https://example.com/x.png", Duration::from_secs(2))
                .await;
        assert!(thumbnail.is_none());
    }
}
