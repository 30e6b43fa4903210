//! Feed sources and the downloader that turns them into candidates.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, header};
use tracing::debug;

use crate::{FetchError, UpdateError};

/// A configured feed, identified by a short stable id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub id: String,
    pub url: String,
}

impl FeedSource {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }

    /// Parse a comma-separated list of `ID=URL` pairs.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, UpdateError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for FeedSource {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UpdateError::InvalidSource(s.to_string());
        let (id, url) = s.split_once('=').ok_or_else(invalid)?;
        let (id, url) = (id.trim(), url.trim());

        let id_ok = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !id_ok || url.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(id, url))
    }
}

/// One parsed feed item that might be surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Stable id for deduplication. `None` when the feed gave nothing usable.
    pub item_id: Option<String>,
    pub title: String,
    pub summary: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub breaking: bool,
    pub thumbnail_url: Option<String>,
}

/// Result of fetching one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub bytes_received: u64,
    /// Set when `bytes_received` was not reported by the server.
    pub bytes_estimated: bool,
    /// Newest first.
    pub candidates: Vec<Candidate>,
}

impl FetchResponse {
    pub fn not_modified() -> Self {
        Self {
            status: StatusCode::NOT_MODIFIED.as_u16(),
            bytes_received: 0,
            bytes_estimated: false,
            candidates: Vec::new(),
        }
    }
}

/// Fetches and parses one feed.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `url`. `since` is the last successful fetch of this source, for
    /// conditional requests; a not-modified answer is an empty response, not
    /// an error.
    async fn fetch(
        &self,
        url: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchResponse, FetchError>;
}

/// RSS downloader over HTTP.
pub struct HttpDownloader {
    http: Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .user_agent(concat!("feedwake/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client");
        Self { http }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    #[tracing::instrument(skip(self))]
    async fn fetch(
        &self,
        url: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchResponse, FetchError> {
        let mut request = self.http.get(url);
        if let Some(since) = since {
            request = request.header(header::IF_MODIFIED_SINCE, http_date(since));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            debug!("feed not modified");
            return Ok(FetchResponse::not_modified());
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let reported_length = response.content_length();
        let body = response.bytes().await?;

        let channel =
            rss::Channel::read_from(body.as_ref()).map_err(|e| FetchError::Parse(e.to_string()))?;
        let candidates = parse_channel(&channel);

        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            candidates = candidates.len(),
            "fetched feed"
        );

        Ok(FetchResponse {
            status: status.as_u16(),
            bytes_received: reported_length.unwrap_or(body.len() as u64),
            bytes_estimated: reported_length.is_none(),
            candidates,
        })
    }
}

/// Parse an already-fetched channel into candidates, newest first.
///
/// Items without a publication date sort after dated ones, in feed order.
pub fn parse_channel(channel: &rss::Channel) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = channel
        .items()
        .iter()
        .map(|item| {
            let item_id = item
                .guid()
                .map(|g| g.value())
                .or_else(|| item.link())
                .map(sanitize_item_id)
                .filter(|id| !id.is_empty());

            let published = item
                .pub_date()
                .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                .map(|dt| dt.with_timezone(&Utc));

            let breaking = item
                .categories()
                .iter()
                .any(|c| c.name().trim().eq_ignore_ascii_case("breaking"));

            let thumbnail_url = item
                .enclosure()
                .filter(|e| e.mime_type().starts_with("image/"))
                .map(|e| e.url().to_string());

            Candidate {
                item_id,
                title: item.title().unwrap_or("(untitled)").to_string(),
                summary: item.description().map(String::from),
                link: item.link().map(String::from),
                published,
                breaking,
                thumbnail_url,
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.published.cmp(&a.published));
    candidates
}

/// Strip characters the ledger reserves.
pub fn sanitize_item_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <item>
      <title>Older</title>
      <link>https://example.com/1</link>
      <guid>guid-1</guid>
      <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Newer</title>
      <link>https://example.com/2</link>
      <guid>guid-2</guid>
      <category>Breaking</category>
      <enclosure url="https://example.com/2.jpg" length="1024" type="image/jpeg"/>
      <pubDate>Tue, 02 Jan 2024 12:00:00 +0000</pubDate>
      <description>Second description</description>
    </item>
    <item>
      <title>Undated</title>
      <link>https://example.com/3</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_channel_sorts_newest_first() {
        let channel = rss::Channel::read_from(FEED.as_bytes()).unwrap();
        let candidates = parse_channel(&channel);

        let titles: Vec<&str> = candidates.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Newer", "Older", "Undated"]);

        let newer = &candidates[0];
        assert_eq!(newer.item_id.as_deref(), Some("guid-2"));
        assert!(newer.breaking);
        assert_eq!(newer.thumbnail_url.as_deref(), Some("https://example.com/2.jpg"));
        assert_eq!(newer.summary.as_deref(), Some("Second description"));
        assert_eq!(
            newer.published,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap())
        );

        assert!(!candidates[1].breaking);
        assert_eq!(candidates[1].thumbnail_url, None);
        assert_eq!(
            candidates[2].item_id.as_deref(),
            Some("https://example.com/3")
        );
    }

    #[test]
    fn test_non_image_enclosure_is_not_a_thumbnail() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <item>
      <guid>pod-1</guid>
      <enclosure url="https://example.com/ep.mp3" length="1" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;
        let channel = rss::Channel::read_from(xml.as_bytes()).unwrap();
        assert_eq!(parse_channel(&channel)[0].thumbnail_url, None);
    }

    #[test]
    fn test_item_without_guid_or_link_has_no_id() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <item><title>Loose</title></item>
  </channel>
</rss>"#;
        let channel = rss::Channel::read_from(xml.as_bytes()).unwrap();
        let candidates = parse_channel(&channel);
        assert_eq!(candidates[0].item_id, None);
        assert_eq!(candidates[0].title, "Loose");
    }

    #[test]
    fn test_sanitize_item_id() {
        assert_eq!(sanitize_item_id("  abc\t123\n"), "abc123");
        assert_eq!(sanitize_item_id("\t\r\n"), "");
    }

    #[test]
    fn test_parse_sources() {
        let sources = FeedSource::parse_list("bbc=https://bbc.example/rss, ap = https://ap.example/feed").unwrap();
        assert_eq!(
            sources,
            vec![
                FeedSource::new("bbc", "https://bbc.example/rss"),
                FeedSource::new("ap", "https://ap.example/feed"),
            ]
        );

        assert!("no-url".parse::<FeedSource>().is_err());
        assert!("=https://x".parse::<FeedSource>().is_err());
        assert!("a.b=https://x".parse::<FeedSource>().is_err());
        assert!(FeedSource::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_http_date_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 8, 5, 9).unwrap();
        assert_eq!(http_date(at), "Sun, 10 Mar 2024 08:05:09 GMT");
    }

    #[tokio::test]
    async fn test_fetch_parses_feed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&mock_server)
            .await;

        let downloader = HttpDownloader::new();
        let response = downloader
            .fetch(&format!("{}/rss", mock_server.uri()), None)
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.bytes_received, FEED.len() as u64);
        assert_eq!(response.candidates.len(), 3);
        assert_eq!(response.candidates[0].item_id.as_deref(), Some("guid-2"));
    }

    #[tokio::test]
    async fn test_fetch_sends_if_modified_since_and_handles_304() {
        let mock_server = MockServer::start().await;
        let since = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();

        Mock::given(method("GET"))
            .and(path("/rss"))
            .and(header_eq("if-modified-since", "Sun, 10 Mar 2024 08:00:00 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;

        let downloader = HttpDownloader::new();
        let response = downloader
            .fetch(&format!("{}/rss", mock_server.uri()), Some(since))
            .await
            .unwrap();

        assert_eq!(response, FetchResponse::not_modified());
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let downloader = HttpDownloader::new();
        let err = downloader
            .fetch(&format!("{}/rss", mock_server.uri()), None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status(503)));
    }

    #[tokio::test]
    async fn test_fetch_unparsable_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&mock_server)
            .await;

        let downloader = HttpDownloader::new();
        let err = downloader
            .fetch(&format!("{}/rss", mock_server.uri()), None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Parse(_)));
    }
}
