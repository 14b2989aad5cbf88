//! archive.org API client.
//!
//! SpaceCraft only reads from archive.org: advanced search to list the items of
//! a collection, the metadata API for each item, and the image service for
//! cover thumbnails. All requests are unauthenticated and sequential, with a
//! minimum delay between them.

mod metadata;

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::Client;
use spacecraft_shared::{ArchiveConfig, Result, SpaceCraftError};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use url::Url;

pub use metadata::{ArchiveFile, ArchiveMetadata};
use metadata::SearchResponse;

/// Maximum number of redirects to follow (the image service redirects to a data node).
const MAX_REDIRECTS: usize = 5;

/// User-Agent string for archive.org requests.
const USER_AGENT: &str = concat!("SpaceCraft/", env!("CARGO_PKG_VERSION"));

/// Legal archive.org identifier characters.
static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("identifier regex"));

/// Validate an archive.org identifier before it is placed in a URL or path.
pub fn validate_identifier(id: &str) -> Result<()> {
    if id.len() <= 100 && IDENTIFIER_RE.is_match(id) {
        Ok(())
    } else {
        Err(SpaceCraftError::validation(format!(
            "invalid archive.org identifier '{id}'"
        )))
    }
}

// ---------------------------------------------------------------------------
// ArchiveClient
// ---------------------------------------------------------------------------

/// Rate-limited HTTP client for the archive.org read APIs.
pub struct ArchiveClient {
    client: Client,
    base_url: Url,
    rate_limit: Duration,
    max_cover_bytes: u64,
    last_request: Mutex<Option<Instant>>,
}

impl ArchiveClient {
    /// Create a new client from the `[archive]` config section.
    pub fn new(config: &ArchiveConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            SpaceCraftError::config(format!("invalid archive base URL '{}': {e}", config.base_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SpaceCraftError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            rate_limit: Duration::from_millis(config.rate_limit_ms),
            max_cover_bytes: config.max_cover_bytes,
            last_request: Mutex::new(None),
        })
    }

    /// List item identifiers matching an advanced-search query.
    ///
    /// Identifiers come back in the order archive.org returns them, with
    /// duplicates removed.
    #[instrument(skip(self))]
    pub async fn search_identifiers(
        &self,
        query: &str,
        sort: Option<&str>,
        limit: u32,
    ) -> Result<Vec<String>> {
        if query.trim().is_empty() {
            return Err(SpaceCraftError::validation("search query is empty"));
        }

        let mut url = self.endpoint("advancedsearch.php")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", query)
                .append_pair("fl[]", "identifier")
                .append_pair("rows", &limit.to_string())
                .append_pair("page", "1")
                .append_pair("output", "json");
            if let Some(sort) = sort {
                pairs.append_pair("sort[]", sort);
            }
        }

        let body = self.get_text(&url).await?;
        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| SpaceCraftError::parse(format!("{url}: invalid search response: {e}")))?;

        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(parsed.response.docs.len());
        for doc in parsed.response.docs {
            if validate_identifier(&doc.identifier).is_err() {
                debug!(identifier = %doc.identifier, "skipping malformed identifier");
                continue;
            }
            if seen.insert(doc.identifier.clone()) {
                ids.push(doc.identifier);
            }
        }

        info!(
            found = parsed.response.num_found,
            returned = ids.len(),
            "search complete"
        );

        Ok(ids)
    }

    /// Fetch the full metadata document of one item.
    #[instrument(skip(self))]
    pub async fn fetch_metadata(&self, id: &str) -> Result<ArchiveMetadata> {
        validate_identifier(id)?;
        let url = self.endpoint(&format!("metadata/{id}"))?;

        let body = self.get_text(&url).await?;
        let meta: ArchiveMetadata = serde_json::from_str(&body)
            .map_err(|e| SpaceCraftError::parse(format!("{url}: invalid metadata: {e}")))?;

        // Unknown identifiers come back as `{}` with a 200.
        if meta.metadata.is_empty() {
            return Err(SpaceCraftError::not_found(format!("archive.org item '{id}'")));
        }
        if meta.is_dark {
            return Err(SpaceCraftError::not_found(format!(
                "archive.org item '{id}' (dark)"
            )));
        }

        debug!(files = meta.files.len(), "metadata fetched");
        Ok(meta)
    }

    /// Download the cover thumbnail of one item.
    #[instrument(skip(self))]
    pub async fn fetch_cover(&self, id: &str) -> Result<Vec<u8>> {
        validate_identifier(id)?;
        let url = self.endpoint(&format!("services/img/{id}"))?;

        let mut response = self.send(&url).await?;

        if let Some(len) = response.content_length() {
            if len > self.max_cover_bytes {
                return Err(self.cover_too_large(&url, len));
            }
        }

        // Chunked bodies carry no length up front; stop reading past the cap.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SpaceCraftError::Network(format!("{url}: failed to read body: {e}")))?
        {
            let len = (bytes.len() + chunk.len()) as u64;
            if len > self.max_cover_bytes {
                return Err(self.cover_too_large(&url, len));
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(SpaceCraftError::Network(format!("{url}: empty cover body")));
        }

        debug!(bytes = bytes.len(), "cover fetched");
        Ok(bytes)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SpaceCraftError::validation(format!("bad endpoint '{path}': {e}")))
    }

    fn cover_too_large(&self, url: &Url, len: u64) -> SpaceCraftError {
        SpaceCraftError::validation(format!(
            "{url}: cover too large ({len}+ bytes, max {})",
            self.max_cover_bytes
        ))
    }

    /// Sleep until `rate_limit` has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.rate_limit {
                tokio::time::sleep(self.rate_limit - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn send(&self, url: &Url) -> Result<reqwest::Response> {
        self.throttle().await;
        debug!(%url, "GET");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| SpaceCraftError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SpaceCraftError::not_found(url.to_string()));
        }
        if !status.is_success() {
            return Err(SpaceCraftError::Network(format!("{url}: HTTP {status}")));
        }

        Ok(response)
    }

    async fn get_text(&self, url: &Url) -> Result<String> {
        self.send(url)
            .await?
            .text()
            .await
            .map_err(|e| SpaceCraftError::Network(format!("{url}: failed to read body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ArchiveClient {
        let config = ArchiveConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            rate_limit_ms: 0,
            max_cover_bytes: 1024,
        };
        ArchiveClient::new(&config).unwrap()
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("frankenstein00shel").is_ok());
        assert!(validate_identifier("pulp_amazing-1926.04").is_ok());
        assert!(validate_identifier("../etc").is_err());
        assert!(validate_identifier("has space").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(".hidden").is_err());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let config = ArchiveConfig {
            base_url: "https://mirror.example.com/ia".into(),
            ..ArchiveConfig::default()
        };
        let client = ArchiveClient::new(&config).unwrap();
        let url = client.endpoint("metadata/x").unwrap();
        assert_eq!(url.as_str(), "https://mirror.example.com/ia/metadata/x");
    }

    #[tokio::test]
    async fn test_search_identifiers() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/advancedsearch.php"))
            .and(query_param("q", "collection:pulpmagazinearchive"))
            .and(query_param("rows", "3"))
            .and(query_param("sort[]", "downloads desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "responseHeader": { "status": 0 },
                "response": {
                    "numFound": 412,
                    "start": 0,
                    "docs": [
                        { "identifier": "amazing_1926_04" },
                        { "identifier": "weird_tales_1923" },
                        { "identifier": "amazing_1926_04" },
                        { "identifier": "bad id" }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let ids = client
            .search_identifiers("collection:pulpmagazinearchive", Some("downloads desc"), 3)
            .await
            .unwrap();

        assert_eq!(ids, vec!["amazing_1926_04", "weird_tales_1923"]);
    }

    #[tokio::test]
    async fn test_search_rejects_empty_query() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let err = client.search_identifiers("  ", None, 10).await.unwrap_err();
        assert!(err.to_string().contains("query is empty"));
    }

    #[tokio::test]
    async fn test_fetch_metadata() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata/frankenstein1818"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "metadata": {
                    "identifier": "frankenstein1818",
                    "title": "Frankenstein",
                    "creator": "Mary Shelley"
                },
                "files": [{ "name": "frankenstein.pdf", "size": "100" }],
                "item_size": 100
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let meta = client.fetch_metadata("frankenstein1818").await.unwrap();
        assert_eq!(meta.first("title"), Some("Frankenstein"));
        assert_eq!(meta.files.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_metadata_unknown_item() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata/nothing_here"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.fetch_metadata("nothing_here").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fetch_metadata_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.fetch_metadata("flaky").await.unwrap_err();
        assert!(matches!(err, SpaceCraftError::Network(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_cover() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/services/img/frankenstein1818"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0]))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let bytes = client.fetch_cover("frankenstein1818").await.unwrap();
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF, 0xE0]);
    }

    #[tokio::test]
    async fn test_fetch_cover_too_large() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/services/img/huge"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.fetch_cover("huge").await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_fetch_cover_chunked_body_is_capped() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // A chunked response has no Content-Length, so only the streaming cap applies.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await.unwrap();

            let mut response =
                b"HTTP/1.1 200 OK\r\ncontent-type: image/jpeg\r\ntransfer-encoding: chunked\r\n\r\n"
                    .to_vec();
            for _ in 0..8 {
                response.extend_from_slice(b"200\r\n");
                response.extend_from_slice(&[0xAB; 0x200]);
                response.extend_from_slice(b"\r\n");
            }
            response.extend_from_slice(b"0\r\n\r\n");
            let _ = socket.write_all(&response).await;
        });

        let config = ArchiveConfig {
            base_url: format!("http://{addr}"),
            timeout_secs: 5,
            rate_limit_ms: 0,
            max_cover_bytes: 1024,
        };
        let client = ArchiveClient::new(&config).unwrap();
        let err = client.fetch_cover("streamed").await.unwrap_err();
        assert!(matches!(err, SpaceCraftError::Validation { .. }));
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_requests_are_spaced_by_rate_limit() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata/frankenstein1818"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "metadata": { "identifier": "frankenstein1818", "title": "Frankenstein" }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let config = ArchiveConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            rate_limit_ms: 200,
            max_cover_bytes: 1024,
        };
        let client = ArchiveClient::new(&config).unwrap();

        let start = Instant::now();
        client.fetch_metadata("frankenstein1818").await.unwrap();
        client.fetch_metadata("frankenstein1818").await.unwrap();
        assert!(
            start.elapsed() >= Duration::from_millis(200),
            "second request sent after {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_fetch_cover_missing() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/services/img/nocover"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.fetch_cover("nocover").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_identifier_never_requested() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let err = client.fetch_metadata("../secrets").await.unwrap_err();
        assert!(matches!(err, SpaceCraftError::Validation { .. }));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
