//! Retrieving image bytes for an `ImageSource`

use crate::config::FetchSettings;
use crate::error::PredictError;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{StatusCode, Url};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// A validated locator of an image: an absolute `http(s)` URL or a base 64
/// `data:` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource(Url);

impl ImageSource {
    pub fn parse(url: &str) -> Result<Self, PredictError> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| PredictError::Fetch(format!("invalid URL {url:?}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {
                if parsed.host_str().map_or(true, str::is_empty) {
                    return Err(PredictError::Fetch(format!("URL {url:?} has no host")));
                }
                Ok(ImageSource(parsed))
            }
            "data" => Ok(ImageSource(parsed)),
            scheme => Err(PredictError::Fetch(format!(
                "unsupported URL scheme {scheme:?}, expected http, https or data"
            ))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn is_data(&self) -> bool {
        self.0.scheme() == "data"
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_data() {
            // Don't dump the whole payload into logs
            write!(f, "data:<{} bytes>", self.0.as_str().len())
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Something that can turn an `ImageSource` into raw bytes
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &ImageSource, timeout: Duration) -> Result<Vec<u8>, PredictError>;
}

/// Decode the payload of a base 64 `data:` URL
pub fn decode_data_url(source: &ImageSource) -> Result<Vec<u8>, PredictError> {
    // url keeps everything after "data:" as the path
    let rest = source.url().path();
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| PredictError::Fetch("data URL has no payload".into()))?;
    if !meta.ends_with(";base64") {
        return Err(PredictError::Fetch(
            "only base64 encoded data URLs are supported".into(),
        ));
    }
    general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| PredictError::Fetch(format!("invalid base64 in data URL: {e}")))
}

/// Fetches images over HTTP(S) with a shared connection pool
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retries: u32,
    retry_backoff: Duration,
    max_bytes: usize,
}

/// A single failed attempt, and whether another attempt could succeed
struct Attempt {
    err: PredictError,
    transient: bool,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.timeout())
            .build()?;
        Ok(HttpFetcher {
            client,
            retries: settings.retries,
            retry_backoff: settings.retry_backoff(),
            max_bytes: settings.max_bytes,
        })
    }

    async fn attempt(&self, url: &Url, timeout: Duration) -> Result<Vec<u8>, Attempt> {
        let mut response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Attempt {
                transient: e.is_timeout() || e.is_connect(),
                err: PredictError::Fetch(describe(&e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Attempt {
                transient: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
                err: PredictError::Fetch(format!("{url} responded with status {status}")),
            });
        }

        let mut bytes = Vec::new();
        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(self.too_large());
            }
            bytes.reserve(len as usize);
        }

        // A chunked response has no length up front, so count as we go
        while let Some(chunk) = response.chunk().await.map_err(|e| Attempt {
            transient: e.is_timeout(),
            err: PredictError::Fetch(describe(&e)),
        })? {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    fn too_large(&self) -> Attempt {
        Attempt {
            transient: false,
            err: PredictError::Fetch(format!(
                "image is larger than the {} byte limit",
                self.max_bytes
            )),
        }
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out fetching image".into()
    } else if e.is_connect() {
        format!("could not connect: {e}")
    } else {
        e.to_string()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[tracing::instrument(skip(self, source), fields(source = %source))]
    async fn fetch(&self, source: &ImageSource, timeout: Duration) -> Result<Vec<u8>, PredictError> {
        if source.is_data() {
            return decode_data_url(source);
        }

        let mut attempt = 0;
        loop {
            match self.attempt(source.url(), timeout).await {
                Ok(bytes) => {
                    debug!("fetched {} bytes", bytes.len());
                    return Ok(bytes);
                }
                Err(Attempt { err, transient }) if transient && attempt < self.retries => {
                    attempt += 1;
                    warn!("fetch attempt {attempt} failed, retrying: {err}");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(Attempt { err, .. }) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn settings() -> FetchSettings {
        FetchSettings {
            timeout_ms: 2_000,
            retries: 0,
            retry_backoff_ms: 10,
            max_bytes: 1024 * 1024,
            user_agent: "wildfire-test".into(),
        }
    }

    #[test]
    fn test_parse_sources() {
        assert!(ImageSource::parse("https://example.com/fire.jpg").is_ok());
        assert!(ImageSource::parse("data:image/png;base64,AAAA").unwrap().is_data());
        assert_eq!(
            ImageSource::parse("not-a-url").unwrap_err().kind(),
            "fetch_error"
        );
        assert_eq!(
            ImageSource::parse("ftp://example.com/fire.jpg").unwrap_err().kind(),
            "fetch_error"
        );
    }

    #[test]
    fn test_data_url() {
        let png = test::png_bytes(test::FIRE_RGB);
        let source = ImageSource::parse(&test::data_url(&png)).unwrap();
        assert_eq!(decode_data_url(&source).unwrap(), png);

        let plain = ImageSource::parse("data:text/plain,hello").unwrap();
        assert!(decode_data_url(&plain).is_err());
    }

    #[actix_web::test]
    async fn test_fetch_ok() {
        let base = test::serve(Arc::default());
        let fetcher = HttpFetcher::new(&settings()).unwrap();
        let source = ImageSource::parse(&format!("{base}/fire.png")).unwrap();
        let bytes = fetcher.fetch(&source, Duration::from_secs(2)).await.unwrap();
        assert_eq!(bytes, test::png_bytes(test::FIRE_RGB));
    }

    #[actix_web::test]
    async fn test_fetch_non_2xx() {
        let base = test::serve(Arc::default());
        let fetcher = HttpFetcher::new(&settings()).unwrap();
        let source = ImageSource::parse(&format!("{base}/missing.png")).unwrap();
        let err = fetcher.fetch(&source, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.kind(), "fetch_error");
        assert!(err.to_string().contains("404"));
    }

    #[actix_web::test]
    async fn test_fetch_too_large() {
        let base = test::serve(Arc::default());
        let mut s = settings();
        s.max_bytes = 16;
        let fetcher = HttpFetcher::new(&s).unwrap();
        let source = ImageSource::parse(&format!("{base}/fire.png")).unwrap();
        let err = fetcher.fetch(&source, Duration::from_secs(2)).await.unwrap_err();
        assert!(err.to_string().contains("byte limit"));
    }

    #[actix_web::test]
    async fn test_fetch_too_large_chunked() {
        let base = test::serve(Arc::default());
        let mut s = settings();
        s.max_bytes = 16;
        let fetcher = HttpFetcher::new(&s).unwrap();
        let source = ImageSource::parse(&format!("{base}/stream.png")).unwrap();
        let err = fetcher.fetch(&source, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.kind(), "fetch_error");
        assert!(err.to_string().contains("byte limit"));
    }

    #[actix_web::test]
    async fn test_fetch_chunked_within_limit() {
        let base = test::serve(Arc::default());
        let fetcher = HttpFetcher::new(&settings()).unwrap();
        let source = ImageSource::parse(&format!("{base}/stream.png")).unwrap();
        let bytes = fetcher.fetch(&source, Duration::from_secs(2)).await.unwrap();
        assert_eq!(bytes.len(), test::STREAM_CHUNKS * test::STREAM_CHUNK_SIZE);
    }

    #[actix_web::test]
    async fn test_fetch_timeout() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = test::serve(hits.clone());
        let fetcher = HttpFetcher::new(&settings()).unwrap();
        let source = ImageSource::parse(&format!("{base}/slow.png")).unwrap();
        let err = fetcher
            .fetch(&source, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "fetch_error");
        assert!(err.to_string().contains("timed out fetching image"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_timeout_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = test::serve(hits.clone());
        let mut s = settings();
        s.retries = 2;
        let fetcher = HttpFetcher::new(&s).unwrap();
        let source = ImageSource::parse(&format!("{base}/slow.png")).unwrap();
        let err = fetcher
            .fetch(&source, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out fetching image"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[actix_web::test]
    async fn test_retries_transient_status() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = test::serve(hits.clone());
        let source = ImageSource::parse(&format!("{base}/flaky.png")).unwrap();

        let fetcher = HttpFetcher::new(&settings()).unwrap();
        assert!(fetcher.fetch(&source, Duration::from_secs(2)).await.is_err());

        hits.store(0, Ordering::SeqCst);
        let mut s = settings();
        s.retries = 2;
        let fetcher = HttpFetcher::new(&s).unwrap();
        assert!(fetcher.fetch(&source, Duration::from_secs(2)).await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[actix_web::test]
    async fn test_connection_refused() {
        // Bind then drop a listener to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let fetcher = HttpFetcher::new(&settings()).unwrap();
        let source = ImageSource::parse(&format!("http://127.0.0.1:{port}/x.png")).unwrap();
        let err = fetcher.fetch(&source, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.kind(), "fetch_error");
    }
}
