//! The fetch unit: one polite, time-bounded, size-capped GET plus extraction.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::{Client, Response};
use tracing::{debug, info, warn};
use url::Url;

use articlepipe_shared::{
    ArticlePipeError, FetchConfig, FetchOutcome, FetchTarget, Result, STATUS_OK, truncate_chars,
};

use crate::extract::{ContentExtractor, SelectorExtractor};

/// Outcome title cap, applied after extraction.
pub const OUTCOME_TITLE_CHARS: usize = 200;

/// Outcome content cap, applied after extraction.
pub const OUTCOME_CONTENT_CHARS: usize = 10_000;

/// Maximum redirect hops followed before the request fails.
const MAX_REDIRECTS: usize = 5;

/// Performs exactly one retrieval per call and never returns an error.
///
/// - `None`: no response at all (timeout, connection/DNS failure, bad URL,
///   transport error while reading the body)
/// - `Some(outcome)` with `status != 200`: the server answered with an error
/// - `Some(outcome)` with `status == 200`: extracted, bounded content
pub trait FetchUnit: Send + Sync + 'static {
    fn fetch(&self, target: &FetchTarget) -> impl Future<Output = Option<FetchOutcome>> + Send;
}

/// HTTP implementation of [`FetchUnit`] backed by a shared `reqwest` client.
///
/// Redirects are followed up to five hops; the final response's status is
/// the one reported.
pub struct HttpFetcher {
    client: Client,
    polite_delay: Duration,
    max_body_bytes: usize,
    extractor: Box<dyn ContentExtractor>,
}

impl HttpFetcher {
    /// Build a fetcher (and its HTTP client) from validated configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(config.timeout)
            .build()
            .map_err(|e| ArticlePipeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            polite_delay: config.polite_delay,
            max_body_bytes: config.max_body_bytes,
            extractor: Box::new(SelectorExtractor),
        })
    }

    /// Replace the default [`SelectorExtractor`].
    pub fn with_extractor(mut self, extractor: impl ContentExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }
}

impl FetchUnit for HttpFetcher {
    async fn fetch(&self, target: &FetchTarget) -> Option<FetchOutcome> {
        if !self.polite_delay.is_zero() {
            tokio::time::sleep(self.polite_delay).await;
        }

        let url = match Url::parse(target.as_str()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                warn!(%target, scheme = url.scheme(), "unsupported scheme");
                return None;
            }
            Err(e) => {
                warn!(%target, error = %e, "invalid url");
                return None;
            }
        };

        debug!(%target, "fetching");
        let started = Instant::now();

        let mut response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(%target, "timed out");
                return None;
            }
            Err(e) => {
                warn!(%target, error = %e, "request failed");
                return None;
            }
        };

        let status = response.status().as_u16();
        if status != STATUS_OK {
            warn!(%target, status, "non-200 response");
            return Some(FetchOutcome::http_error(target.as_str(), status));
        }

        let body = match read_capped(&mut response, self.max_body_bytes).await {
            Ok(body) => body,
            Err(e) => {
                warn!(%target, error = %e, "body read failed");
                return None;
            }
        };
        if body.truncated {
            warn!(%target, limit = self.max_body_bytes, "response body too large, truncated");
        }

        let html = String::from_utf8_lossy(&body.bytes);
        let extracted = self.extractor.extract(&html);

        let outcome = FetchOutcome {
            url: target.as_str().to_string(),
            title: truncate_chars(&extracted.title, OUTCOME_TITLE_CHARS),
            content: truncate_chars(&extracted.content, OUTCOME_CONTENT_CHARS),
            status,
            fetched_at: Utc::now(),
        };

        info!(
            %target,
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = body.bytes.len(),
            extractor = self.extractor.name(),
            title = %truncate_chars(&outcome.title, 50),
            "fetched"
        );
        Some(outcome)
    }
}

/// A response body read up to a byte cap.
struct CappedBody {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Read at most `cap` bytes, then stop pulling from the connection.
async fn read_capped(response: &mut Response, cap: usize) -> reqwest::Result<CappedBody> {
    let hint = response
        .content_length()
        .map_or(0, |len| usize::try_from(len).unwrap_or(cap).min(cap));
    let mut bytes = Vec::with_capacity(hint);

    while let Some(chunk) = response.chunk().await? {
        let remaining = cap - bytes.len();
        if chunk.len() > remaining {
            bytes.extend_from_slice(&chunk[..remaining]);
            return Ok(CappedBody {
                bytes,
                truncated: true,
            });
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(CappedBody {
        bytes,
        truncated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extracted;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick_config() -> FetchConfig {
        FetchConfig {
            concurrency: 2,
            polite_delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
            max_body_bytes: 1_000_000,
            user_agent: articlepipe_shared::DEFAULT_USER_AGENT.into(),
        }
    }

    async fn serve(server: &MockServer, route: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(template)
            .mount(server)
            .await;
    }

    /// Records the exact input it was handed.
    struct Recording(Arc<Mutex<Vec<String>>>);

    impl ContentExtractor for Recording {
        fn extract(&self, html: &str) -> Extracted {
            self.0.lock().unwrap().push(html.to_string());
            Extracted {
                title: "t".repeat(500),
                content: "c".repeat(20_000),
            }
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn ok_response_is_extracted() {
        let server = MockServer::start().await;
        let page = r#"<html><head><title>Tab</title></head><body>
            <article><h1 class="post-title">Hello</h1><p>World body.</p></article>
        </body></html>"#;
        serve(&server, "/post", ResponseTemplate::new(200).set_body_string(page)).await;

        let fetcher = HttpFetcher::new(&quick_config()).unwrap();
        let target = FetchTarget::from(format!("{}/post", server.uri()));
        let outcome = fetcher.fetch(&target).await.expect("got a response");

        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.url, target.as_str());
        assert_eq!(outcome.title, "Hello");
        assert!(outcome.content.contains("World body."));
    }

    #[tokio::test]
    async fn non_200_yields_empty_outcome() {
        let server = MockServer::start().await;
        serve(&server, "/gone", ResponseTemplate::new(404).set_body_string("<h1>Not found</h1>")).await;

        let fetcher = HttpFetcher::new(&quick_config()).unwrap();
        let outcome = fetcher
            .fetch(&FetchTarget::from(format!("{}/gone", server.uri())))
            .await
            .expect("404 is still a response");

        assert_eq!(outcome.status, 404);
        assert!(outcome.title.is_empty());
        assert!(outcome.content.is_empty());
    }

    #[tokio::test]
    async fn timeout_yields_no_outcome() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/slow",
            ResponseTemplate::new(200)
                .set_body_string("<p>late</p>")
                .set_delay(Duration::from_secs(2)),
        )
        .await;

        let config = FetchConfig {
            timeout: Duration::from_millis(200),
            ..quick_config()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let outcome = fetcher
            .fetch(&FetchTarget::from(format!("{}/slow", server.uri())))
            .await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn connection_refused_and_bad_urls_yield_no_outcome() {
        let fetcher = HttpFetcher::new(&quick_config()).unwrap();

        // Port 9 (discard) on loopback is essentially never listening.
        assert!(fetcher.fetch(&FetchTarget::from("http://127.0.0.1:9/")).await.is_none());
        assert!(fetcher.fetch(&FetchTarget::from("not a url")).await.is_none());
        assert!(fetcher.fetch(&FetchTarget::from("ftp://example.com/file")).await.is_none());
    }

    #[tokio::test]
    async fn body_is_capped_before_extraction() {
        let server = MockServer::start().await;
        let body = "x".repeat(10_000);
        serve(&server, "/big", ResponseTemplate::new(200).set_body_string(body)).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let config = FetchConfig {
            max_body_bytes: 1_024,
            ..quick_config()
        };
        let fetcher = HttpFetcher::new(&config)
            .unwrap()
            .with_extractor(Recording(Arc::clone(&seen)));

        let outcome = fetcher
            .fetch(&FetchTarget::from(format!("{}/big", server.uri())))
            .await
            .expect("truncation is not a failure");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 1_024);

        // Extracted text is bounded too.
        assert_eq!(outcome.title.chars().count(), OUTCOME_TITLE_CHARS);
        assert_eq!(outcome.content.chars().count(), OUTCOME_CONTENT_CHARS);
    }

    #[tokio::test]
    async fn polite_delay_applies_before_first_fetch() {
        let server = MockServer::start().await;
        serve(&server, "/", ResponseTemplate::new(200).set_body_string("<p>hi</p>")).await;

        let config = FetchConfig {
            polite_delay: Duration::from_millis(150),
            ..quick_config()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();

        let started = Instant::now();
        let outcome = fetcher.fetch(&FetchTarget::from(server.uri())).await;
        assert!(outcome.is_some());
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn sends_configured_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock::matchers::header("user-agent", "articlepipe-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>ok</p>"))
            .mount(&server)
            .await;

        let config = FetchConfig {
            user_agent: "articlepipe-test/1.0".into(),
            ..quick_config()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let outcome = fetcher.fetch(&FetchTarget::from(server.uri())).await.unwrap();
        assert_eq!(outcome.status, 200);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = FetchConfig {
            concurrency: 0,
            ..quick_config()
        };
        assert!(HttpFetcher::new(&config).is_err());
    }
}
