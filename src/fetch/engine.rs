use crate::caching::CacheLayer;
use crate::config::source_registry::{SourceConfig, SourceRegistry};
use crate::fetch::backoff::backoff_delay;
use crate::fetch::error::FetchError;
use crate::fetch::rate_limit::RateLimiterRegistry;
use crate::orchestrator::cancellation::CancellationToken;
use log::{debug, warn};
use reqwest::blocking::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = concat!("nephrogene/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP service used by every driver: rate limiting, retry with
/// exponential backoff, and cache short-circuit per source namespace.
pub struct FetchEngine {
    client: Client,
    cache: Arc<CacheLayer>,
    limiters: RateLimiterRegistry,
}

impl FetchEngine {
    pub fn new(registry: &SourceRegistry, cache: Arc<CacheLayer>) -> Self {
        let mut limiters = RateLimiterRegistry::new();
        for source in registry.iter() {
            limiters.register(&source.name, source.rate_limit_per_sec);
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Building HTTP client failed");
        FetchEngine {
            client,
            cache,
            limiters,
        }
    }

    /// Rate-limited, retried, cached GET. `is_valid` guards the cache
    /// write-back; invalid bodies are surfaced and never cached.
    pub fn get(
        &self,
        source: &SourceConfig,
        url: &str,
        cache_key: Option<&str>,
        token: &CancellationToken,
        is_valid: impl Fn(&str) -> bool,
    ) -> Result<String, FetchError> {
        self.request(source, url, None, cache_key, token, is_valid)
    }

    pub fn post(
        &self,
        source: &SourceConfig,
        url: &str,
        body: Value,
        cache_key: Option<&str>,
        token: &CancellationToken,
        is_valid: impl Fn(&str) -> bool,
    ) -> Result<String, FetchError> {
        self.request(source, url, Some(body), cache_key, token, is_valid)
    }

    fn request(
        &self,
        source: &SourceConfig,
        url: &str,
        body: Option<Value>,
        cache_key: Option<&str>,
        token: &CancellationToken,
        is_valid: impl Fn(&str) -> bool,
    ) -> Result<String, FetchError> {
        if let Some(key) = cache_key
            && let Some(Value::String(cached)) = self.cache.get(&source.name, key)
        {
            debug!("Cache hit for {}:{key}", source.name);
            return Ok(cached);
        }

        let mut last_error: Option<FetchError> = None;
        for attempt in 0..=source.max_retries {
            if token.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if attempt > 0 {
                let delay = match &last_error {
                    // A Retry-After from the upstream is honored exactly.
                    Some(FetchError::RateLimited { retry_after_secs }) => {
                        Duration::from_secs(*retry_after_secs)
                    }
                    _ => backoff_delay(attempt - 1),
                };
                debug!(
                    "Retrying {} (attempt {attempt}/{}) after {delay:?}",
                    url, source.max_retries
                );
                if !token.sleep(delay) {
                    return Err(FetchError::Cancelled);
                }
            }

            self.limiters.acquire(&source.name, token)?;

            match self.send_once(url, body.as_ref()) {
                Ok(text) => {
                    if !is_valid(&text) {
                        return Err(FetchError::InvalidPayload(format!(
                            "{} returned an empty or malformed body for {url}",
                            source.name
                        )));
                    }
                    if let Some(key) = cache_key
                        && let Err(err) = self.cache.set(
                            &source.name,
                            key,
                            Value::String(text.clone()),
                            source.cache_ttl(),
                        )
                    {
                        warn!("Cache write failed for {}:{key}: {err}", source.name);
                    }
                    return Ok(text);
                }
                Err(err) if err.is_retryable() => {
                    warn!("Fetch attempt {attempt} for {url} failed: {err}");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(FetchError::Exhausted {
            attempts: source.max_retries + 1,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    fn send_once(&self, url: &str, body: Option<&Value>) -> Result<String, FetchError> {
        let request = match body {
            Some(json) => self.client.post(url).json(json),
            None => self.client.get(url),
        };
        let response = request.header("Accept", "application/json").send()?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(FetchError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::source_registry::SourceCategory;
    use mockito::Server;
    use redb::Database;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temporary directory")
    }

    fn test_source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            display_name: name.to_string(),
            category: SourceCategory::ExternalApi,
            rate_limit_per_sec: 50,
            max_retries: 2,
            cache_ttl_hours: 1,
            bulk_url: None,
            api_key_env: None,
            capabilities: vec![],
            scoring_track: None,
            retired: false,
        }
    }

    fn engine_for(temp_dir: &TempDir, source: &SourceConfig) -> FetchEngine {
        let db = Database::create(temp_dir.path().join("cache.redb")).unwrap();
        let cache = Arc::new(CacheLayer::new(Arc::new(db), 64).unwrap());
        let registry = SourceRegistry::from_configs(vec![source.clone()]);
        FetchEngine::new(&registry, cache)
    }

    #[rstest]
    fn test_get_success_and_cache_short_circuit(temp_dir: TempDir) {
        let mut server = Server::new();
        let source = test_source("panelapp");
        let engine = engine_for(&temp_dir, &source);

        let mock = server
            .mock("GET", "/genes/PKD1")
            .with_status(200)
            .with_body(r#"{"count": 3}"#)
            .expect(1)
            .create();

        let url = format!("{}/genes/PKD1", server.url());
        let token = CancellationToken::new();

        let first = engine
            .get(&source, &url, Some("PKD1"), &token, |_| true)
            .unwrap();
        // Second call must come from the cache without touching the server.
        let second = engine
            .get(&source, &url, Some("PKD1"), &token, |_| true)
            .unwrap();

        mock.assert();
        assert_eq!(first, r#"{"count": 3}"#);
        assert_eq!(first, second);
    }

    #[rstest]
    fn test_5xx_is_retried_until_success(temp_dir: TempDir) {
        let mut server = Server::new();
        let source = test_source("hpo");
        let engine = engine_for(&temp_dir, &source);

        server.mock("GET", "/term").with_status(503).create();

        let url = format!("{}/term", server.url());
        let token = CancellationToken::new();
        let worker = std::thread::spawn(move || engine.get(&source, &url, None, &token, |_| true));

        // Let the first attempt fail, then swap in a healthy upstream
        // before the backoff elapses.
        std::thread::sleep(Duration::from_millis(300));
        server.reset();
        server
            .mock("GET", "/term")
            .with_status(200)
            .with_body("ok")
            .create();

        assert_eq!(worker.join().unwrap().unwrap(), "ok");
    }

    #[rstest]
    fn test_404_is_not_retried(temp_dir: TempDir) {
        let mut server = Server::new();
        let source = test_source("uniprot");
        let engine = engine_for(&temp_dir, &source);

        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create();

        let url = format!("{}/missing", server.url());
        let token = CancellationToken::new();
        let result = engine.get(&source, &url, None, &token, |_| true);

        mock.assert();
        assert!(matches!(
            result,
            Err(FetchError::Status { status: 404, .. })
        ));
    }

    #[rstest]
    fn test_exhausted_after_max_retries(temp_dir: TempDir) {
        let mut server = Server::new();
        let source = test_source("gencc");
        let engine = engine_for(&temp_dir, &source);

        let mock = server
            .mock("GET", "/download")
            .with_status(500)
            .expect(3)
            .create();

        let url = format!("{}/download", server.url());
        let token = CancellationToken::new();
        let result = engine.get(&source, &url, None, &token, |_| true);

        mock.assert();
        assert!(matches!(
            result,
            Err(FetchError::Exhausted { attempts: 3, .. })
        ));
    }

    #[rstest]
    fn test_retry_after_is_honored(temp_dir: TempDir) {
        let mut server = Server::new();
        let source = test_source("pubtator");
        let engine = engine_for(&temp_dir, &source);

        server
            .mock("GET", "/search")
            .with_status(429)
            .with_header("Retry-After", "1")
            .create();

        let url = format!("{}/search", server.url());
        let token = CancellationToken::new();
        let start = std::time::Instant::now();
        let worker = std::thread::spawn(move || engine.get(&source, &url, None, &token, |_| true));

        std::thread::sleep(Duration::from_millis(400));
        server.reset();
        server
            .mock("GET", "/search")
            .with_status(200)
            .with_body("ok")
            .create();

        assert_eq!(worker.join().unwrap().unwrap(), "ok");
        // The retry waited out the upstream's Retry-After.
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[rstest]
    fn test_invalid_payload_not_cached(temp_dir: TempDir) {
        let mut server = Server::new();
        let source = test_source("clinvar");
        let engine = engine_for(&temp_dir, &source);

        let mock = server
            .mock("GET", "/esummary")
            .with_status(200)
            .with_body("")
            .expect(2)
            .create();

        let url = format!("{}/esummary", server.url());
        let token = CancellationToken::new();
        let not_empty = |body: &str| !body.is_empty();

        assert!(matches!(
            engine.get(&source, &url, Some("k"), &token, not_empty),
            Err(FetchError::InvalidPayload(_))
        ));
        // A second call goes back to the network: nothing was cached.
        assert!(engine.get(&source, &url, Some("k"), &token, not_empty).is_err());
        mock.assert();
    }
}
