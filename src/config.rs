use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::data_models::SearchDepth;
use crate::error::{Result, SearchError};

pub const DEFAULT_ENGINES: &str = "google,bing,duckduckgo,wikipedia";
pub const DEFAULT_LOCAL_REDIS_URL: &str = "redis://localhost:6379";

/// Process configuration, built once at startup and handed to the components
/// that need it.
#[derive(Debug, Clone)]
pub struct Config {
    pub searxng: SearxngConfig,
    pub crawl: CrawlConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct SearxngConfig {
    pub api_url: String,
    pub max_results_ceiling: usize,
    pub default_depth: SearchDepth,
    pub engines: String,
    /// `None` leaves `time_range` off the request.
    pub time_range: Option<String>,
    pub safesearch: String,
    pub crawl_multiplier: usize,
    pub retries: u32,
    pub retry_backoff: Duration,
    pub timeout: Duration,
}

impl SearxngConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        SearxngConfig {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            max_results_ceiling: 50,
            default_depth: SearchDepth::Basic,
            engines: DEFAULT_ENGINES.to_string(),
            time_range: None,
            safesearch: "0".to_string(),
            crawl_multiplier: 4,
            retries: 3,
            retry_backoff: Duration::from_millis(1000),
            timeout: Duration::from_millis(15_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub concurrency: usize,
    pub page_timeout: Duration,
    pub connect_timeout: Duration,
    /// Stop waiting for stragglers once the whole crawl batch exceeds this.
    pub deadline: Option<Duration>,
    pub max_content_chars: usize,
    pub min_relevance_score: f64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            concurrency: 8,
            page_timeout: Duration::from_millis(20_000),
            connect_timeout: Duration::from_millis(10_000),
            deadline: None,
            max_content_chars: 10_000,
            min_relevance_score: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Disabled,
    Memory,
    Redis { url: String },
    Upstash { url: String, token: String },
}

impl CacheBackend {
    pub fn name(&self) -> &'static str {
        match self {
            CacheBackend::Disabled => "none",
            CacheBackend::Memory => "memory",
            CacheBackend::Redis { .. } => "redis",
            CacheBackend::Upstash { .. } => "upstash",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            backend: CacheBackend::Memory,
            ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Config> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let mut searxng = SearxngConfig::new(env.get("SEARXNG_API_URL")?);
        searxng.max_results_ceiling = env
            .get_or("SEARXNG_MAX_RESULTS", searxng.max_results_ceiling)?
            .clamp(10, 100);
        searxng.default_depth = env.get_or("SEARXNG_DEFAULT_DEPTH", searxng.default_depth)?;
        searxng.engines = env.get_or("SEARXNG_ENGINES", searxng.engines)?;
        searxng.time_range = env
            .get_opt("SEARXNG_TIME_RANGE")
            .filter(|range| !range.eq_ignore_ascii_case("none"));
        searxng.safesearch = env.get_or("SEARXNG_SAFESEARCH", searxng.safesearch)?;
        searxng.crawl_multiplier = env
            .get_or("SEARXNG_CRAWL_MULTIPLIER", searxng.crawl_multiplier)?
            .max(1);
        searxng.retries = env.get_or("SEARXNG_RETRIES", searxng.retries)?.max(1);
        searxng.retry_backoff = env.get_millis_or("SEARXNG_RETRY_BACKOFF_MS", searxng.retry_backoff)?;
        searxng.timeout = env.get_millis_or("SEARXNG_TIMEOUT_MS", searxng.timeout)?;

        let defaults = CrawlConfig::default();
        let crawl = CrawlConfig {
            concurrency: env.get_or("CRAWL_CONCURRENCY", defaults.concurrency)?.max(1),
            page_timeout: env.get_millis_or("CRAWL_TIMEOUT_MS", defaults.page_timeout)?,
            connect_timeout: env
                .get_millis_or("CRAWL_CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
            deadline: match env.get_opt("CRAWL_DEADLINE_MS") {
                Some(raw) => Some(Duration::from_millis(parse_value("CRAWL_DEADLINE_MS", &raw)?)),
                None => None,
            },
            max_content_chars: defaults.max_content_chars,
            min_relevance_score: env
                .get_or("SEARCH_MIN_RELEVANCE_SCORE", defaults.min_relevance_score)?,
        };

        let defaults = CacheConfig::default();
        // USE_LOCAL_REDIS=true picks redis when CACHE_BACKEND is not set
        let default_backend = match env.get_opt("USE_LOCAL_REDIS").as_deref() {
            Some("true") => "redis",
            _ => "memory",
        };
        let backend = match env.get_or("CACHE_BACKEND", default_backend.to_string())?.as_str() {
            "memory" => CacheBackend::Memory,
            "redis" => CacheBackend::Redis {
                url: env.get_or("LOCAL_REDIS_URL", DEFAULT_LOCAL_REDIS_URL.to_string())?,
            },
            "none" | "disabled" => CacheBackend::Disabled,
            "upstash" => CacheBackend::Upstash {
                url: env.get("UPSTASH_REDIS_REST_URL")?,
                token: env.get("UPSTASH_REDIS_REST_TOKEN")?,
            },
            other => {
                return Err(SearchError::Config(format!(
                    "unknown CACHE_BACKEND: {other}"
                )));
            }
        };
        let cache = CacheConfig {
            backend,
            ttl: Duration::from_secs(env.get_or("CACHE_TTL_SECONDS", defaults.ttl.as_secs())?),
            sweep_interval: Duration::from_secs(
                env.get_or(
                    "CACHE_SWEEP_INTERVAL_SECONDS",
                    defaults.sweep_interval.as_secs(),
                )?
                .max(1),
            ),
        };

        Ok(Config {
            searxng,
            crawl,
            cache,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get_opt(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get(&self, key: &str) -> Result<String> {
        self.get_opt(key).ok_or_else(|| {
            SearchError::Config(format!("missing required environment variable: {key}"))
        })
    }

    fn get_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get_opt(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    fn get_millis_or(&self, key: &str, default: Duration) -> Result<Duration> {
        let millis = self.get_or(key, default.as_millis() as u64)?;
        Ok(Duration::from_millis(millis))
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| SearchError::Config(format!("invalid value for {key}: {raw:?}")))
}
