#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Missing or malformed configuration value.
    #[error("config error: {0}")]
    Config(String),

    /// The incoming search request cannot be served.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The metasearch engine could not be reached after all retries.
    #[error("metasearch request failed: {0}")]
    Metasearch(String),

    /// The metasearch engine answered with something that is not a search payload.
    #[error("invalid response from metasearch engine: {0}")]
    InvalidResponse(String),

    /// A third-party page could not be retrieved.
    #[error("page fetch failed: {0}")]
    Fetch(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("cache error: {0}")]
    Cache(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;
