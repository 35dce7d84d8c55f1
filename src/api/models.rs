use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::data_models::SearchDepth;

pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Body of `POST /api/advanced-search`. Everything except `query` is optional
/// and tolerant of wrong types: a bad value falls back to its default instead
/// of rejecting the request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub max_results: Option<usize>,
    #[serde(default, deserialize_with = "lenient_depth")]
    pub search_depth: Option<SearchDepth>,
    #[serde(default, deserialize_with = "lenient_domains")]
    pub include_domains: Vec<String>,
    #[serde(default, deserialize_with = "lenient_domains")]
    pub exclude_domains: Vec<String>,
}

impl SearchRequest {
    /// Requested result count clamped to `[1, ceiling]`.
    pub fn effective_max_results(&self, ceiling: usize) -> usize {
        self.max_results
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, ceiling.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    pub error: String,
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n
            .as_u64()
            .map(|n| n as usize)
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.max(0.0) as usize)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_depth<'de, D>(deserializer: D) -> Result<Option<SearchDepth>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().and_then(|s| s.parse().ok()))
}

fn lenient_domains<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_request() {
        let request: SearchRequest = serde_json::from_str(
            r#"{"query":"rust","maxResults":7,"searchDepth":"advanced","includeDomains":["a.com"]}"#,
        )
        .unwrap();
        assert_eq!(request.query, "rust");
        assert_eq!(request.max_results, Some(7));
        assert_eq!(request.search_depth, Some(SearchDepth::Advanced));
        assert_eq!(request.include_domains, vec!["a.com"]);
        assert!(request.exclude_domains.is_empty());
    }

    #[test]
    fn test_wrong_types_fall_back() {
        let request: SearchRequest = serde_json::from_str(
            r#"{"query":"rust","maxResults":"lots","searchDepth":"deep","includeDomains":"a.com","excludeDomains":[1,"b.com"]}"#,
        )
        .unwrap();
        assert_eq!(request.max_results, None);
        assert_eq!(request.search_depth, None);
        assert!(request.include_domains.is_empty());
        assert_eq!(request.exclude_domains, vec!["b.com"]);
    }

    #[test]
    fn test_effective_max_results() {
        let request: SearchRequest = serde_json::from_str(r#"{"query":"q"}"#).unwrap();
        assert_eq!(request.effective_max_results(50), 10);

        let request: SearchRequest =
            serde_json::from_str(r#"{"query":"q","maxResults":500}"#).unwrap();
        assert_eq!(request.effective_max_results(50), 50);

        let request: SearchRequest =
            serde_json::from_str(r#"{"query":"q","maxResults":0}"#).unwrap();
        assert_eq!(request.effective_max_results(50), 1);

        let request: SearchRequest =
            serde_json::from_str(r#"{"query":"q","maxResults":4.0}"#).unwrap();
        assert_eq!(request.effective_max_results(50), 4);
    }
}
