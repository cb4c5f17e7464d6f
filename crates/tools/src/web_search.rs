//! Web search tool: query search engines with ordered failover.
//!
//! The primary engine is tried first, then each fallback once. The first
//! engine to return results wins; if all of them fail the tool reports a
//! failure result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use taskpilot_config::SearchConfig;
use taskpilot_core::error::ToolError;
use taskpilot_core::tool::{Tool, ToolResult};
use tracing::{debug, info, warn};

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

/// A search backend.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchHit>, ToolError>;
}

/// DuckDuckGo's instant-answer JSON API.
pub struct DuckDuckGoEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoEngine {
    pub fn new(timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "web_search".into(),
                reason: format!("HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: "https://api.duckduckgo.com/".into(),
        })
    }

    fn parse(body: DdgResponse, num_results: usize) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        if !body.abstract_url.is_empty() {
            hits.push(SearchHit {
                title: body.heading,
                url: body.abstract_url,
            });
        }
        let mut stack: Vec<DdgTopic> = body.related_topics.into_iter().rev().collect();
        while let Some(topic) = stack.pop() {
            if hits.len() >= num_results {
                break;
            }
            match topic.first_url {
                Some(url) if !url.is_empty() => hits.push(SearchHit {
                    title: topic.text.unwrap_or_default(),
                    url,
                }),
                // Category groups nest their topics one level down
                _ => stack.extend(topic.topics.into_iter().rev()),
            }
        }
        hits.truncate(num_results);
        hits
    }
}

#[async_trait]
impl SearchEngine for DuckDuckGoEngine {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason,
        };

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("no_html", "1"), ("skip_disambig", "1")])
            .send()
            .await
            .map_err(|e| failed(format!("duckduckgo: {e}")))?;

        if !response.status().is_success() {
            return Err(failed(format!("duckduckgo: HTTP {}", response.status())));
        }

        let body: DdgResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("duckduckgo: bad response: {e}")))?;

        Ok(Self::parse(body, num_results))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DdgResponse {
    #[serde(default)]
    heading: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<DdgTopic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DdgTopic {
    #[serde(default, rename = "FirstURL")]
    first_url: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    topics: Vec<DdgTopic>,
}

pub struct WebSearchTool {
    engines: Vec<Arc<dyn SearchEngine>>,
    default_num_results: usize,
}

impl WebSearchTool {
    pub fn new(engines: Vec<Arc<dyn SearchEngine>>, default_num_results: usize) -> Self {
        Self {
            engines,
            default_num_results,
        }
    }

    /// Engines named in `[search]`, primary first. Unknown names are skipped.
    pub fn from_config(config: &SearchConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let engines = std::iter::once(&config.engine)
            .chain(&config.fallback_engines)
            .filter_map(|name| match name.to_ascii_lowercase().as_str() {
                "duckduckgo" => match DuckDuckGoEngine::new(timeout) {
                    Ok(engine) => Some(Arc::new(engine) as Arc<dyn SearchEngine>),
                    Err(e) => {
                        warn!(engine = %name, error = %e, "Search engine unavailable");
                        None
                    }
                },
                other => {
                    warn!(engine = %other, "Unknown search engine, skipping");
                    None
                }
            })
            .collect();
        Self::new(engines, config.num_results)
    }

    fn render(engine: &str, query: &str, hits: &[SearchHit]) -> String {
        let mut out = format!("Search results for '{query}' ({engine}):\n");
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!("{}. {} - {}\n", i + 1, hit.title, hit.url));
        }
        out.trim_end().to_string()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Perform a web search and return a list of relevant links. Tries the primary search engine first \
         and falls back to the configured alternatives if it fails."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "(required) The search query to submit to the search engine."
                },
                "num_results": {
                    "type": "integer",
                    "description": "(optional) The number of search results to return.",
                    "default": self.default_num_results
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let num_results = arguments["num_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(self.default_num_results)
            .max(1);

        let mut errors = Vec::new();
        for engine in &self.engines {
            debug!(engine = %engine.name(), query = %query, "Searching");
            match engine.search(query, num_results).await {
                Ok(hits) if !hits.is_empty() => {
                    info!(engine = %engine.name(), hits = hits.len(), "Search succeeded");
                    return Ok(ToolResult::success(Self::render(engine.name(), query, &hits)));
                }
                Ok(_) => errors.push(format!("{}: no results", engine.name())),
                Err(e) => {
                    warn!(engine = %engine.name(), error = %e, "Search engine failed, trying next");
                    errors.push(format!("{}: {e}", engine.name()));
                }
            }
        }

        if errors.is_empty() {
            return Ok(ToolResult::failure("No search engines configured"));
        }
        Ok(ToolResult::failure(format!(
            "All search engines failed: {}",
            errors.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeEngine {
        name: &'static str,
        hits: Result<Vec<SearchHit>, String>,
        calls: Mutex<usize>,
    }

    impl FakeEngine {
        fn ok(name: &'static str, urls: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name,
                hits: Ok(urls
                    .iter()
                    .map(|u| SearchHit {
                        title: format!("title of {u}"),
                        url: u.to_string(),
                    })
                    .collect()),
                calls: Mutex::new(0),
            })
        }

        fn broken(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                hits: Err("connection refused".into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SearchEngine for FakeEngine {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(&self, _query: &str, num_results: usize) -> Result<Vec<SearchHit>, ToolError> {
            *self.calls.lock().unwrap() += 1;
            match &self.hits {
                Ok(hits) => Ok(hits.iter().take(num_results).cloned().collect()),
                Err(reason) => Err(ToolError::ExecutionFailed {
                    tool_name: "web_search".into(),
                    reason: reason.clone(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn primary_engine_wins() {
        let primary = FakeEngine::ok("primary", &["https://a.example", "https://b.example"]);
        let backup = FakeEngine::ok("backup", &["https://c.example"]);
        let tool = WebSearchTool::new(
            vec![
                primary.clone() as Arc<dyn SearchEngine>,
                backup.clone() as Arc<dyn SearchEngine>,
            ],
            5,
        );

        let result = tool.execute(serde_json::json!({"query": "rust"})).await.unwrap();
        let output = result.output.unwrap();
        assert!(output.contains("1. title of https://a.example - https://a.example"));
        assert_eq!(primary.calls(), 1);
        assert_eq!(backup.calls(), 0);
    }

    #[tokio::test]
    async fn falls_back_once_per_engine() {
        let primary = FakeEngine::broken("primary");
        let backup = FakeEngine::ok("backup", &["https://c.example"]);
        let tool = WebSearchTool::new(
            vec![
                primary.clone() as Arc<dyn SearchEngine>,
                backup.clone() as Arc<dyn SearchEngine>,
            ],
            5,
        );

        let result = tool
            .execute(serde_json::json!({"query": "rust", "num_results": 1}))
            .await
            .unwrap();
        assert!(result.output.unwrap().contains("(backup)"));
        assert_eq!(primary.calls(), 1);
        assert_eq!(backup.calls(), 1);
    }

    #[tokio::test]
    async fn all_engines_failing_is_a_failure_result() {
        let tool = WebSearchTool::new(
            vec![
                FakeEngine::broken("one") as Arc<dyn SearchEngine>,
                FakeEngine::ok("two", &[]) as Arc<dyn SearchEngine>,
            ],
            5,
        );
        let result = tool.execute(serde_json::json!({"query": "rust"})).await.unwrap();
        let error = result.error.unwrap();
        assert!(error.contains("one: "));
        assert!(error.contains("two: no results"));
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let tool = WebSearchTool::new(vec![], 5);
        let result = tool.execute(serde_json::json!({"query": "  "})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn duckduckgo_parse_flattens_topic_groups() {
        let body: DdgResponse = serde_json::from_value(serde_json::json!({
            "Heading": "Rust",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust_(programming_language)",
            "RelatedTopics": [
                { "FirstURL": "https://duckduckgo.com/Cargo", "Text": "Cargo - package manager" },
                { "Name": "Tools", "Topics": [
                    { "FirstURL": "https://duckduckgo.com/Clippy", "Text": "Clippy - linter" }
                ]}
            ]
        }))
        .unwrap();
        let hits = DuckDuckGoEngine::parse(body, 10);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "Rust");
        assert_eq!(hits[2].url, "https://duckduckgo.com/Clippy");

        let body: DdgResponse = serde_json::from_value(serde_json::json!({
            "RelatedTopics": [
                { "FirstURL": "https://x/1", "Text": "1" },
                { "FirstURL": "https://x/2", "Text": "2" }
            ]
        }))
        .unwrap();
        assert_eq!(DuckDuckGoEngine::parse(body, 1).len(), 1);
    }

    #[test]
    fn unknown_engines_are_skipped() {
        let config = SearchConfig {
            engine: "duckduckgo".into(),
            fallback_engines: vec!["altavista".into()],
            ..SearchConfig::default()
        };
        let tool = WebSearchTool::from_config(&config);
        assert_eq!(tool.engines.len(), 1);
    }
}
