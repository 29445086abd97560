//! Web search via the Tavily API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use maestro_core::logging::EventType;

use super::{optional_str, required_str, Tool, ToolError};

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

pub struct WebSearchTool {
    pub(crate) name: String,
    pub(crate) description: String,
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl WebSearchTool {
    pub fn new(name: String, description: String, api_key: String) -> Self {
        Self {
            name,
            description,
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query to find information on the internet."
                },
                "search_depth": {
                    "type": "string",
                    "enum": ["basic", "deep"],
                    "description": "Search depth. Defaults to basic."
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 10,
                    "description": "Number of results to return, 1-10. Defaults to 5."
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let query = required_str(&args, "query")?;
        let depth = match optional_str(&args, "search_depth") {
            Some(d @ ("basic" | "deep")) => d,
            Some(other) => {
                warn!(depth = other, "invalid search_depth, using 'basic'");
                "basic"
            }
            None => "basic",
        };
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_i64())
            .unwrap_or(5)
            .clamp(1, 10);

        info!(query, depth, max_results, event_type = %EventType::ToolCall, "executing web search");

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "search_depth": depth,
                "max_results": max_results,
            }))
            .send()
            .await
            .map_err(|e| ToolError::api(format!("web search failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(ToolError::api(format!("web search failed with status {status}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ToolError::api(format!("undecodable search response: {e}")))?;

        if parsed.results.is_empty() {
            return Ok("No search results found.".to_string());
        }

        let mut out = String::from("Search Results:\n\n");
        for (i, result) in parsed.results.iter().enumerate() {
            out.push_str(&format!(
                "{}. {}\n   URL: {}\n   {}\n\n",
                i + 1,
                result.title,
                result.url,
                result.content
            ));
        }
        Ok(out.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_query_is_invalid_input() {
        let tool = WebSearchTool::new(
            "web_search".to_string(),
            "Search".to_string(),
            "key".to_string(),
        )
        .with_base_url("http://127.0.0.1:9".to_string());
        let err = tool.invoke(json!({})).await.unwrap_err();
        assert_eq!(err.code, "INVALID_INPUT");
    }
}
