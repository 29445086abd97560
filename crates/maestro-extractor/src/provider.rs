//! Pluggable batch-LLM interface and the OpenAI Batch API implementation.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ExtractorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

#[derive(Debug, Clone)]
pub struct BatchRequestItem {
    /// Caller-chosen id echoed back in the result.
    pub custom_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct BatchResultItem {
    pub custom_id: String,
    /// Model output; `None` when the item errored.
    pub content: Option<String>,
    pub error: Option<String>,
}

/// The extractor only ever touches providers through this interface.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn submit_batch(&self, requests: &[BatchRequestItem], model: &str) -> Result<String>;
    async fn get_batch_status(&self, batch_id: &str) -> Result<BatchStatus>;
    async fn get_batch_results(&self, batch_id: &str) -> Result<Vec<BatchResultItem>>;
}

/// OpenAI Batch API: upload a JSONL input file, create the batch, poll,
/// download the output file.
pub struct OpenAiBatchProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBatchProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
        }
    }

    fn input_jsonl(requests: &[BatchRequestItem], model: &str) -> String {
        requests
            .iter()
            .map(|r| {
                json!({
                    "custom_id": r.custom_id,
                    "method": "POST",
                    "url": "/v1/chat/completions",
                    "body": {
                        "model": model,
                        "messages": [{"role": "user", "content": r.prompt}],
                    }
                })
                .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl BatchProvider for OpenAiBatchProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn submit_batch(&self, requests: &[BatchRequestItem], model: &str) -> Result<String> {
        let jsonl = Self::input_jsonl(requests, model);
        let part = reqwest::multipart::Part::text(jsonl)
            .file_name("batch_input.jsonl")
            .mime_str("application/jsonl")
            .map_err(|e| ExtractorError::Provider(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);

        let file: Value = self
            .client
            .post(format!("{}/v1/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let file_id = file
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ExtractorError::Provider("file upload returned no id".into()))?;

        let batch: Value = self
            .client
            .post(format!("{}/v1/batches", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "input_file_id": file_id,
                "endpoint": "/v1/chat/completions",
                "completion_window": "24h",
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        batch
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ExtractorError::Provider("batch creation returned no id".into()))
    }

    async fn get_batch_status(&self, batch_id: &str) -> Result<BatchStatus> {
        let batch: Value = self
            .client
            .get(format!("{}/v1/batches/{batch_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let status = batch.get("status").and_then(|v| v.as_str()).unwrap_or("");
        debug!(batch_id, status, "batch status");
        Ok(match status {
            "completed" => BatchStatus::Completed,
            "failed" | "cancelled" | "cancelling" => BatchStatus::Failed,
            "expired" => BatchStatus::Expired,
            _ => BatchStatus::Pending,
        })
    }

    async fn get_batch_results(&self, batch_id: &str) -> Result<Vec<BatchResultItem>> {
        let batch: Value = self
            .client
            .get(format!("{}/v1/batches/{batch_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let output_file = batch
            .get("output_file_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ExtractorError::Provider("batch has no output file".into()))?;

        let body = self
            .client
            .get(format!("{}/v1/files/{output_file}/content", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(body.lines().filter_map(parse_result_line).collect())
    }
}

fn parse_result_line(line: &str) -> Option<BatchResultItem> {
    let value: Value = serde_json::from_str(line).ok()?;
    let custom_id = value.get("custom_id")?.as_str()?.to_string();
    let error = value
        .get("error")
        .filter(|e| !e.is_null())
        .map(|e| e.to_string());
    let content = value
        .pointer("/response/body/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(String::from);
    Some(BatchResultItem {
        custom_id,
        content,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_jsonl_has_one_request_per_line() {
        let requests = vec![
            BatchRequestItem {
                custom_id: "a".into(),
                prompt: "p1".into(),
            },
            BatchRequestItem {
                custom_id: "b".into(),
                prompt: "p2".into(),
            },
        ];
        let jsonl = OpenAiBatchProvider::input_jsonl(&requests, "gpt-4o-mini");
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["custom_id"], "a");
        assert_eq!(first["body"]["model"], "gpt-4o-mini");
    }

    #[test]
    fn result_lines_extract_content_and_errors() {
        let ok = parse_result_line(
            r#"{"custom_id":"a","response":{"body":{"choices":[{"message":{"content":"[]"}}]}}}"#,
        )
        .unwrap();
        assert_eq!(ok.content.as_deref(), Some("[]"));
        assert!(ok.error.is_none());

        let err = parse_result_line(r#"{"custom_id":"b","error":{"message":"boom"}}"#).unwrap();
        assert!(err.content.is_none());
        assert!(err.error.unwrap().contains("boom"));

        assert!(parse_result_line("not json").is_none());
    }
}
