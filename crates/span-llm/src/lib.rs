//! Abstracts a single model invocation: `(system_prompt, message_history,
//! tool_schemas, max_tokens) -> Message`. A transport only — it never
//! interprets tool input, that is `AgentEngine`'s job.
//!
//! The concrete client is an Anthropic Messages API caller built on
//! `reqwest::blocking`, carrying the teacher's retry/backoff idiom
//! (exponential backoff, honoring `Retry-After`, distinguishing retryable
//! transport errors from terminal 4xx) adapted from the original
//! `DeepSeekClient::complete_inner` loop.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const NETWORK_RETRY_BASE_MS: u64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: String,
    pub endpoint: String,
    pub max_retries: u8,
    pub retry_base_ms: u64,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            max_retries: 3,
            retry_base_ms: 1000,
            timeout: Duration::from_secs(120),
        }
    }
}

/// A model-request transport. Implementations perform a single
/// request/response exchange; they do not loop, retry beyond their own
/// internal transport-level policy, or interpret tool input.
pub trait LlmClient {
    fn send_message(
        &self,
        system_prompt: &str,
        message_history: &[Message],
        tool_schemas: &[ToolSchema],
        max_tokens: u32,
    ) -> Result<Message>;
}

pub struct AnthropicClient {
    cfg: LlmConfig,
    client: Client,
}

impl AnthropicClient {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self { cfg, client })
    }

    fn build_payload(
        &self,
        system_prompt: &str,
        message_history: &[Message],
        tool_schemas: &[ToolSchema],
        max_tokens: u32,
    ) -> Value {
        let messages: Vec<Value> = message_history
            .iter()
            .map(|m| json!({"role": m.role, "content": render_content(&m.content)}))
            .collect();

        let mut payload = json!({
            "model": self.cfg.model,
            "system": system_prompt,
            "messages": messages,
            "max_tokens": max_tokens,
        });

        if !tool_schemas.is_empty() {
            let tools: Vec<Value> = tool_schemas
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            payload["tools"] = json!(tools);
        }

        payload
    }
}

impl LlmClient for AnthropicClient {
    fn send_message(
        &self,
        system_prompt: &str,
        message_history: &[Message],
        tool_schemas: &[ToolSchema],
        max_tokens: u32,
    ) -> Result<Message> {
        let payload = self.build_payload(system_prompt, message_history, tool_schemas, max_tokens);

        let mut last_err: Option<anyhow::Error> = None;
        let mut attempt: u8 = 0;
        while attempt <= self.cfg.max_retries {
            let response = self
                .client
                .post(&self.cfg.endpoint)
                .header("x-api-key", &self.cfg.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&payload)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let retry_after = parse_retry_after(resp.headers().get(reqwest::header::RETRY_AFTER));
                    let body = resp.text().context("reading response body")?;
                    if status.is_success() {
                        return parse_message(&body);
                    }
                    last_err = Some(format_api_error(status, &body));
                    if should_retry_status(status) && attempt < self.cfg.max_retries {
                        thread::sleep(retry_delay(self.cfg.retry_base_ms, attempt, retry_after));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    last_err = Some(anyhow!("transport error: {e}"));
                    if should_retry_transport_error(&e) && attempt < self.cfg.max_retries {
                        thread::sleep(retry_delay(NETWORK_RETRY_BASE_MS, attempt, None));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    break;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("model request failed without detailed error")))
    }
}

fn render_content(blocks: &[ContentBlock]) -> Value {
    let parts: Vec<Value> = blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => json!({"type": "text", "text": text}),
            ContentBlock::ToolUse { id, name, input } => {
                json!({"type": "tool_use", "id": id, "name": name, "input": input})
            }
            ContentBlock::ToolResult { tool_use_id, content } => {
                json!({"type": "tool_result", "tool_use_id": tool_use_id, "content": content})
            }
        })
        .collect();
    json!(parts)
}

fn parse_message(body: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(body).context("parsing model response JSON")?;
    let role = value
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("assistant")
        .to_string();

    let mut content = Vec::new();
    for block in value
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
    {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    content.push(ContentBlock::Text {
                        text: text.to_string(),
                    });
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let input = block.get("input").cloned().unwrap_or(json!({}));
                content.push(ContentBlock::ToolUse { id, name, input });
            }
            _ => {}
        }
    }

    Ok(Message { role, content })
}

fn format_api_error(status: StatusCode, body: &str) -> anyhow::Error {
    anyhow!("model request failed with status {status}: {body}")
}

fn should_retry_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
    )
}

fn should_retry_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<u64> {
    header?.to_str().ok()?.trim().parse::<u64>().ok()
}

fn retry_delay(base_ms: u64, attempt: u8, retry_after_seconds: Option<u64>) -> Duration {
    if let Some(seconds) = retry_after_seconds {
        return Duration::from_millis(seconds.saturating_mul(1000));
    }
    let exponent = u32::from(attempt);
    let delay = base_ms.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_millis(delay.max(base_ms.max(100)))
}

/// Concatenates the text blocks of a message, in order.
pub fn extract_text(message: &Message) -> String {
    message
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Yields `{id, name, input}` for each tool-use block, in order.
pub fn extract_tool_calls(message: &Message) -> Vec<ToolCallRequest> {
    message
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some(ToolCallRequest {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            _ => None,
        })
        .collect()
}

pub fn has_tool_use(message: &Message) -> bool {
    message
        .content
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(text: &str) -> Message {
        Message {
            role: "assistant".to_string(),
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        }
    }

    #[test]
    fn extract_text_concatenates_blocks_in_order() {
        let msg = Message {
            role: "assistant".to_string(),
            content: vec![
                ContentBlock::Text {
                    text: "hello ".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "1".to_string(),
                    name: "read_file".to_string(),
                    input: json!({}),
                },
                ContentBlock::Text {
                    text: "world".to_string(),
                },
            ],
        };
        assert_eq!(extract_text(&msg), "hello world");
    }

    #[test]
    fn has_tool_use_true_when_present() {
        let msg = Message {
            role: "assistant".to_string(),
            content: vec![ContentBlock::ToolUse {
                id: "1".to_string(),
                name: "apply_patch".to_string(),
                input: json!({}),
            }],
        };
        assert!(has_tool_use(&msg));
    }

    #[test]
    fn has_tool_use_false_for_text_only() {
        assert!(!has_tool_use(&text_message("hi")));
    }

    #[test]
    fn extract_tool_calls_preserves_order() {
        let msg = Message {
            role: "assistant".to_string(),
            content: vec![
                ContentBlock::ToolUse {
                    id: "a".to_string(),
                    name: "read_file".to_string(),
                    input: json!({"path": "x.py"}),
                },
                ContentBlock::ToolUse {
                    id: "b".to_string(),
                    name: "run_shell".to_string(),
                    input: json!({"command": "pytest"}),
                },
            ],
        };
        let calls = extract_tool_calls(&msg);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[1].name, "run_shell");
    }

    #[test]
    fn parse_message_extracts_text_and_tool_use() {
        let body = json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "ok"},
                {"type": "tool_use", "id": "t1", "name": "read_file", "input": {"path": "a.py"}}
            ]
        })
        .to_string();
        let msg = parse_message(&body).unwrap();
        assert_eq!(msg.role, "assistant");
        assert_eq!(extract_text(&msg), "ok");
        let calls = extract_tool_calls(&msg);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
    }

    #[test]
    fn should_retry_status_covers_5xx_and_429() {
        assert!(should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!should_retry_status(StatusCode::BAD_REQUEST));
        assert!(!should_retry_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn retry_delay_honors_retry_after_header() {
        let d = retry_delay(1000, 0, Some(5));
        assert_eq!(d, Duration::from_millis(5000));
    }

    #[test]
    fn retry_delay_exponential_backoff_without_header() {
        assert_eq!(retry_delay(1000, 0, None), Duration::from_millis(1000));
        assert_eq!(retry_delay(1000, 1, None), Duration::from_millis(2000));
        assert_eq!(retry_delay(1000, 2, None), Duration::from_millis(4000));
    }
}
