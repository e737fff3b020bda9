//! HTTP transport: an OpenAI-compatible chat-completions request carrying a
//! single `submit_patch` tool, so the model's reply is a tool call rather
//! than loose prose the validator would have to fish a JSON object out of.

use std::pin::Pin;
use std::time::Duration;

use std::future::Future;

use codeloop_kernel::error::RunError;
use codeloop_kernel::ports::{AgentPort, AgentRequest, AgentResponse};
use serde_json::json;

use super::SUBMIT_PATCH_TOOL;

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    call_timeout: Duration,
}

impl HttpTransport {
    /// `call_timeout` bounds a single request; it fires as
    /// [`RunError::TransportTimeout`] regardless of whether the hang was in
    /// connecting, sending, or waiting on the response body.
    pub fn new(endpoint: String, api_key: Option<String>, model: String, call_timeout: Duration) -> Self {
        HttpTransport {
            client: reqwest::Client::builder()
                .timeout(call_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            endpoint,
            api_key,
            model,
            call_timeout,
        }
    }

    fn role_name(role: codeloop_kernel::conversation::Role) -> &'static str {
        use codeloop_kernel::conversation::Role;
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn submit_patch_tool() -> serde_json::Value {
        json!({
            "type": "function",
            "function": {
                "name": SUBMIT_PATCH_TOOL,
                "description": "Submit exactly one patch operation as its raw JSON envelope.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "op": { "type": "string" },
                        "file": { "type": "string" },
                        "body": { "type": "string" },
                        "body_b64": { "type": "string" },
                        "target": { "type": "string" },
                        "mode": { "type": "string" },
                        "status": { "type": "string" }
                    },
                    "required": ["op", "status"]
                }
            }
        })
    }
}

impl AgentPort for HttpTransport {
    fn submit<'a>(
        &'a self,
        request: AgentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AgentResponse, RunError>> + Send + 'a>> {
        Box::pin(async move {
            let messages: Vec<serde_json::Value> = request
                .turns
                .iter()
                .map(|turn| {
                    json!({
                        "role": Self::role_name(turn.role),
                        "content": turn.content,
                    })
                })
                .collect();

            let body = json!({
                "model": self.model,
                "messages": messages,
                "tools": [Self::submit_patch_tool()],
                "tool_choice": { "type": "function", "function": { "name": SUBMIT_PATCH_TOOL } },
            });

            let mut req = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let response = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    RunError::TransportTimeout(self.call_timeout)
                } else {
                    RunError::TransportTransient(e.to_string())
                }
            })?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                return Err(RunError::TransportAuth(format!("status {status}")));
            }
            if status.is_server_error() {
                return Err(RunError::TransportTransient(format!("status {status}")));
            }
            if !status.is_success() {
                return Err(RunError::ProtocolViolation(format!(
                    "unexpected status {status}"
                )));
            }

            let payload: serde_json::Value = response
                .json()
                .await
                .map_err(|e| RunError::ProtocolViolation(format!("invalid JSON body: {e}")))?;

            let tool_call_args = payload
                .pointer("/choices/0/message/tool_calls/0/function/arguments")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    RunError::ProtocolViolation(
                        "reply did not contain a submit_patch tool call".to_string(),
                    )
                })?;

            Ok(AgentResponse {
                raw_text: tool_call_args.to_string(),
            })
        })
    }
}
