//! HTTP tool: send a request with `reqwest` and return the response.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, redirect};
use serde_json::{Map, Value, json};
use skillrun_core::error::ToolError;
use skillrun_core::tool::{Tool, ToolContext};
use tracing::debug;

const METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

pub struct HttpTool {
    following: Client,
    direct: Client,
}

impl HttpTool {
    pub fn new(timeout_secs: u64) -> Result<Self, ToolError> {
        let build = |policy: redirect::Policy| {
            Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .redirect(policy)
                .build()
                .map_err(|e| ToolError::failed("http", format!("Failed to build HTTP client: {e}")))
        };
        Ok(Self {
            following: build(redirect::Policy::limited(10))?,
            direct: build(redirect::Policy::none())?,
        })
    }
}

fn string_pairs(value: &Value) -> Vec<(String, String)> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        "http"
    }

    fn description(&self) -> &str {
        "Send an HTTP request and return the response"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "method": {
                    "type": "string",
                    "description": "HTTP method (GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS). Defaults to GET.",
                    "enum": METHODS
                },
                "url": {
                    "type": "string",
                    "description": "The request URL"
                },
                "headers": {
                    "type": "object",
                    "description": "HTTP headers as key-value pairs (optional)",
                    "additionalProperties": { "type": "string" }
                },
                "params": {
                    "type": "object",
                    "description": "Query parameters as key-value pairs (optional)",
                    "additionalProperties": { "type": "string" }
                },
                "json": {
                    "type": "object",
                    "description": "JSON body data (optional)"
                },
                "data": {
                    "type": "object",
                    "description": "Form data as key-value pairs (optional)",
                    "additionalProperties": { "type": "string" }
                },
                "content": {
                    "type": "string",
                    "description": "Raw request body content (optional)"
                },
                "follow_redirects": {
                    "type": "boolean",
                    "description": "Whether to follow redirects (default: true)",
                    "default": true
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let url = arguments["url"].as_str().unwrap_or_default();
        if url.is_empty() {
            return Err(ToolError::InvalidArguments("URL cannot be empty".into()));
        }

        let method_name = arguments["method"].as_str().unwrap_or("GET").to_uppercase();
        if !METHODS.contains(&method_name.as_str()) {
            return Err(ToolError::InvalidArguments(format!("Invalid HTTP method: {method_name}")));
        }
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let client = if arguments["follow_redirects"].as_bool().unwrap_or(true) {
            &self.following
        } else {
            &self.direct
        };

        debug!(method = %method_name, url = %url, "Sending HTTP request");
        let mut request = client.request(method, url);
        for (name, value) in string_pairs(&arguments["headers"]) {
            request = request.header(name, value);
        }
        let params = string_pairs(&arguments["params"]);
        if !params.is_empty() {
            request = request.query(&params);
        }
        if let Some(body) = arguments.get("json").filter(|v| !v.is_null()) {
            request = request.json(body);
        } else if let Some(form) = arguments.get("data").filter(|v| v.is_object()) {
            request = request.form(&string_pairs(form));
        } else if let Some(content) = arguments["content"].as_str() {
            request = request.body(content.to_string());
        }

        let response = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("Request timed out: {url}")
            } else if e.is_connect() {
                format!("Connection failed: {e}")
            } else {
                format!("Request failed: {e}")
            };
            ToolError::failed(self.name(), reason)
        })?;

        let status = response.status();
        let final_url = response.url().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let content = response
            .text()
            .await
            .map_err(|e| ToolError::failed(self.name(), format!("Request failed: {e}")))?;
        let parsed = serde_json::from_str::<Value>(&content).unwrap_or(Value::Null);

        let mut result = Map::new();
        result.insert("success".into(), json!(status.is_success()));
        result.insert("status_code".into(), json!(status.as_u16()));
        result.insert("method".into(), json!(method_name));
        result.insert("url".into(), json!(final_url));
        result.insert("headers".into(), json!(headers));
        result.insert("content".into(), json!(content));
        result.insert("json".into(), parsed);
        Ok(Value::Object(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response and hand back the raw request text.
    async fn one_shot_server(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let body_len = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + body_len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn tool_definition() {
        let tool = HttpTool::new(5).unwrap();
        assert_eq!(tool.name(), "http");
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], json!(["url"]));
        assert_eq!(schema["properties"]["method"]["enum"].as_array().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn get_parses_json_body() {
        let (base, server) = one_shot_server(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 11\r\nconnection: close\r\n\r\n{\"ok\":true}",
        )
        .await;

        let result = HttpTool::new(5)
            .unwrap()
            .execute(json!({"url": format!("{base}/items"), "params": {"page": "2"}}), &ToolContext::new())
            .await
            .unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["status_code"], 200);
        assert_eq!(result["method"], "GET");
        assert_eq!(result["json"], json!({"ok": true}));
        assert_eq!(result["headers"]["content-type"], "application/json");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /items?page=2 "));
    }

    #[tokio::test]
    async fn error_status_is_not_success() {
        let (base, server) = one_shot_server(
            "HTTP/1.1 404 Not Found\r\ncontent-length: 7\r\nconnection: close\r\n\r\nmissing",
        )
        .await;

        let result = HttpTool::new(5)
            .unwrap()
            .execute(
                json!({"method": "post", "url": base, "json": {"a": 1}}),
                &ToolContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(result["status_code"], 404);
        assert_eq!(result["method"], "POST");
        assert_eq!(result["content"], "missing");
        assert!(result["json"].is_null());

        let request = server.await.unwrap();
        assert!(request.ends_with("{\"a\":1}"));
    }

    #[tokio::test]
    async fn connection_failure_is_execution_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = HttpTool::new(2)
            .unwrap()
            .execute(json!({"url": format!("http://{addr}/")}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn rejects_unknown_method() {
        let err = HttpTool::new(2)
            .unwrap()
            .execute(json!({"method": "BREW", "url": "http://localhost"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
