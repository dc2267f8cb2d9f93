use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcCallError {
    #[error("POST {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("malformed JSON-RPC response: {0}")]
    Malformed(String),
}

impl RpcCallError {
    /// Human-readable reason including any structured `data` the server attached
    /// (bundlers put the AAxx code and revert reason there).
    pub fn reason(&self) -> String {
        match self {
            RpcCallError::Rpc {
                message,
                data: Some(data),
                ..
            } => format!("{message} ({data})"),
            RpcCallError::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Plain JSON-RPC 2.0 over HTTP POST, shared by the bundler and paymaster clients.
#[derive(Debug, Clone)]
pub struct HttpRpc {
    url: String,
    http: reqwest::Client,
}

impl HttpRpc {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcCallError> {
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        tracing::debug!(method, url = %self.url, "json-rpc request");

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|source| RpcCallError::Transport {
                url: self.url.clone(),
                source,
            })?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| RpcCallError::Malformed(format!("failed to decode JSON: {e}")))?;

        // JSON-RPC errors are often returned with a non-2xx status; prefer the structured error.
        if let Some(err) = body.get("error") {
            return Err(parse_error_object(err));
        }

        if !status.is_success() {
            return Err(RpcCallError::Http {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| RpcCallError::Malformed("missing result field".to_string()))
    }
}

fn parse_error_object(err: &Value) -> RpcCallError {
    let code = err.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    let data = err.get("data").filter(|d| !d.is_null()).cloned();
    RpcCallError::Rpc {
        code,
        message,
        data,
    }
}
