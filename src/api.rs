//! Gateway to the messaging server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::Credentials;

pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_TOKEN_HEADER: &str = "x-user-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One call to the server. Body and param keys use the client's camelCase.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub params: Map<String, Value>,
    pub credentials: Option<Credentials>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
            params: Map::new(),
            credentials: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Request/response transport to the server.
///
/// Non-2xx responses and connection failures are [`Error::Transport`].
#[async_trait]
pub trait ApiGateway: Send + Sync {
    async fn request(&self, request: Request) -> Result<Value>;
}

#[derive(Clone, Debug)]
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("woosh/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::transport(None, e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ApiGateway for HttpApiClient {
    async fn request(&self, request: Request) -> Result<Value> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(method = ?request.method, %url, "api request");

        let mut builder = self.client.request(request.method.as_reqwest(), url);

        if let Some(credentials) = &request.credentials {
            builder = builder
                .header(USER_NAME_HEADER, &credentials.username)
                .header(USER_TOKEN_HEADER, &credentials.password);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.params.is_empty() {
            builder = builder.query(&query_pairs(&request.params));
        }
        if request.method != Method::Get {
            if let Some(body) = &request.body {
                builder = builder.json(&to_snake_keys(body));
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::transport(None, e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::transport(Some(status.as_u16()), e.to_string()))?;

        if !status.is_success() {
            return Err(Error::transport(Some(status.as_u16()), failure_message(status, &text)));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        let body: Value = serde_json::from_str(&text)?;
        Ok(to_camel_keys(&body))
    }
}

fn failure_message(status: StatusCode, text: &str) -> String {
    let from_json = serde_json::from_str::<Value>(text).ok().and_then(|v| {
        v.get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
    });
    match from_json {
        Some(message) => message,
        None if !text.trim().is_empty() => text.trim().to_string(),
        None => status.canonical_reason().unwrap_or_default().to_string(),
    }
}

fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (snake_case(key), value)
        })
        .collect()
}

/// Recursively renames object keys from camelCase to snake_case.
pub fn to_snake_keys(value: &Value) -> Value {
    rename_keys(value, snake_case)
}

/// Recursively renames object keys from snake_case to camelCase.
pub fn to_camel_keys(value: &Value) -> Value {
    rename_keys(value, camel_case)
}

fn rename_keys(value: &Value, rename: fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (rename(k), rename_keys(v, rename)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| rename_keys(v, rename)).collect()),
        other => other.clone(),
    }
}

fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        match c {
            '_' if !out.is_empty() => upper = true,
            _ if upper => {
                out.push(c.to_ascii_uppercase());
                upper = false;
            }
            _ => out.push(c),
        }
    }
    out
}
