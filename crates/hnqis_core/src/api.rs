use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;

use crate::config::{Credentials, normalize_server};
use crate::error::ApiError;

pub const TIMEOUT_ENV: &str = "HNQIS_HTTP_TIMEOUT_MS";

/// Query parameters in request order; keys may repeat (e.g. several `filter`s).
pub type Params<'a> = [(&'a str, String)];

/// The four calls every script is built from. Failures are `ApiError`.
pub trait DhisApi {
    fn get_json(&mut self, endpoint: &str, params: &Params<'_>) -> Result<Value>;
    fn get_text(&mut self, endpoint: &str, format: &str, params: &Params<'_>) -> Result<String>;
    fn post(&mut self, endpoint: &str, params: &Params<'_>, body: &Value) -> Result<Value>;
    fn put(&mut self, endpoint: &str, params: &Params<'_>, body: &Value) -> Result<Value>;
    /// `{base}/api[/{version}]`, for messages that link to the server.
    fn api_url(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct DhisClientConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub api_version: Option<u32>,
    pub timeout_ms: Option<u64>,
}

impl DhisClientConfig {
    pub fn from_credentials(credentials: &Credentials, api_version: Option<u32>) -> Result<Self> {
        Ok(Self {
            base_url: normalize_server(&credentials.server)?,
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            api_version,
            timeout_ms: env_value_u64(TIMEOUT_ENV),
        })
    }
}

pub struct DhisClient {
    client: Client,
    config: DhisClientConfig,
    api_url: String,
}

impl DhisClient {
    pub fn new(config: DhisClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout_ms.map(Duration::from_millis))
            .build()
            .context("failed to build HTTP client")?;
        let api_url = api_root(&config.base_url, config.api_version);
        Ok(Self {
            client,
            config,
            api_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn execute(&self, request: RequestBuilder, url: &str) -> Result<String> {
        let response = request
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .map_err(|error| ApiError {
                status: None,
                url: url.to_string(),
                body: error.to_string(),
            })?;

        let status = response.status();
        let final_url = response.url().to_string();
        tracing::debug!("URL: {final_url}");
        let body = response.text().map_err(|error| ApiError {
            status: Some(status.as_u16()),
            url: final_url.clone(),
            body: error.to_string(),
        })?;

        if status != StatusCode::OK {
            return Err(ApiError {
                status: Some(status.as_u16()),
                url: final_url,
                body,
            }
            .into());
        }
        tracing::debug!("RESPONSE: {body}");
        Ok(body)
    }
}

impl DhisApi for DhisClient {
    fn get_json(&mut self, endpoint: &str, params: &Params<'_>) -> Result<Value> {
        let body = self.get_text(endpoint, "json", params)?;
        serde_json::from_str(&body)
            .with_context(|| format!("failed to decode JSON response for {endpoint}"))
    }

    fn get_text(&mut self, endpoint: &str, format: &str, params: &Params<'_>) -> Result<String> {
        let url = endpoint_url(&self.api_url, endpoint, Some(format));
        tracing::debug!("GET: {url} - parameters: {}", params_json(params));
        let request = self.client.get(&url).query(params);
        self.execute(request, &url)
    }

    fn post(&mut self, endpoint: &str, params: &Params<'_>, body: &Value) -> Result<Value> {
        let url = endpoint_url(&self.api_url, endpoint, None);
        tracing::debug!(
            "POST: {url} - parameters: {} - payload: {body}",
            params_json(params)
        );
        let request = self.client.post(&url).query(params).json(body);
        let text = self.execute(request, &url)?;
        Ok(parse_optional_json(&text))
    }

    fn put(&mut self, endpoint: &str, params: &Params<'_>, body: &Value) -> Result<Value> {
        let url = endpoint_url(&self.api_url, endpoint, None);
        tracing::debug!(
            "PUT: {url} - parameters: {} - payload: {body}",
            params_json(params)
        );
        let request = self.client.put(&url).query(params).json(body);
        let text = self.execute(request, &url)?;
        Ok(parse_optional_json(&text))
    }

    fn api_url(&self) -> &str {
        &self.api_url
    }
}

/// Minor server version, e.g. `30` for `2.30-SNAPSHOT`.
pub fn system_version<A: DhisApi>(api: &mut A) -> Result<u32> {
    let info = api.get_json("system/info", &[])?;
    let raw = info.get("version").and_then(Value::as_str).unwrap_or("");
    parse_minor_version(raw).ok_or_else(|| {
        ApiError {
            status: None,
            url: format!("{}/system/info.json", api.api_url()),
            body: format!("unrecognised server version '{raw}'"),
        }
        .into()
    })
}

fn parse_minor_version(raw: &str) -> Option<u32> {
    raw.trim_end_matches("-SNAPSHOT").split('.').nth(1)?.parse().ok()
}

pub fn api_root(base_url: &str, api_version: Option<u32>) -> String {
    let base = base_url.trim_end_matches('/');
    match api_version {
        Some(version) => format!("{base}/api/{version}"),
        None => format!("{base}/api"),
    }
}

pub fn endpoint_url(api_url: &str, endpoint: &str, format: Option<&str>) -> String {
    let endpoint = endpoint.trim_matches('/');
    match format {
        Some(format) => format!("{api_url}/{endpoint}.{format}"),
        None => format!("{api_url}/{endpoint}"),
    }
}

fn parse_optional_json(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or(Value::Null)
}

fn params_json(params: &Params<'_>) -> String {
    let pairs = params
        .iter()
        .map(|(key, value)| Value::Array(vec![Value::from(*key), Value::from(value.as_str())]))
        .collect::<Vec<_>>();
    Value::Array(pairs).to_string()
}

fn env_value_u64(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}
