use crate::config::{timeout, HubConfig};
use crate::error::{HubError, Result};
use crate::record::value_kind;
use log::debug;
use rand::Rng;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::path::Path;

/// Client for the hub's own `/sensor/*` endpoints.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
}

impl HubClient {
    pub fn new(config: &HubConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout(config.timeout_secs) {
            builder = builder.timeout(t);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<reqwest::Response> {
        let url = self.url(path);
        debug!("{} {}", method, url);
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn into_json(method: &str, url: String, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(HubError::Status {
                method: method.to_string(),
                url,
                status: status.as_u16(),
                body: error_message(&text),
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn json(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let response = self.call(method.clone(), path, body).await?;
        Self::into_json(method.as_str(), self.url(path), response).await
    }

    /// Like `json`, but a 404 is an empty result rather than an error.
    async fn optional_json(&self, path: &str) -> Result<Option<Value>> {
        let response = self.call(Method::GET, path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::into_json("GET", self.url(path), response).await.map(Some)
    }

    pub async fn status(&self) -> Result<Value> {
        self.json(Method::GET, "/sensor/status", None).await
    }

    pub async fn latest(&self) -> Result<Option<Value>> {
        self.optional_json("/sensor/latest").await
    }

    pub async fn send(&self, payload: &Value) -> Result<Value> {
        self.json(Method::POST, "/sensor/data", Some(payload)).await
    }

    pub async fn readings(&self, page: Option<usize>, per_page: usize) -> Result<Value> {
        let path = match page {
            Some(page) => format!("/sensor/readings?page={}&per_page={}", page, per_page),
            None => format!("/sensor/readings?per_page={}", per_page),
        };
        self.json(Method::GET, &path, None).await
    }

    pub async fn stats(&self) -> Result<Option<Value>> {
        self.optional_json("/sensor/stats").await
    }

    pub async fn activity(&self) -> Result<Value> {
        self.json(Method::GET, "/sensor/activity", None).await
    }

    pub async fn export_csv(&self) -> Result<String> {
        let url = self.url("/sensor/export");
        let response = self.call(Method::GET, "/sensor/export", None).await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(HubError::Status {
                method: "GET".to_string(),
                url,
                status: status.as_u16(),
                body: error_message(&text),
            });
        }
        Ok(text)
    }

    pub async fn clear(&self) -> Result<Value> {
        self.json(Method::DELETE, "/sensor/readings", None).await
    }
}

/// The hub's `error`/`message` field when present, else the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Parses a payload argument: inline JSON, or `@path` naming a JSON file.
/// The payload must be a non-empty JSON object.
pub fn parse_payload(arg: &str) -> Result<Value> {
    let raw = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))?,
        None => arg.to_string(),
    };
    let value: Value =
        serde_json::from_str(&raw).map_err(|e| HubError::validation(format!("Invalid JSON format: {}", e)))?;
    match &value {
        Value::Object(map) if !map.is_empty() => Ok(value),
        Value::Object(_) => Err(HubError::validation("No data to send")),
        other => Err(HubError::validation(format!(
            "Expected a JSON object, got {}",
            value_kind(other)
        ))),
    }
}

/// A plausible test reading: temperature, humidity, pressure, light and a
/// `TEST_nnn` sensor id.
pub fn random_payload<R: Rng + ?Sized>(rng: &mut R) -> Value {
    json!({
        "temperature": round_to(rng.gen_range(20.0..=30.0), 2),
        "humidity": round_to(rng.gen_range(40.0..=80.0), 2),
        "pressure": round_to(rng.gen_range(1000.0..=1020.0), 2),
        "light": round_to(rng.gen_range(0.0..=1000.0), 1),
        "sensor_id": format!("TEST_{}", rng.gen_range(100..=999)),
    })
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
