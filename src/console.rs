//! Ad-hoc REST requests against arbitrary HTTP APIs.

use crate::config::{timeout, ConsoleConfig};
use crate::error::{HubError, Result};
use crate::record::{now_timestamp, value_kind};
use crate::types::{ApiCall, BoundedLog};
use log::{info, warn};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    fn sends_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully parsed request. Query is only sent with GET, the body only with
/// POST and PUT.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestSpec {
    pub fn parse(
        method: HttpMethod,
        url: &str,
        headers: Option<&str>,
        query: Option<&str>,
        body: Option<&str>,
    ) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(HubError::validation("URL must not be empty"));
        }

        let headers = parse_pairs("headers", headers)?;
        let query = if method == HttpMethod::Get {
            parse_pairs("query parameters", query)?
        } else {
            Vec::new()
        };
        let body = match body.filter(|b| !b.trim().is_empty()) {
            Some(raw) if method.sends_body() => Some(
                serde_json::from_str(raw)
                    .map_err(|e| HubError::validation(format!("JSON parsing error in body: {}", e)))?,
            ),
            _ => None,
        };

        Ok(Self {
            method,
            url: url.trim().to_string(),
            headers,
            query,
            body,
        })
    }
}

/// Flattens a JSON object of scalars into string pairs.
fn parse_pairs(what: &str, raw: Option<&str>) -> Result<Vec<(String, String)>> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(Vec::new()),
        Some(raw) => raw,
    };
    let map: Map<String, Value> = match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(HubError::validation(format!(
                "{} must be a JSON object, got {}",
                what,
                value_kind(&other)
            )))
        }
        Err(e) => return Err(HubError::validation(format!("JSON parsing error in {}: {}", what, e))),
    };

    map.into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k, s)),
            Value::Number(n) => Ok((k, n.to_string())),
            Value::Bool(b) => Ok((k, b.to_string())),
            other => Err(HubError::validation(format!(
                "{} value for '{}' must be a scalar, got {}",
                what,
                k,
                value_kind(&other)
            ))),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

/// Sends requests and remembers the successful JSON ones.
pub struct ApiConsole {
    http: reqwest::Client,
    history: BoundedLog<ApiCall>,
}

impl ApiConsole {
    pub fn new(config: &ConsoleConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout(config.timeout_secs) {
            builder = builder.timeout(t);
        }
        Ok(Self {
            http: builder.build()?,
            history: BoundedLog::new(config.history_size),
        })
    }

    pub fn history(&self) -> &BoundedLog<ApiCall> {
        &self.history
    }

    /// Continues a history saved by an earlier run.
    pub fn with_history(mut self, history: BoundedLog<ApiCall>) -> Self {
        self.history = history;
        self
    }

    /// 200 and 201 count as success; any other status is an error carrying
    /// the response text.
    pub async fn send(&mut self, spec: &RequestSpec) -> Result<ApiResponse> {
        let mut request = self.http.request(spec.method.to_reqwest(), &spec.url);
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        if let Some(ref body) = spec.body {
            request = request.json(body);
        }

        info!("{} {}", spec.method, spec.url);
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if status != 200 && status != 201 {
            warn!("{} {} returned {}", spec.method, spec.url, status);
            return Err(HubError::Status {
                method: spec.method.to_string(),
                url: spec.url.clone(),
                status,
                body: text,
            });
        }

        let body = match serde_json::from_str::<Value>(&text) {
            Ok(json) => {
                self.history.push(ApiCall {
                    timestamp: now_timestamp(),
                    method: spec.method.to_string(),
                    url: spec.url.clone(),
                    status_code: status,
                    response: json.clone(),
                });
                ResponseBody::Json(json)
            }
            Err(_) => ResponseBody::Text(text),
        };

        Ok(ApiResponse { status, body })
    }
}
