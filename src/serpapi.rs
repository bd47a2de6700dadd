use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchParams {
    pub engine: String,
    pub q: String,
    pub hl: String,
    pub gl: String,
    pub google_domain: String,
    pub lrad: u32,
    pub location: String,
    pub start: u32,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("connection error: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("HTTP status {status}")]
    HttpStatus { status: u16, body: Option<Value> },

    #[error("request failed: {0}")]
    Other(String),
}

impl SearchError {
    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::Network(_) => "network",
            SearchError::Timeout(_) => "timeout",
            SearchError::HttpStatus { .. } => "http_status",
            SearchError::Other(_) => "other",
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SearchError::Timeout(err.to_string())
        } else if err.is_connect() {
            SearchError::Network(err.to_string())
        } else {
            SearchError::Other(err.to_string())
        }
    }
}

pub trait SearchClient: Send + Sync {
    fn search(&self, params: &SearchParams) -> Result<Value, SearchError>;
}

#[derive(Clone)]
pub struct SerpApiClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl SerpApiClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("jobs-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PipelineError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| PipelineError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

impl SearchClient for SerpApiClient {
    fn search(&self, params: &SearchParams) -> Result<Value, SearchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(params)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .map_err(SearchError::from_reqwest)?;

        let status = response.status();
        let text = response.text().map_err(SearchError::from_reqwest)?;
        if !status.is_success() {
            return Err(SearchError::HttpStatus {
                status: status.as_u16(),
                body: serde_json::from_str(&text).ok(),
            });
        }
        serde_json::from_str(&text)
            .map_err(|err| SearchError::Other(format!("invalid JSON response: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_serialize_as_query_pairs() {
        let params = SearchParams {
            engine: "google_jobs".to_string(),
            q: "Data Analyst".to_string(),
            hl: "de".to_string(),
            gl: "de".to_string(),
            google_domain: "google.de".to_string(),
            lrad: 25,
            location: "Bonn,North Rhine-Westphalia,Germany".to_string(),
            start: 10,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["start"], 10);
        assert_eq!(value["lrad"], 25);
        assert!(value.get("api_key").is_none());
    }

    #[test]
    fn error_kinds() {
        let err = SearchError::HttpStatus {
            status: 401,
            body: None,
        };
        assert_eq!(err.kind(), "http_status");
        assert_eq!(SearchError::Timeout("slow".to_string()).kind(), "timeout");
    }
}
