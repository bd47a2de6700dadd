use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoogleService {
    Storage,
    Warehouse,
}

impl GoogleService {
    fn transport_error(&self, message: String) -> PipelineError {
        match self {
            GoogleService::Storage => PipelineError::StorageHttp(message),
            GoogleService::Warehouse => PipelineError::WarehouseHttp(message),
        }
    }

    fn status_error(&self, status: u16, message: String) -> PipelineError {
        match self {
            GoogleService::Storage => PipelineError::StorageStatus { status, message },
            GoogleService::Warehouse => PipelineError::WarehouseStatus { status, message },
        }
    }
}

#[derive(Clone)]
pub struct GoogleHttp {
    client: Client,
    token: String,
    service: GoogleService,
}

impl GoogleHttp {
    pub fn new(token: &str, service: GoogleService) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("jobs-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| service.transport_error(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| service.transport_error(err.to_string()))?;
        Ok(Self {
            client,
            token: token.to_string(),
            service,
        })
    }

    pub fn get(&self, url: reqwest::Url) -> RequestBuilder {
        self.client.get(url).bearer_auth(&self.token)
    }

    pub fn post(&self, url: reqwest::Url) -> RequestBuilder {
        self.client.post(url).bearer_auth(&self.token)
    }

    pub fn handle_status(&self, response: Response) -> Result<Response, PipelineError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Google API request failed".to_string());
        Err(self.service.status_error(status, message))
    }

    pub fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, PipelineError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(self.service.transport_error(err.to_string()));
                }
            }
        }
    }
}

pub fn api_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, PipelineError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|err| PipelineError::InvalidConfig(format!("invalid API base {base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| PipelineError::InvalidConfig(format!("API base {base} cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
