use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SaveLocation {
    Local,
    Gcs,
}

impl fmt::Display for SaveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveLocation::Local => write!(f, "local"),
            SaveLocation::Gcs => write!(f, "gcs"),
        }
    }
}

impl FromStr for SaveLocation {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "local" => Ok(SaveLocation::Local),
            "gcs" => Ok(SaveLocation::Gcs),
            _ => Err(PipelineError::InvalidSaveLocation(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseLocation {
    Local,
    Bigquery,
}

impl fmt::Display for WarehouseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarehouseLocation::Local => write!(f, "local"),
            WarehouseLocation::Bigquery => write!(f, "bigquery"),
        }
    }
}

impl FromStr for WarehouseLocation {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "local" => Ok(WarehouseLocation::Local),
            "bigquery" => Ok(WarehouseLocation::Bigquery),
            _ => Err(PipelineError::InvalidWarehouseLocation(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupKeep {
    Earliest,
    Latest,
}

impl FromStr for DedupKeep {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "earliest" => Ok(DedupKeep::Earliest),
            "latest" => Ok(DedupKeep::Latest),
            _ => Err(PipelineError::InvalidDedupRule(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchId(String);

impl SearchId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SearchId {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        // ids end up as the last `_`-separated segment of a file stem
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
        if !is_valid {
            return Err(PipelineError::InvalidSearchId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStatus {
    Success,
    Error,
    Other(String),
}

impl SearchStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SearchStatus::Success)
    }
}

impl From<&str> for SearchStatus {
    fn from(value: &str) -> Self {
        match value {
            "Success" => SearchStatus::Success,
            "Error" => SearchStatus::Error,
            other => SearchStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchStatus::Success => write!(f, "Success"),
            SearchStatus::Error => write!(f, "Error"),
            SearchStatus::Other(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub search_id: SearchId,
    pub status: SearchStatus,
    pub search_metadata: Map<String, Value>,
    pub search_parameters: Map<String, Value>,
    pub jobs_results: Vec<Value>,
}

impl SearchResponse {
    pub fn from_value(value: &Value) -> Result<Self, PipelineError> {
        let search_metadata = value
            .get("search_metadata")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| PipelineError::MalformedResponse("missing search_metadata".to_string()))?;
        let search_id = search_metadata
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::MalformedResponse("missing search_metadata.id".to_string()))?
            .parse::<SearchId>()?;
        let status = search_metadata
            .get("status")
            .and_then(Value::as_str)
            .map(SearchStatus::from)
            .unwrap_or_else(|| SearchStatus::Other(String::new()));
        let search_parameters = value
            .get("search_parameters")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let jobs_results = value
            .get("jobs_results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            search_id,
            status,
            search_metadata,
            search_parameters,
            jobs_results,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdentity {
    pub htidocid: String,
    pub job_title: Option<String>,
}

impl JobIdentity {
    pub fn decode(job_id: &str) -> Result<Self, PipelineError> {
        let trimmed = job_id.trim();
        let value = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) if value.is_object() => value,
            _ => decode_base64_json(trimmed)
                .ok_or_else(|| PipelineError::InvalidJobId(job_id.to_string()))?,
        };
        let htidocid = value
            .get("htidocid")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PipelineError::InvalidJobId(format!("missing htidocid in {job_id}")))?
            .to_string();
        let job_title = value
            .get("job_title")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            htidocid,
            job_title,
        })
    }
}

fn decode_base64_json(value: &str) -> Option<Value> {
    let bytes = STANDARD
        .decode(value)
        .or_else(|_| URL_SAFE.decode(value))
        .ok()?;
    serde_json::from_slice::<Value>(&bytes)
        .ok()
        .filter(Value::is_object)
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub search_id: String,
    pub job_id: String,
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub via: Option<String>,
    pub description: String,
    pub extensions: Vec<Value>,
    pub created_at: DateTime<Utc>,
    pub google_jobs_url: Option<String>,
    pub query: Option<String>,
}

impl JobRow {
    pub fn from_record(record: &Map<String, Value>) -> Result<Self, PipelineError> {
        let job_id = string_field(record, "job_id")
            .ok_or_else(|| PipelineError::InvalidJobId("missing job_id".to_string()))?;
        let search_id = string_field(record, "search_id").ok_or_else(|| {
            PipelineError::MalformedResponse(format!("job {job_id} has no search_id"))
        })?;
        let created_at = record
            .get("created_at")
            .ok_or_else(|| PipelineError::InvalidTimestamp(format!("job {job_id} has no created_at")))
            .and_then(timestamp_from_value)?;
        let extensions = match record.get("extensions") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(PipelineError::UnexpectedType {
                    field: "extensions".to_string(),
                    expected: "an array",
                });
            }
        };

        Ok(Self {
            search_id,
            job_id,
            title: string_field(record, "title"),
            company_name: string_field(record, "company_name"),
            location: string_field(record, "location"),
            via: string_field(record, "via"),
            description: string_field(record, "description").unwrap_or_default(),
            extensions,
            created_at,
            google_jobs_url: string_field(record, "google_jobs_url"),
            query: string_field(record, "q"),
        })
    }
}

fn string_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_string)
}

pub fn timestamp_from_value(value: &Value) -> Result<DateTime<Utc>, PipelineError> {
    match value {
        Value::String(text) => parse_timestamp(text),
        Value::Number(number) => number
            .as_f64()
            .and_then(epoch_seconds)
            .ok_or_else(|| PipelineError::InvalidTimestamp(number.to_string())),
        other => Err(PipelineError::InvalidTimestamp(other.to_string())),
    }
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, PipelineError> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let without_zone = trimmed.trim_end_matches(" UTC");
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(without_zone, format) {
            return Ok(parsed.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(without_zone, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(epoch_seconds)
        .ok_or_else(|| PipelineError::InvalidTimestamp(value.to_string()))
}

fn epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}
