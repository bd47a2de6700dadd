use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("save_location must be one of [\"local\", \"gcs\"], instead got: '{0}'")]
    InvalidSaveLocation(String),

    #[error("warehouse location must be one of [\"local\", \"bigquery\"], instead got: '{0}'")]
    InvalidWarehouseLocation(String),

    #[error("dedup_keep must be one of [\"earliest\", \"latest\"], instead got: '{0}'")]
    InvalidDedupRule(String),

    #[error("invalid regex pattern: {0}")]
    InvalidRegex(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("search API request failed: {0}")]
    SearchHttp(String),

    #[error("storage request failed: {0}")]
    StorageHttp(String),

    #[error("storage returned status {status}: {message}")]
    StorageStatus { status: u16, message: String },

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("warehouse request failed: {0}")]
    WarehouseHttp(String),

    #[error("warehouse returned status {status}: {message}")]
    WarehouseStatus { status: u16, message: String },

    #[error("load job {job_id} failed: {message}")]
    LoadJobFailed { job_id: String, message: String },

    #[error("load job {0} did not finish before the poll timeout")]
    LoadJobTimeout(String),

    #[error("invalid search id: {0}")]
    InvalidSearchId(String),

    #[error("malformed search response: {0}")]
    MalformedResponse(String),

    #[error("expected {expected} for {field}")]
    UnexpectedType {
        field: String,
        expected: &'static str,
    },

    #[error("invalid job_id: {0}")]
    InvalidJobId(String),

    #[error("invalid keyword list for category {category}: {reason}")]
    InvalidKeywords { category: String, reason: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to write CSV: {0}")]
    Csv(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
