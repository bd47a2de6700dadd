use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ResolvedWarehouse;
use crate::domain::WarehouseLocation;
use crate::error::PipelineError;
use crate::google::{GoogleHttp, GoogleService, api_url};
use crate::storage::{to_ndjson, write_bytes_atomic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: String,
}

impl FieldSchema {
    pub fn nullable(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            mode: "NULLABLE".to_string(),
        }
    }

    pub fn required(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            mode: "REQUIRED".to_string(),
        }
    }

    pub fn repeated(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            mode: "REPEATED".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: &str, table: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTable {
    SearchMetadata,
    SearchParameters,
    JobResults,
}

impl RawTable {
    pub const ALL: [RawTable; 3] = [
        RawTable::SearchMetadata,
        RawTable::SearchParameters,
        RawTable::JobResults,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RawTable::SearchMetadata => "search_metadata",
            RawTable::SearchParameters => "search_parameters",
            RawTable::JobResults => "job_results",
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            RawTable::SearchMetadata => "id",
            RawTable::SearchParameters | RawTable::JobResults => "search_id",
        }
    }

    pub fn schema(&self) -> Option<Vec<FieldSchema>> {
        match self {
            RawTable::SearchMetadata => Some(vec![
                FieldSchema::nullable("total_time_taken", "FLOAT"),
                FieldSchema::nullable("google_jobs_url", "STRING"),
                FieldSchema::nullable("raw_html_file", "STRING"),
                FieldSchema::nullable("status", "STRING"),
                FieldSchema::nullable("processed_at", "TIMESTAMP"),
                FieldSchema::nullable("created_at", "TIMESTAMP"),
                FieldSchema::nullable("json_endpoint", "STRING"),
                FieldSchema::nullable("id", "STRING"),
            ]),
            RawTable::SearchParameters => Some(vec![
                FieldSchema::nullable("search_id", "STRING"),
                FieldSchema::nullable("gl", "STRING"),
                FieldSchema::nullable("google_domain", "STRING"),
                FieldSchema::nullable("location_used", "STRING"),
                FieldSchema::nullable("start", "INTEGER"),
                FieldSchema::nullable("location_requested", "STRING"),
                FieldSchema::nullable("hl", "STRING"),
                FieldSchema::nullable("engine", "STRING"),
                FieldSchema::nullable("q", "STRING"),
            ]),
            RawTable::JobResults => None,
        }
    }

    pub fn table_ref(&self, dataset: &str) -> TableRef {
        TableRef::new(dataset, self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    Append,
    Truncate,
}

impl WriteDisposition {
    fn as_bigquery(&self) -> &'static str {
        match self {
            WriteDisposition::Append => "WRITE_APPEND",
            WriteDisposition::Truncate => "WRITE_TRUNCATE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub table: TableRef,
    pub source_uri: String,
    pub schema: Option<Vec<FieldSchema>>,
    pub write: WriteDisposition,
}

pub trait Warehouse: Send + Sync {
    fn ensure_dataset(&self, dataset: &str) -> Result<(), PipelineError>;
    fn ensure_table(&self, table: &TableRef, schema: &[FieldSchema]) -> Result<(), PipelineError>;
    fn distinct_values(
        &self,
        table: &TableRef,
        column: &str,
    ) -> Result<BTreeSet<String>, PipelineError>;
    fn load(&self, request: &LoadRequest) -> Result<(), PipelineError>;
    fn job_result_records(&self, raw_dataset: &str) -> Result<Vec<Map<String, Value>>, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct LocalWarehouse {
    root: Utf8PathBuf,
}

impl LocalWarehouse {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn table_path(&self, table: &TableRef) -> Utf8PathBuf {
        self.root
            .join(&table.dataset)
            .join(format!("{}.ndjson", table.table))
    }

    pub fn read_table(&self, table: &TableRef) -> Result<Vec<Map<String, Value>>, PipelineError> {
        let path = self.table_path(table);
        if !path.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("read {path}: {err}")))?;
        parse_records(&content).map_err(|err| PipelineError::Serialization(format!("{path}: {err}")))
    }
}

impl Warehouse for LocalWarehouse {
    fn ensure_dataset(&self, dataset: &str) -> Result<(), PipelineError> {
        let dir = self.root.join(dataset);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("create {dir}: {err}")))
    }

    fn ensure_table(&self, table: &TableRef, _schema: &[FieldSchema]) -> Result<(), PipelineError> {
        let path = self.table_path(table);
        if !path.as_std_path().exists() {
            write_bytes_atomic(&path, b"")?;
            info!(table = %table, "created table");
        }
        Ok(())
    }

    fn distinct_values(
        &self,
        table: &TableRef,
        column: &str,
    ) -> Result<BTreeSet<String>, PipelineError> {
        Ok(self
            .read_table(table)?
            .iter()
            .filter_map(|record| record.get(column))
            .filter_map(|value| match value {
                Value::String(text) => Some(text.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect())
    }

    fn load(&self, request: &LoadRequest) -> Result<(), PipelineError> {
        if request.source_uri.starts_with("gs://") {
            return Err(PipelineError::InvalidConfig(format!(
                "local warehouse cannot read {}",
                request.source_uri
            )));
        }
        let content = fs::read_to_string(&request.source_uri).map_err(|err| {
            PipelineError::Filesystem(format!("read {}: {err}", request.source_uri))
        })?;
        let incoming = parse_records(&content)
            .map_err(|err| PipelineError::Serialization(format!("{}: {err}", request.source_uri)))?;
        let incoming = match &request.schema {
            Some(schema) => incoming
                .into_iter()
                .map(|record| project(record, schema))
                .collect(),
            None => incoming,
        };

        let mut rows = match request.write {
            WriteDisposition::Append => self.read_table(&request.table)?,
            WriteDisposition::Truncate => Vec::new(),
        };
        let loaded = incoming.len();
        rows.extend(incoming);
        write_bytes_atomic(&self.table_path(&request.table), &to_ndjson(&rows)?)?;
        info!(table = %request.table, rows = loaded, source = %request.source_uri, "loaded rows");
        Ok(())
    }

    fn job_result_records(&self, raw_dataset: &str) -> Result<Vec<Map<String, Value>>, PipelineError> {
        let metadata = self.read_table(&RawTable::SearchMetadata.table_ref(raw_dataset))?;
        let parameters = self.read_table(&RawTable::SearchParameters.table_ref(raw_dataset))?;
        let jobs = self.read_table(&RawTable::JobResults.table_ref(raw_dataset))?;

        let metadata_by_id = index_by(&metadata, "id");
        let parameters_by_id = index_by(&parameters, "search_id");

        let mut joined = Vec::new();
        for job in jobs {
            let Some(search_id) = job.get("search_id").and_then(Value::as_str) else {
                continue;
            };
            let (Some(meta), Some(params)) =
                (metadata_by_id.get(search_id), parameters_by_id.get(search_id))
            else {
                continue;
            };
            let mut record = job;
            for (column, source) in [("created_at", meta), ("google_jobs_url", meta), ("q", params)] {
                record.insert(
                    column.to_string(),
                    source.get(column).cloned().unwrap_or(Value::Null),
                );
            }
            joined.push(record);
        }
        Ok(joined)
    }
}

fn index_by<'a>(
    records: &'a [Map<String, Value>],
    column: &str,
) -> HashMap<&'a str, &'a Map<String, Value>> {
    records
        .iter()
        .filter_map(|record| {
            record
                .get(column)
                .and_then(Value::as_str)
                .map(|key| (key, record))
        })
        .collect()
}

fn project(record: Map<String, Value>, schema: &[FieldSchema]) -> Map<String, Value> {
    schema
        .iter()
        .map(|field| {
            (
                field.name.clone(),
                record.get(&field.name).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

fn parse_records(content: &str) -> Result<Vec<Map<String, Value>>, serde_json::Error> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => return Ok(vec![map]),
        Ok(Value::Array(items)) => {
            return Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect());
        }
        _ => {}
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str::<Map<String, Value>>)
        .collect()
}

#[derive(Clone)]
pub struct BigQueryWarehouse {
    http: GoogleHttp,
    project: String,
    region: Option<String>,
    poll_interval: Duration,
    poll_timeout: Option<Duration>,
    base_url: String,
}

impl BigQueryWarehouse {
    pub fn new(
        project: &str,
        access_token: &str,
        settings: &ResolvedWarehouse,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            http: GoogleHttp::new(access_token, GoogleService::Warehouse)?,
            project: project.to_string(),
            region: settings.region.clone(),
            poll_interval: settings.poll_interval,
            poll_timeout: settings.poll_timeout,
            base_url: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, PipelineError> {
        let mut all = vec!["projects", self.project.as_str()];
        all.extend_from_slice(segments);
        api_url(&self.base_url, &all)
    }

    fn post_json(&self, url: reqwest::Url, body: &Value) -> Result<reqwest::blocking::Response, PipelineError> {
        self.http
            .send_with_retries(|| self.http.post(url.clone()).json(body))
    }

    fn create_if_missing(&self, url: reqwest::Url, body: &Value) -> Result<(), PipelineError> {
        let response = self.post_json(url, body)?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        self.http.handle_status(response)?;
        Ok(())
    }

    fn job_url(&self, job_id: &str, location: Option<&str>) -> Result<reqwest::Url, PipelineError> {
        let mut url = self.url(&["jobs", job_id])?;
        if let Some(location) = location {
            url.query_pairs_mut().append_pair("location", location);
        }
        Ok(url)
    }

    fn wait_for_job(&self, job_id: &str, location: Option<&str>) -> Result<(), PipelineError> {
        let started = Instant::now();
        loop {
            let url = self.job_url(job_id, location)?;
            let response = self.http.send_with_retries(|| self.http.get(url.clone()))?;
            let job: Value = self
                .http
                .handle_status(response)?
                .json()
                .map_err(|err| PipelineError::WarehouseHttp(err.to_string()))?;
            let status = &job["status"];
            if status["state"].as_str() == Some("DONE") {
                if let Some(error) = status.get("errorResult") {
                    return Err(PipelineError::LoadJobFailed {
                        job_id: job_id.to_string(),
                        message: error["message"]
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| error.to_string()),
                    });
                }
                return Ok(());
            }
            if let Some(timeout) = self.poll_timeout {
                if started.elapsed() >= timeout {
                    return Err(PipelineError::LoadJobTimeout(job_id.to_string()));
                }
            }
            debug!(job_id, state = ?status["state"], "waiting for job");
            thread::sleep(self.poll_interval);
        }
    }

    pub fn query(&self, sql: &str) -> Result<Vec<Map<String, Value>>, PipelineError> {
        let mut body = json!({"query": sql, "useLegacySql": false});
        if let Some(region) = &self.region {
            body["location"] = json!(region);
        }
        let response = self.post_json(self.url(&["queries"])?, &body)?;
        let mut page: Value = self
            .http
            .handle_status(response)?
            .json()
            .map_err(|err| PipelineError::WarehouseHttp(err.to_string()))?;

        let job_id = page["jobReference"]["jobId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::WarehouseHttp("query response without job id".to_string()))?;
        let location = page["jobReference"]["location"].as_str().map(str::to_string);

        let mut rows = Vec::new();
        loop {
            let complete = page["jobComplete"].as_bool().unwrap_or(false);
            if complete {
                let fields = page["schema"]["fields"].as_array().cloned().unwrap_or_default();
                if let Some(page_rows) = page["rows"].as_array() {
                    rows.extend(page_rows.iter().map(|row| decode_row(&fields, row)));
                }
            }
            let page_token = page["pageToken"].as_str().map(str::to_string);
            if complete && page_token.is_none() {
                break;
            }
            if !complete {
                thread::sleep(self.poll_interval);
            }

            let mut url = self.url(&["queries", job_id.as_str()])?;
            {
                let mut query = url.query_pairs_mut();
                if let Some(location) = &location {
                    query.append_pair("location", location);
                }
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let response = self.http.send_with_retries(|| self.http.get(url.clone()))?;
            page = self
                .http
                .handle_status(response)?
                .json()
                .map_err(|err| PipelineError::WarehouseHttp(err.to_string()))?;
        }
        Ok(rows)
    }

    fn qualified(&self, table: &TableRef) -> String {
        format!("`{}.{}.{}`", self.project, table.dataset, table.table)
    }
}

impl Warehouse for BigQueryWarehouse {
    fn ensure_dataset(&self, dataset: &str) -> Result<(), PipelineError> {
        let mut body = json!({
            "datasetReference": {"projectId": self.project, "datasetId": dataset}
        });
        if let Some(region) = &self.region {
            body["location"] = json!(region);
        }
        self.create_if_missing(self.url(&["datasets"])?, &body)?;
        info!(project = %self.project, dataset, "dataset ready");
        Ok(())
    }

    fn ensure_table(&self, table: &TableRef, schema: &[FieldSchema]) -> Result<(), PipelineError> {
        self.ensure_dataset(&table.dataset)?;
        let body = json!({
            "tableReference": {
                "projectId": self.project,
                "datasetId": table.dataset,
                "tableId": table.table,
            },
            "schema": {"fields": schema},
        });
        self.create_if_missing(self.url(&["datasets", table.dataset.as_str(), "tables"])?, &body)?;
        info!(table = %table, "table ready");
        Ok(())
    }

    fn distinct_values(
        &self,
        table: &TableRef,
        column: &str,
    ) -> Result<BTreeSet<String>, PipelineError> {
        let sql = format!("SELECT DISTINCT {column} FROM {}", self.qualified(table));
        let rows = match self.query(&sql) {
            Ok(rows) => rows,
            Err(PipelineError::WarehouseStatus { status: 404, .. }) => {
                warn!(table = %table, "table not found, treating as empty");
                return Ok(BTreeSet::new());
            }
            Err(err) => return Err(err),
        };
        Ok(rows
            .iter()
            .filter_map(|row| row.get(column).and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    fn load(&self, request: &LoadRequest) -> Result<(), PipelineError> {
        if !request.source_uri.starts_with("gs://") {
            return Err(PipelineError::InvalidConfig(format!(
                "BigQuery loads need a gs:// source, got {}",
                request.source_uri
            )));
        }
        let mut load = json!({
            "sourceUris": [request.source_uri],
            "destinationTable": {
                "projectId": self.project,
                "datasetId": request.table.dataset,
                "tableId": request.table.table,
            },
            "sourceFormat": "NEWLINE_DELIMITED_JSON",
            "createDisposition": "CREATE_IF_NEEDED",
            "writeDisposition": request.write.as_bigquery(),
        });
        match &request.schema {
            Some(schema) => {
                load["schema"] = json!({"fields": schema});
                load["ignoreUnknownValues"] = json!(true);
            }
            None => load["autodetect"] = json!(true),
        }
        // one job id for every attempt; a repeated insert answers 409
        let job_id = load_job_id(&request.table);
        let mut job_reference = json!({"projectId": self.project, "jobId": job_id});
        if let Some(region) = &self.region {
            job_reference["location"] = json!(region);
        }
        let body = json!({"jobReference": job_reference, "configuration": {"load": load}});

        let response = self.post_json(self.url(&["jobs"])?, &body)?;
        let location = if response.status() == reqwest::StatusCode::CONFLICT {
            info!(job_id = %job_id, table = %request.table, "load job already submitted");
            self.region.clone()
        } else {
            let job: Value = self
                .http
                .handle_status(response)?
                .json()
                .map_err(|err| PipelineError::WarehouseHttp(err.to_string()))?;
            job["jobReference"]["location"]
                .as_str()
                .map(str::to_string)
                .or_else(|| self.region.clone())
        };
        info!(job_id = %job_id, table = %request.table, source = %request.source_uri, "load job started");

        self.wait_for_job(&job_id, location.as_deref())?;
        info!(job_id = %job_id, table = %request.table, "load job finished");
        Ok(())
    }

    fn job_result_records(&self, raw_dataset: &str) -> Result<Vec<Map<String, Value>>, PipelineError> {
        let sql = format!(
            "SELECT jr.*, sm.created_at, sm.google_jobs_url, sp.q \
             FROM {} jr \
             JOIN {} sm ON jr.search_id = sm.id \
             JOIN {} sp ON jr.search_id = sp.search_id",
            self.qualified(&RawTable::JobResults.table_ref(raw_dataset)),
            self.qualified(&RawTable::SearchMetadata.table_ref(raw_dataset)),
            self.qualified(&RawTable::SearchParameters.table_ref(raw_dataset)),
        );
        self.query(&sql)
    }
}

fn load_job_id(table: &TableRef) -> String {
    format!("load_{}_{}_{}", table.dataset, table.table, Uuid::new_v4().simple())
}

pub fn decode_row(fields: &[Value], row: &Value) -> Map<String, Value> {
    let cells = row["f"].as_array().map(Vec::as_slice).unwrap_or_default();
    fields
        .iter()
        .zip(cells)
        .filter_map(|(field, cell)| {
            let name = field["name"].as_str()?;
            Some((name.to_string(), decode_cell(field, &cell["v"])))
        })
        .collect()
}

fn decode_cell(field: &Value, value: &Value) -> Value {
    if field["mode"].as_str() == Some("REPEATED") {
        return match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| decode_scalar(field, &item["v"]))
                    .collect(),
            ),
            _ => Value::Array(Vec::new()),
        };
    }
    decode_scalar(field, value)
}

fn decode_scalar(field: &Value, value: &Value) -> Value {
    let Value::String(text) = value else {
        return match field["type"].as_str() {
            Some("RECORD" | "STRUCT") if value.is_object() => {
                let fields = field["fields"].as_array().cloned().unwrap_or_default();
                Value::Object(decode_row(&fields, value))
            }
            _ => value.clone(),
        };
    };
    match field["type"].as_str().unwrap_or_default() {
        "INTEGER" | "INT64" => text.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
        "FLOAT" | "FLOAT64" | "NUMERIC" => text.parse::<f64>().map(Value::from).unwrap_or(Value::Null),
        "BOOLEAN" | "BOOL" => Value::Bool(text.eq_ignore_ascii_case("true")),
        "JSON" => serde_json::from_str(text).unwrap_or_else(|_| value.clone()),
        _ => value.clone(),
    }
}

pub enum WarehouseBackend {
    Local(LocalWarehouse),
    BigQuery(BigQueryWarehouse),
}

impl WarehouseBackend {
    pub fn from_settings(
        settings: &ResolvedWarehouse,
        project: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<Self, PipelineError> {
        match settings.location {
            WarehouseLocation::Local => Ok(WarehouseBackend::Local(LocalWarehouse::new(
                settings.local_root.clone(),
            ))),
            WarehouseLocation::Bigquery => {
                let project = project
                    .ok_or_else(|| PipelineError::MissingCredential("GCP_PROJECT".to_string()))?;
                let token = access_token.ok_or_else(|| {
                    PipelineError::MissingCredential("GCP_ACCESS_TOKEN".to_string())
                })?;
                Ok(WarehouseBackend::BigQuery(BigQueryWarehouse::new(
                    project, token, settings,
                )?))
            }
        }
    }
}

impl Warehouse for WarehouseBackend {
    fn ensure_dataset(&self, dataset: &str) -> Result<(), PipelineError> {
        match self {
            WarehouseBackend::Local(warehouse) => warehouse.ensure_dataset(dataset),
            WarehouseBackend::BigQuery(warehouse) => warehouse.ensure_dataset(dataset),
        }
    }

    fn ensure_table(&self, table: &TableRef, schema: &[FieldSchema]) -> Result<(), PipelineError> {
        match self {
            WarehouseBackend::Local(warehouse) => warehouse.ensure_table(table, schema),
            WarehouseBackend::BigQuery(warehouse) => warehouse.ensure_table(table, schema),
        }
    }

    fn distinct_values(
        &self,
        table: &TableRef,
        column: &str,
    ) -> Result<BTreeSet<String>, PipelineError> {
        match self {
            WarehouseBackend::Local(warehouse) => warehouse.distinct_values(table, column),
            WarehouseBackend::BigQuery(warehouse) => warehouse.distinct_values(table, column),
        }
    }

    fn load(&self, request: &LoadRequest) -> Result<(), PipelineError> {
        match self {
            WarehouseBackend::Local(warehouse) => warehouse.load(request),
            WarehouseBackend::BigQuery(warehouse) => warehouse.load(request),
        }
    }

    fn job_result_records(&self, raw_dataset: &str) -> Result<Vec<Map<String, Value>>, PipelineError> {
        match self {
            WarehouseBackend::Local(warehouse) => warehouse.job_result_records(raw_dataset),
            WarehouseBackend::BigQuery(warehouse) => warehouse.job_result_records(raw_dataset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_row_with_repeated_and_typed_cells() {
        let fields = vec![
            json!({"name": "title", "type": "STRING", "mode": "NULLABLE"}),
            json!({"name": "start", "type": "INTEGER", "mode": "NULLABLE"}),
            json!({"name": "extensions", "type": "STRING", "mode": "REPEATED"}),
            json!({"name": "created_at", "type": "TIMESTAMP", "mode": "NULLABLE"}),
        ];
        let row = json!({"f": [
            {"v": "Data Analyst"},
            {"v": "10"},
            {"v": [{"v": "Vollzeit"}, {"v": "vor 3 Tagen"}]},
            {"v": "1.7048448E9"}
        ]});
        let decoded = decode_row(&fields, &row);
        assert_eq!(decoded["title"], "Data Analyst");
        assert_eq!(decoded["start"], 10);
        assert_eq!(decoded["extensions"], json!(["Vollzeit", "vor 3 Tagen"]));
        assert_eq!(decoded["created_at"], "1.7048448E9");
    }

    #[test]
    fn parse_records_accepts_documents_and_lines() {
        assert_eq!(parse_records(r#"{"id": "a"}"#).unwrap().len(), 1);
        assert_eq!(parse_records("{\"id\": \"a\"}\n{\"id\": \"b\"}\n").unwrap().len(), 2);
        assert_eq!(parse_records(r#"[{"id": "a"}, {"id": "b"}]"#).unwrap().len(), 2);
        assert!(parse_records("  ").unwrap().is_empty());
    }

    fn fake_bigquery(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, thread::JoinHandle<Vec<(String, String)>>) {
        use std::io::{BufRead, BufReader, Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/bigquery/v2", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                let mut content_length = 0;
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    if header.trim().is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut request_body = vec![0; content_length];
                reader.read_exact(&mut request_body).unwrap();
                let target = request_line.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
                requests.push((target, String::from_utf8(request_body).unwrap()));

                write!(
                    stream,
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
            }
            requests
        });
        (base, handle)
    }

    fn bigquery(base_url: String) -> BigQueryWarehouse {
        let settings = ResolvedWarehouse {
            location: WarehouseLocation::Bigquery,
            local_root: Utf8PathBuf::from("unused"),
            raw_dataset: "raw".to_string(),
            final_dataset: "final".to_string(),
            final_table: "job_results".to_string(),
            region: Some("EU".to_string()),
            poll_interval: Duration::from_millis(10),
            poll_timeout: Some(Duration::from_secs(5)),
        };
        let mut warehouse = BigQueryWarehouse::new("p", "token", &settings).unwrap();
        warehouse.base_url = base_url;
        warehouse
    }

    #[test]
    fn load_job_ids_are_unique_per_call() {
        let table = RawTable::JobResults.table_ref("raw");
        let first = load_job_id(&table);
        assert!(first.starts_with("load_raw_job_results_"));
        assert_ne!(first, load_job_id(&table));
    }

    #[test]
    fn resubmitted_load_job_polls_the_existing_job() {
        let (base, server) = fake_bigquery(vec![
            (409, r#"{"error": {"code": 409, "message": "Already Exists"}}"#),
            (200, r#"{"status": {"state": "DONE"}}"#),
        ]);
        bigquery(base)
            .load(&LoadRequest {
                table: RawTable::JobResults.table_ref("raw"),
                source_uri: "gs://serpapi_jobs/data/processed/job_results_abc.json".to_string(),
                schema: None,
                write: WriteDisposition::Append,
            })
            .unwrap();

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, "POST /bigquery/v2/projects/p/jobs");
        let body: Value = serde_json::from_str(&requests[0].1).unwrap();
        let job_id = body["jobReference"]["jobId"].as_str().unwrap();
        assert!(job_id.starts_with("load_raw_job_results_"));
        assert_eq!(body["jobReference"]["location"], "EU");
        assert_eq!(
            requests[1].0,
            format!("GET /bigquery/v2/projects/p/jobs/{job_id}?location=EU")
        );
    }

    #[test]
    fn metadata_is_keyed_by_id() {
        assert_eq!(RawTable::SearchMetadata.id_column(), "id");
        assert_eq!(RawTable::JobResults.id_column(), "search_id");
        assert!(RawTable::JobResults.schema().is_none());
    }
}
