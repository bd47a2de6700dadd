use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{ApiConfig, QueryGrid};
use crate::domain::SearchResponse;
use crate::error::PipelineError;
use crate::flows::{ItemFailure, ProgressEvent, ProgressSink};
use crate::serpapi::{SearchClient, SearchError, SearchParams};
use crate::storage::{FilePersistence, ObjectStore};

#[derive(Debug, Clone, Copy, Default)]
pub struct CollectOptions {
    pub stop_on_error: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectedSearch {
    pub search_id: String,
    pub status: String,
    pub query: String,
    pub location: String,
    pub start: u32,
    pub path: String,
    pub job_results: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectReport {
    pub requested: usize,
    pub successful: Vec<CollectedSearch>,
    pub errors: Vec<CollectedSearch>,
    pub failures: Vec<ItemFailure>,
}

enum Outcome {
    Persisted { search: CollectedSearch, success: bool },
    Failed(ItemFailure),
}

pub struct CollectFlow<'a, C: SearchClient, S: ObjectStore> {
    client: &'a C,
    persistence: &'a FilePersistence<S>,
    api: &'a ApiConfig,
    grid: &'a QueryGrid,
}

impl<'a, C: SearchClient, S: ObjectStore> CollectFlow<'a, C, S> {
    pub fn new(
        client: &'a C,
        persistence: &'a FilePersistence<S>,
        api: &'a ApiConfig,
        grid: &'a QueryGrid,
    ) -> Self {
        Self {
            client,
            persistence,
            api,
            grid,
        }
    }

    pub fn run(
        &self,
        options: CollectOptions,
        sink: &dyn ProgressSink,
    ) -> Result<CollectReport, PipelineError> {
        let combinations = self.grid.combinations();
        let total = combinations.len();
        let mut report = CollectReport::default();

        for (index, (query, location, start)) in combinations.into_iter().enumerate() {
            sink.event(ProgressEvent::phase(
                "Collect",
                format!("{}/{total} {query} @ {location} start={start}", index + 1),
            ));
            let params = self.api.params_for(&query, &location, start);
            report.requested += 1;

            match self.collect_one(&params) {
                Outcome::Persisted {
                    search,
                    success: true,
                } => report.successful.push(search),
                Outcome::Persisted { search, .. } => {
                    let message = format!("search {} returned status {}", search.search_id, search.status);
                    report.errors.push(search);
                    if options.stop_on_error {
                        return Err(PipelineError::SearchHttp(message));
                    }
                }
                Outcome::Failed(failure) => {
                    let message = format!("{}: {}", failure.item, failure.message);
                    report.failures.push(failure);
                    if options.stop_on_error {
                        return Err(PipelineError::SearchHttp(message));
                    }
                }
            }
        }

        info!(
            requested = report.requested,
            successful = report.successful.len(),
            errors = report.errors.len(),
            failures = report.failures.len(),
            "collection finished"
        );
        Ok(report)
    }

    fn collect_one(&self, params: &SearchParams) -> Outcome {
        let item = format!("{} @ {} start={}", params.q, params.location, params.start);
        let body = match self.client.search(params) {
            Ok(body) => body,
            // the API reports its own failures inside the body
            Err(SearchError::HttpStatus {
                status,
                body: Some(body),
            }) if body.get("search_metadata").is_some() => {
                warn!(status, query = %params.q, location = %params.location, "search returned HTTP error with metadata");
                body
            }
            Err(err) => {
                error!(kind = err.kind(), error = %err, query = %params.q, location = %params.location, start = params.start, "search request failed");
                return Outcome::Failed(ItemFailure {
                    item,
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
            }
        };

        match self.persist(params, &body) {
            Ok((search, success)) => Outcome::Persisted { search, success },
            Err(err) => {
                error!(error = %err, query = %params.q, location = %params.location, "could not store search response");
                Outcome::Failed(ItemFailure {
                    item,
                    kind: "persist".to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    fn persist(
        &self,
        params: &SearchParams,
        body: &Value,
    ) -> Result<(CollectedSearch, bool), PipelineError> {
        let response = SearchResponse::from_value(body)?;
        let layout = self.persistence.layout();
        let dir = if response.status.is_success() {
            layout.successful_dir()
        } else {
            layout.error_dir()
        };
        let path = self
            .persistence
            .save_json(&dir, &layout.raw_file_name(&response.search_id), body)?;
        if !response.status.is_success() {
            warn!(search_id = %response.search_id, status = %response.status, path = %path, "search did not succeed");
        }
        let search = CollectedSearch {
            search_id: response.search_id.to_string(),
            status: response.status.to_string(),
            query: params.q.clone(),
            location: params.location.clone(),
            start: params.start,
            path,
            job_results: response.jobs_results.len(),
        };
        Ok((search, response.status.is_success()))
    }
}
