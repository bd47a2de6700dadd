use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::domain::{SearchId, SearchResponse};
use crate::error::PipelineError;
use crate::flows::{ItemFailure, ProgressEvent, ProgressSink};
use crate::storage::{FilePersistence, ObjectStore};
use crate::text::flatten;
use crate::warehouse::RawTable;

#[derive(Debug, Clone, Serialize)]
pub struct SplitOutcome {
    pub search_id: String,
    pub files: Vec<String>,
    pub job_results: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SplitReport {
    pub pending: usize,
    pub split: Vec<SplitOutcome>,
    pub failures: Vec<ItemFailure>,
}

pub struct SplitFlow<'a, S: ObjectStore> {
    persistence: &'a FilePersistence<S>,
}

impl<'a, S: ObjectStore> SplitFlow<'a, S> {
    pub fn new(persistence: &'a FilePersistence<S>) -> Self {
        Self { persistence }
    }

    pub fn pending_ids(&self) -> Result<Vec<SearchId>, PipelineError> {
        let layout = self.persistence.layout();
        let raw = self
            .persistence
            .list_search_ids(&layout.successful_dir(), &layout.file_name)?;

        let mut complete: Option<BTreeSet<SearchId>> = None;
        for table in RawTable::ALL {
            let ids: BTreeSet<SearchId> = self
                .persistence
                .list_search_ids(&layout.processed_dir, table.name())?
                .into_iter()
                .collect();
            complete = Some(match complete {
                Some(previous) => previous.intersection(&ids).cloned().collect(),
                None => ids,
            });
        }
        let complete = complete.unwrap_or_default();
        Ok(raw.into_iter().filter(|id| !complete.contains(id)).collect())
    }

    pub fn run(
        &self,
        ids: Option<&[SearchId]>,
        sink: &dyn ProgressSink,
    ) -> Result<SplitReport, PipelineError> {
        let work = match ids {
            Some(ids) => ids.to_vec(),
            None => self.pending_ids()?,
        };
        let mut report = SplitReport {
            pending: work.len(),
            ..SplitReport::default()
        };

        for (index, id) in work.iter().enumerate() {
            sink.event(ProgressEvent::phase(
                "Split",
                format!("{}/{} {id}", index + 1, work.len()),
            ));
            match self.split_one(id) {
                Ok(outcome) => report.split.push(outcome),
                Err(err) => {
                    error!(search_id = %id, error = %err, "split failed");
                    report.failures.push(ItemFailure {
                        item: id.to_string(),
                        kind: "split".to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            pending = report.pending,
            split = report.split.len(),
            failures = report.failures.len(),
            "split finished"
        );
        Ok(report)
    }

    pub fn split_one(&self, id: &SearchId) -> Result<SplitOutcome, PipelineError> {
        let layout = self.persistence.layout();
        let raw = self
            .persistence
            .load_json(&layout.successful_dir(), &layout.raw_file_name(id))?;
        let response = SearchResponse::from_value(&raw)?;
        if response.search_id != *id {
            warn!(file_id = %id, body_id = %response.search_id, "search id in file name differs from body");
        }

        let metadata = flatten(&Value::Object(response.search_metadata));
        let mut parameters = flatten(&Value::Object(response.search_parameters));
        parameters.insert("search_id".to_string(), Value::String(id.to_string()));

        let mut job_results = Vec::with_capacity(response.jobs_results.len());
        for job in response.jobs_results {
            let Value::Object(mut job) = job else {
                warn!(search_id = %id, "skipping job result that is not an object");
                continue;
            };
            job.insert("search_id".to_string(), Value::String(id.to_string()));
            job_results.push(job);
        }

        let file = |table: RawTable| format!("{}_{id}", table.name());
        let files = vec![
            self.persistence.save_ndjson(
                &layout.processed_dir,
                &file(RawTable::SearchMetadata),
                &[metadata],
            )?,
            self.persistence.save_ndjson(
                &layout.processed_dir,
                &file(RawTable::SearchParameters),
                &[parameters],
            )?,
            self.persistence.save_ndjson::<Map<String, Value>>(
                &layout.processed_dir,
                &file(RawTable::JobResults),
                &job_results,
            )?,
        ];

        Ok(SplitOutcome {
            search_id: id.to_string(),
            files,
            job_results: job_results.len(),
        })
    }
}
