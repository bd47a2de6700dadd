use serde::Serialize;
use tracing::{error, info};

use crate::domain::SearchId;
use crate::error::PipelineError;
use crate::flows::{ItemFailure, ProgressEvent, ProgressSink};
use crate::storage::{FilePersistence, ObjectStore};
use crate::warehouse::{LoadRequest, RawTable, Warehouse, WriteDisposition};

#[derive(Debug, Clone, Serialize)]
pub struct TableSync {
    pub table: String,
    pub stored: usize,
    pub pending: usize,
    pub loaded: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub tables: Vec<TableSync>,
}

impl SyncReport {
    pub fn loaded(&self) -> usize {
        self.tables.iter().map(|table| table.loaded.len()).sum()
    }
}

pub struct SyncFlow<'a, S: ObjectStore, W: Warehouse> {
    persistence: &'a FilePersistence<S>,
    warehouse: &'a W,
    raw_dataset: &'a str,
}

impl<'a, S: ObjectStore, W: Warehouse> SyncFlow<'a, S, W> {
    pub fn new(persistence: &'a FilePersistence<S>, warehouse: &'a W, raw_dataset: &'a str) -> Self {
        Self {
            persistence,
            warehouse,
            raw_dataset,
        }
    }

    pub fn pending_ids(&self, table: RawTable) -> Result<(usize, Vec<SearchId>), PipelineError> {
        let stored = self
            .persistence
            .list_search_ids(&self.persistence.layout().processed_dir, table.name())?;
        let loaded = self
            .warehouse
            .distinct_values(&table.table_ref(self.raw_dataset), table.id_column())?;
        let total = stored.len();
        let pending = stored
            .into_iter()
            .filter(|id| !loaded.contains(id.as_str()))
            .collect();
        Ok((total, pending))
    }

    pub fn run(&self, sink: &dyn ProgressSink) -> Result<SyncReport, PipelineError> {
        let mut report = SyncReport::default();
        for table in RawTable::ALL {
            report.tables.push(self.sync_table(table, sink)?);
        }
        info!(loaded = report.loaded(), "sync finished");
        Ok(report)
    }

    fn sync_table(&self, table: RawTable, sink: &dyn ProgressSink) -> Result<TableSync, PipelineError> {
        let (stored, pending) = self.pending_ids(table)?;
        let table_ref = table.table_ref(self.raw_dataset);
        info!(table = %table_ref, stored, pending = pending.len(), "sync work list");

        let layout = self.persistence.layout();
        let mut result = TableSync {
            table: table_ref.to_string(),
            stored,
            pending: pending.len(),
            loaded: Vec::new(),
            failures: Vec::new(),
        };

        for (index, id) in pending.iter().enumerate() {
            sink.event(ProgressEvent::phase(
                "Sync",
                format!("{table_ref} {}/{} {id}", index + 1, pending.len()),
            ));
            let path = layout.object_path(&layout.processed_dir, &format!("{}_{id}", table.name()));
            let request = LoadRequest {
                table: table_ref.clone(),
                source_uri: self.persistence.store().uri(&path),
                schema: table.schema(),
                write: WriteDisposition::Append,
            };
            match self.warehouse.load(&request) {
                Ok(()) => result.loaded.push(id.to_string()),
                Err(err) => {
                    error!(table = %table_ref, search_id = %id, error = %err, "load failed");
                    result.failures.push(ItemFailure {
                        item: id.to_string(),
                        kind: "load".to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }
}
