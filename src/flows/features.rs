use serde::Serialize;
use tracing::{info, warn};

use crate::config::{FeatureSettings, ResolvedWarehouse};
use crate::domain::JobRow;
use crate::error::PipelineError;
use crate::features::{derive_features, final_table_schema};
use crate::flows::{ProgressEvent, ProgressSink};
use crate::storage::{FilePersistence, ObjectStore, write_bytes_atomic};
use crate::warehouse::{LoadRequest, TableRef, Warehouse, WriteDisposition};

#[derive(Debug, Clone, Copy)]
pub struct FeatureOptions {
    pub load: bool,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self { load: true }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureReport {
    pub input_rows: usize,
    pub invalid_rows: usize,
    pub undecodable_job_ids: usize,
    pub records: usize,
    pub keyword_columns: Vec<String>,
    pub csv_path: String,
    pub final_table: Option<String>,
}

pub struct FeatureFlow<'a, S: ObjectStore, W: Warehouse> {
    persistence: &'a FilePersistence<S>,
    warehouse: &'a W,
    settings: &'a FeatureSettings,
    tables: &'a ResolvedWarehouse,
}

impl<'a, S: ObjectStore, W: Warehouse> FeatureFlow<'a, S, W> {
    pub fn new(
        persistence: &'a FilePersistence<S>,
        warehouse: &'a W,
        settings: &'a FeatureSettings,
        tables: &'a ResolvedWarehouse,
    ) -> Self {
        Self {
            persistence,
            warehouse,
            settings,
            tables,
        }
    }

    pub fn run(
        &self,
        options: FeatureOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FeatureReport, PipelineError> {
        sink.event(ProgressEvent::phase("Features", "reading joined job results"));
        let records = self.warehouse.job_result_records(&self.tables.raw_dataset)?;
        let input_rows = records.len();

        let mut rows = Vec::with_capacity(input_rows);
        let mut invalid_rows = 0;
        for record in &records {
            match JobRow::from_record(record) {
                Ok(row) => rows.push(row),
                Err(err) => {
                    warn!(error = %err, "skipping malformed job row");
                    invalid_rows += 1;
                }
            }
        }

        sink.event(ProgressEvent::phase(
            "Features",
            format!("deriving features for {} rows", rows.len()),
        ));
        let table = derive_features(rows, self.settings);

        let csv_path = self
            .persistence
            .layout()
            .local_root
            .join(&self.settings.output_csv);
        write_bytes_atomic(&csv_path, &table.to_csv()?)?;
        info!(path = %csv_path, records = table.records.len(), "wrote feature table");

        let final_table = if options.load && self.settings.load_final_table {
            sink.event(ProgressEvent::phase("Features", "replacing final table"));
            let table_ref = TableRef::new(&self.tables.final_dataset, &self.tables.final_table);
            let schema = final_table_schema(&table.keyword_columns);
            let layout = self.persistence.layout();
            let path = self.persistence.save_ndjson(
                &layout.final_dir,
                &self.tables.final_table,
                &table.records,
            )?;
            self.warehouse.ensure_dataset(&table_ref.dataset)?;
            self.warehouse.load(&LoadRequest {
                table: table_ref.clone(),
                source_uri: self.persistence.store().uri(&path),
                schema: Some(schema),
                write: WriteDisposition::Truncate,
            })?;
            Some(table_ref.to_string())
        } else {
            None
        };

        Ok(FeatureReport {
            input_rows,
            invalid_rows,
            undecodable_job_ids: table.skipped_rows,
            records: table.records.len(),
            keyword_columns: table.keyword_columns,
            csv_path: csv_path.to_string(),
            final_table,
        })
    }
}
