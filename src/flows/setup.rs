use serde::Serialize;
use tracing::info;

use crate::config::ResolvedWarehouse;
use crate::error::PipelineError;
use crate::flows::{ProgressEvent, ProgressSink};
use crate::warehouse::{RawTable, Warehouse};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SetupReport {
    pub datasets: Vec<String>,
    pub tables: Vec<String>,
}

pub fn init_warehouse<W: Warehouse>(
    warehouse: &W,
    settings: &ResolvedWarehouse,
    sink: &dyn ProgressSink,
) -> Result<SetupReport, PipelineError> {
    let mut report = SetupReport::default();
    for dataset in [&settings.raw_dataset, &settings.final_dataset] {
        sink.event(ProgressEvent::phase("Setup", format!("dataset {dataset}")));
        warehouse.ensure_dataset(dataset)?;
        report.datasets.push(dataset.clone());
    }
    for table in RawTable::ALL {
        let table_ref = table.table_ref(&settings.raw_dataset);
        sink.event(ProgressEvent::phase("Setup", format!("table {table_ref}")));
        warehouse.ensure_table(&table_ref, &table.schema().unwrap_or_default())?;
        report.tables.push(table_ref.to_string());
    }
    info!(datasets = report.datasets.len(), tables = report.tables.len(), "warehouse ready");
    Ok(report)
}
