use std::io::{self, Write};

use serde::Serialize;

use crate::flows::{
    CollectReport, FeatureReport, ProgressEvent, ProgressSink, RunReport, SetupReport,
    SplitReport, SyncReport,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        eprintln!("{}", event.message);
    }
}

impl TextOutput {
    pub fn collect_summary(report: &CollectReport) -> String {
        format!(
            "collect: {} requested, {} successful, {} error responses, {} failed",
            report.requested,
            report.successful.len(),
            report.errors.len(),
            report.failures.len()
        )
    }

    pub fn split_summary(report: &SplitReport) -> String {
        format!(
            "split: {} pending, {} split, {} failed",
            report.pending,
            report.split.len(),
            report.failures.len()
        )
    }

    pub fn sync_summary(report: &SyncReport) -> String {
        let tables: Vec<String> = report
            .tables
            .iter()
            .map(|table| {
                format!(
                    "{} {}/{} loaded",
                    table.table,
                    table.loaded.len(),
                    table.pending
                )
            })
            .collect();
        format!("sync: {}", tables.join(", "))
    }

    pub fn features_summary(report: &FeatureReport) -> String {
        let mut summary = format!(
            "features: {} rows in, {} records out -> {}",
            report.input_rows, report.records, report.csv_path
        );
        if let Some(table) = &report.final_table {
            summary.push_str(&format!(" and {table}"));
        }
        summary
    }

    pub fn setup_summary(report: &SetupReport) -> String {
        format!(
            "init-warehouse: datasets {}; tables {}",
            report.datasets.join(", "),
            report.tables.join(", ")
        )
    }

    pub fn run_summary(report: &RunReport) -> String {
        [
            Self::collect_summary(&report.collect),
            Self::split_summary(&report.split),
            Self::sync_summary(&report.sync),
            Self::features_summary(&report.features),
        ]
        .join("\n")
    }
}
