use serde::Serialize;

pub mod collect;
pub mod features;
pub mod setup;
pub mod split;
pub mod sync;

pub use collect::{CollectFlow, CollectOptions, CollectReport};
pub use features::{FeatureFlow, FeatureOptions, FeatureReport};
pub use setup::{SetupReport, init_warehouse};
pub use split::{SplitFlow, SplitReport};
pub use sync::{SyncFlow, SyncReport};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

impl ProgressEvent {
    pub fn phase(phase: &str, detail: impl Into<String>) -> Self {
        Self {
            message: format!("phase={phase}; {}", detail.into()),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub collect: CollectReport,
    pub split: SplitReport,
    pub sync: SyncReport,
    pub features: FeatureReport,
}
