use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify::DEFAULT_DAY_HOUR_PATTERN;
use crate::domain::{DedupKeep, SaveLocation, WarehouseLocation};
use crate::error::PipelineError;
use crate::serpapi::SearchParams;
use crate::storage::StorageLayout;

pub const DEFAULT_CONFIG_FILE: &str = "jobs-etl.json";

pub type KeywordCategories = IndexMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub grid: QueryGrid,
    pub storage: StorageConfig,
    pub warehouse: WarehouseConfig,
    pub features: FeatureConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: String,
    pub engine: String,
    pub hl: String,
    pub gl: String,
    pub google_domain: String,
    pub lrad: u32,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://serpapi.com/search".to_string(),
            engine: "google_jobs".to_string(),
            hl: "de".to_string(),
            gl: "de".to_string(),
            google_domain: "google.de".to_string(),
            lrad: 25,
            timeout_secs: 60,
        }
    }
}

impl ApiConfig {
    pub fn params_for(&self, query: &str, location: &str, start: u32) -> SearchParams {
        SearchParams {
            engine: self.engine.clone(),
            q: query.to_string(),
            hl: self.hl.clone(),
            gl: self.gl.clone(),
            google_domain: self.google_domain.clone(),
            lrad: self.lrad,
            location: location.to_string(),
            start,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryGrid {
    pub jobs: Vec<String>,
    pub locations: Vec<String>,
    pub start_offsets: Vec<u32>,
}

impl Default for QueryGrid {
    fn default() -> Self {
        Self {
            jobs: vec![
                "Data Analyst".to_string(),
                "Data Scientist".to_string(),
                "Data Engineer".to_string(),
            ],
            locations: default_locations(),
            start_offsets: vec![0, 10, 20],
        }
    }
}

impl QueryGrid {
    pub fn combinations(&self) -> Vec<(String, String, u32)> {
        let mut combinations = Vec::new();
        for job in &self.jobs {
            for location in &self.locations {
                for start in &self.start_offsets {
                    combinations.push((job.clone(), location.clone(), *start));
                }
            }
        }
        combinations
    }
}

fn default_locations() -> Vec<String> {
    [
        "Cologne,North Rhine-Westphalia,Germany",
        "Aachen,North Rhine-Westphalia,Germany",
        "Bonn,North Rhine-Westphalia,Germany",
        "Dusseldorf,North Rhine-Westphalia,Germany",
        "Essen,North Rhine-Westphalia,Germany",
        "Dortmund,North Rhine-Westphalia,Germany",
        "Duisburg,North Rhine-Westphalia,Germany",
        "Bielefeld,North Rhine-Westphalia,Germany",
        "Berlin,Germany",
        "Hamburg,Germany",
        "Munich,Bavaria,Germany",
        "Frankfurt,Hesse,Germany",
        "Stuttgart,Baden-Wurttemberg,Germany",
        "Leipzig,Saxony,Germany",
        "Bremen,Bremen,Germany",
        "Dresden,Saxony,Germany",
        "Hannover,Lower Saxony,Germany",
        "Nuremberg,Bavaria,Germany",
        "Bochum,North Rhine-Westphalia,Germany",
        "Wuppertal,North Rhine-Westphalia,Germany",
        "Munster,North Rhine-Westphalia,Germany",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub save_location: String,
    pub local_root: String,
    pub bucket: String,
    pub raw_dir: String,
    pub processed_dir: String,
    pub final_dir: String,
    pub file_name: String,
    pub extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            save_location: "local".to_string(),
            local_root: ".".to_string(),
            bucket: "serpapi_jobs".to_string(),
            raw_dir: "data/raw".to_string(),
            processed_dir: "data/processed".to_string(),
            final_dir: "data/final".to_string(),
            file_name: "google_jobs".to_string(),
            extension: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub location: String,
    pub local_root: String,
    pub raw_dataset: String,
    pub final_dataset: String,
    pub final_table: String,
    pub region: Option<String>,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: Option<u64>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            location: "local".to_string(),
            local_root: "data/warehouse".to_string(),
            raw_dataset: "raw".to_string(),
            final_dataset: "final".to_string(),
            final_table: "job_results".to_string(),
            region: None,
            poll_interval_ms: 1000,
            poll_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub keywords: KeywordCategories,
    pub day_hour_regex: String,
    pub dedup_keep: String,
    pub output_csv: String,
    pub load_final_table: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            keywords: default_keyword_categories(),
            day_hour_regex: DEFAULT_DAY_HOUR_PATTERN.to_string(),
            dedup_keep: "earliest".to_string(),
            output_csv: "data/final/job_results.csv".to_string(),
            load_final_table: true,
        }
    }
}

pub fn default_keyword_categories() -> KeywordCategories {
    let categories: [(&str, &[&str]); 7] = [
        (
            "programming_languages",
            &["Python", "R", "SQL", "Java", "Scala", "Julia", "SAS", "Matlab", "JavaScript", "Go"],
        ),
        (
            "databases",
            &[
                "PostgreSQL", "MySQL", "Oracle", "MongoDB", "Snowflake", "BigQuery", "Redshift",
                "Databricks", "Hadoop",
            ],
        ),
        ("cloud_platforms", &["AWS", "Azure", "GCP", "Cloud"]),
        (
            "bi_tools",
            &["Tableau", "PowerBI", "Qlik", "Looker", "Excel", "SAP"],
        ),
        (
            "libraries",
            &[
                "Pandas", "NumPy", "Spark", "Airflow", "dbt", "TensorFlow", "PyTorch", "Keras",
                "Docker", "Kubernetes", "Git",
            ],
        ),
        (
            "education",
            &["Bachelor", "Master", "Promotion", "PhD", "Studium", "Ausbildung"],
        ),
        (
            "languages",
            &["Deutsch", "Englisch", "German", "English"],
        ),
    ];
    categories
        .into_iter()
        .map(|(name, keywords)| {
            (
                name.to_string(),
                keywords.iter().map(|keyword| keyword.to_string()).collect(),
            )
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ResolvedWarehouse {
    pub location: WarehouseLocation,
    pub local_root: Utf8PathBuf,
    pub raw_dataset: String,
    pub final_dataset: String,
    pub final_table: String,
    pub region: Option<String>,
    pub poll_interval: Duration,
    pub poll_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct FeatureSettings {
    pub keywords: KeywordCategories,
    pub day_hour_regex: Regex,
    pub dedup_keep: DedupKeep,
    pub output_csv: Utf8PathBuf,
    pub load_final_table: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub api: ApiConfig,
    pub grid: QueryGrid,
    pub storage: StorageLayout,
    pub warehouse: ResolvedWarehouse,
    pub features: FeatureSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: Option<&str>) -> Result<Config, PipelineError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PipelineError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| PipelineError::ConfigParse(err.to_string()))
    }

    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PipelineError> {
        Self::resolve_config(Self::load(path)?)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PipelineError> {
        let Config {
            api,
            grid,
            storage,
            warehouse,
            features,
        } = config;

        let save_location: SaveLocation = storage.save_location.parse()?;
        if storage.extension.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "storage.extension must not be empty".to_string(),
            ));
        }
        let storage = StorageLayout {
            location: save_location,
            local_root: Utf8PathBuf::from(storage.local_root),
            bucket: storage.bucket,
            raw_dir: storage.raw_dir,
            processed_dir: storage.processed_dir,
            final_dir: storage.final_dir,
            file_name: storage.file_name,
            extension: storage.extension,
        };

        if warehouse.poll_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "warehouse.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        let warehouse_location: WarehouseLocation = warehouse.location.parse()?;
        if warehouse_location == WarehouseLocation::Bigquery && save_location != SaveLocation::Gcs {
            return Err(PipelineError::InvalidConfig(
                "warehouse.location \"bigquery\" loads from gs:// and needs storage.save_location \"gcs\""
                    .to_string(),
            ));
        }
        let warehouse = ResolvedWarehouse {
            location: warehouse_location,
            local_root: Utf8PathBuf::from(warehouse.local_root),
            raw_dataset: warehouse.raw_dataset,
            final_dataset: warehouse.final_dataset,
            final_table: warehouse.final_table,
            region: warehouse.region,
            poll_interval: Duration::from_millis(warehouse.poll_interval_ms),
            poll_timeout: warehouse.poll_timeout_secs.map(Duration::from_secs),
        };

        let day_hour_regex = Regex::new(&features.day_hour_regex)
            .map_err(|err| PipelineError::InvalidRegex(err.to_string()))?;
        if day_hour_regex.captures_len() < 3 {
            return Err(PipelineError::InvalidRegex(format!(
                "{} needs a number group and a unit group",
                features.day_hour_regex
            )));
        }
        let features = FeatureSettings {
            keywords: features.keywords,
            day_hour_regex,
            dedup_keep: features.dedup_keep.parse()?,
            output_csv: Utf8PathBuf::from(features.output_csv),
            load_final_table: features.load_final_table,
        };

        Ok(ResolvedConfig {
            api,
            grid,
            storage,
            warehouse,
            features,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub serpapi_api_key: Option<String>,
    pub gcp_project: Option<String>,
    pub gcp_access_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            serpapi_api_key: read("SERPAPI_API_KEY"),
            gcp_project: read("GCP_PROJECT"),
            gcp_access_token: read("GCP_ACCESS_TOKEN"),
        }
    }

    pub fn serpapi_api_key(&self) -> Result<&str, PipelineError> {
        self.serpapi_api_key
            .as_deref()
            .ok_or_else(|| PipelineError::MissingCredential("SERPAPI_API_KEY".to_string()))
    }
}
