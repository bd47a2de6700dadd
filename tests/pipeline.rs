use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};

use job_postings_pipeline::config::{Config, ConfigLoader, ResolvedConfig};
use job_postings_pipeline::domain::parse_timestamp;
use job_postings_pipeline::flows::{
    CollectFlow, CollectOptions, FeatureFlow, FeatureOptions, SplitFlow, SyncFlow, init_warehouse,
};
use job_postings_pipeline::output::JsonOutput;
use job_postings_pipeline::serpapi::{SearchClient, SearchError, SearchParams};
use job_postings_pipeline::storage::{FilePersistence, LocalStore};
use job_postings_pipeline::warehouse::{LocalWarehouse, RawTable, TableRef};

fn job(htidocid: &str, description: &str) -> Value {
    json!({
        "title": "Data Analyst",
        "company_name": "Acme GmbH",
        "location": "Köln",
        "via": "über LinkedIn",
        "description": description,
        "extensions": ["vor 3 Tagen", "Vollzeit"],
        "detected_extensions": {"posted_at": "vor 3 Tagen"},
        "job_id": format!(r#"{{"job_title":"Data Analyst","htidocid":"{htidocid}","hl":"de"}}"#),
    })
}

/// Two searches on different days that both return the `abc` posting.
struct TwoDays;

impl SearchClient for TwoDays {
    fn search(&self, params: &SearchParams) -> Result<Value, SearchError> {
        let (id, created_at, jobs) = match params.location.as_str() {
            "Cologne" => (
                "s1",
                "2024-01-01 10:00:00 UTC",
                vec![job("abc", "Python und SQL, Homeoffice möglich")],
            ),
            "Bonn" => {
                let encoded = STANDARD.encode(r#"{"job_title":"Data Engineer","htidocid":"def"}"#);
                let mut second = job("def", "Spark und Airflow");
                second["job_id"] = json!(encoded);
                second["extensions"] = json!(["vor 5 Stunden"]);
                (
                    "s2",
                    "2024-01-02 10:00:00 UTC",
                    vec![job("abc", "Python und SQL, Homeoffice möglich"), second],
                )
            }
            other => return Err(SearchError::Other(format!("unexpected location {other}"))),
        };
        Ok(json!({
            "search_metadata": {
                "id": id,
                "status": "Success",
                "json_endpoint": format!("https://serpapi.com/searches/{id}.json"),
                "created_at": created_at,
                "processed_at": created_at,
                "google_jobs_url": "https://www.google.de/search?q=Data+Analyst",
                "raw_html_file": format!("https://serpapi.com/searches/{id}.html"),
                "total_time_taken": 1.52,
            },
            "search_parameters": {
                "q": params.q,
                "engine": params.engine,
                "google_domain": params.google_domain,
                "hl": params.hl,
                "gl": params.gl,
                "location_requested": params.location,
                "location_used": format!("{},Germany", params.location),
                "start": params.start,
            },
            "jobs_results": jobs,
        }))
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    config: ResolvedConfig,
    persistence: FilePersistence<LocalStore>,
    warehouse: LocalWarehouse,
}

fn fixture() -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().to_str().unwrap().to_string();
    let mut config = Config::default();
    config.storage.local_root = root.clone();
    config.warehouse.local_root = format!("{root}/warehouse");
    config.grid.jobs = vec!["Data Analyst".to_string()];
    config.grid.locations = vec!["Cologne".to_string(), "Bonn".to_string()];
    config.grid.start_offsets = vec![0];
    let config = ConfigLoader::resolve_config(config).unwrap();
    let persistence = FilePersistence::new(
        LocalStore::new(config.storage.local_root.clone()),
        config.storage.clone(),
    );
    let warehouse = LocalWarehouse::new(config.warehouse.local_root.clone());
    Fixture {
        _temp: temp,
        config,
        persistence,
        warehouse,
    }
}

fn collect_and_split(fixture: &Fixture) {
    let collect = CollectFlow::new(
        &TwoDays,
        &fixture.persistence,
        &fixture.config.api,
        &fixture.config.grid,
    )
    .run(CollectOptions::default(), &JsonOutput)
    .unwrap();
    assert_eq!(collect.successful.len(), 2);

    let split = SplitFlow::new(&fixture.persistence)
        .run(None, &JsonOutput)
        .unwrap();
    assert_eq!(split.split.len(), 2);
    assert!(split.failures.is_empty());
}

#[test]
fn split_writes_three_files_per_search() {
    let fixture = fixture();
    collect_and_split(&fixture);

    let processed = fixture.config.storage.local_root.join("data/processed");
    for table in RawTable::ALL {
        for id in ["s1", "s2"] {
            assert!(processed.join(format!("{}_{id}.json", table.name())).exists());
        }
    }

    let parameters = fixture
        .persistence
        .load_json("data/processed", "search_parameters_s2")
        .unwrap();
    assert_eq!(parameters["search_id"], "s2");
    assert_eq!(parameters["location_requested"], "Bonn");

    let jobs = String::from_utf8(
        std::fs::read(processed.join("job_results_s2.json").as_std_path()).unwrap(),
    )
    .unwrap();
    let lines: Vec<Value> = jobs
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|job| job["search_id"] == "s2"));

    let again = SplitFlow::new(&fixture.persistence)
        .run(None, &JsonOutput)
        .unwrap();
    assert_eq!(again.pending, 0);
}

#[test]
fn sync_loads_each_search_once() {
    let fixture = fixture();
    collect_and_split(&fixture);
    let flow = SyncFlow::new(
        &fixture.persistence,
        &fixture.warehouse,
        &fixture.config.warehouse.raw_dataset,
    );

    let first = flow.run(&JsonOutput).unwrap();
    assert_eq!(first.loaded(), 6);

    let second = flow.run(&JsonOutput).unwrap();
    assert_eq!(second.loaded(), 0);

    let metadata = fixture
        .warehouse
        .read_table(&TableRef::new("raw", "search_metadata"))
        .unwrap();
    assert_eq!(metadata.len(), 2);
    // only schema columns are kept
    assert!(metadata.iter().all(|row| row.len() == 8));
    let jobs = fixture
        .warehouse
        .read_table(&TableRef::new("raw", "job_results"))
        .unwrap();
    assert_eq!(jobs.len(), 3);
}

#[test]
fn features_keep_the_earliest_copy_of_a_posting() {
    let fixture = fixture();
    init_warehouse(&fixture.warehouse, &fixture.config.warehouse, &JsonOutput).unwrap();
    collect_and_split(&fixture);
    SyncFlow::new(
        &fixture.persistence,
        &fixture.warehouse,
        &fixture.config.warehouse.raw_dataset,
    )
    .run(&JsonOutput)
    .unwrap();

    let report = FeatureFlow::new(
        &fixture.persistence,
        &fixture.warehouse,
        &fixture.config.features,
        &fixture.config.warehouse,
    )
    .run(FeatureOptions::default(), &JsonOutput)
    .unwrap();

    assert_eq!(report.input_rows, 3);
    assert_eq!(report.records, 2);
    assert_eq!(report.final_table.as_deref(), Some("final.job_results"));

    let rows = fixture
        .warehouse
        .read_table(&TableRef::new("final", "job_results"))
        .unwrap();
    assert_eq!(rows.len(), 2);

    let abc = rows.iter().find(|row| row["htidocid"] == "abc").unwrap();
    assert_eq!(abc["search_id"], "s1");
    assert_eq!(
        parse_timestamp(abc["created_at"].as_str().unwrap()).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    );
    assert_eq!(
        parse_timestamp(abc["posted_at"].as_str().unwrap()).unwrap(),
        Utc.with_ymd_and_hms(2023, 12, 29, 10, 0, 0).unwrap()
    );
    assert_eq!(abc["employment_type"], "Vollzeit");
    assert_eq!(abc["programming_languages"], json!(["Python", "SQL"]));
    assert_eq!(abc["homeoffice"], true);
    assert_eq!(abc["q"], "Data Analyst");

    let def = rows.iter().find(|row| row["htidocid"] == "def").unwrap();
    assert_eq!(def["job_title"], "Data Engineer");
    assert_eq!(def["posted_unit"], "Stunde");
    assert_eq!(def["posted_hours"], 5);
    assert_eq!(def["employment_type"], Value::Null);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_path(&report.csv_path)
        .unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.get(0), Some("search_id"));
    assert!(headers.iter().any(|column| column == "posted_at"));
    assert_eq!(reader.records().count(), 2);
}

#[test]
fn features_without_load_leave_final_table_alone() {
    let fixture = fixture();
    collect_and_split(&fixture);
    SyncFlow::new(
        &fixture.persistence,
        &fixture.warehouse,
        &fixture.config.warehouse.raw_dataset,
    )
    .run(&JsonOutput)
    .unwrap();

    let report = FeatureFlow::new(
        &fixture.persistence,
        &fixture.warehouse,
        &fixture.config.features,
        &fixture.config.warehouse,
    )
    .run(FeatureOptions { load: false }, &JsonOutput)
    .unwrap();

    assert!(report.final_table.is_none());
    assert!(
        fixture
            .warehouse
            .read_table(&TableRef::new("final", "job_results"))
            .unwrap()
            .is_empty()
    );
}
