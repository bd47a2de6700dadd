use assert_matches::assert_matches;
use job_postings_pipeline::config::ConfigLoader;
use job_postings_pipeline::domain::{DedupKeep, SaveLocation, WarehouseLocation};
use job_postings_pipeline::error::PipelineError;

#[test]
fn partial_file_keeps_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("jobs-etl.json");
    std::fs::write(
        &path,
        r#"{
            "storage": {"save_location": "gcs", "bucket": "my-jobs"},
            "warehouse": {"location": "bigquery", "region": "EU", "poll_timeout_secs": 600},
            "features": {"dedup_keep": "latest", "keywords": {"tools": ["Excel", "Tableau"]}}
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.storage.location, SaveLocation::Gcs);
    assert_eq!(resolved.storage.bucket, "my-jobs");
    assert_eq!(resolved.storage.raw_dir, "data/raw");
    assert_eq!(resolved.warehouse.location, WarehouseLocation::Bigquery);
    assert_eq!(resolved.warehouse.region.as_deref(), Some("EU"));
    assert_eq!(resolved.warehouse.poll_timeout.map(|t| t.as_secs()), Some(600));
    assert_eq!(resolved.features.dedup_keep, DedupKeep::Latest);
    assert_eq!(resolved.features.keywords.len(), 1);
    assert_eq!(resolved.api.engine, "google_jobs");
    assert_eq!(resolved.grid.start_offsets, vec![0, 10, 20]);
}

#[test]
fn unknown_save_location_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("jobs-etl.json");
    std::fs::write(&path, r#"{"storage": {"save_location": "s3"}}"#).unwrap();

    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, PipelineError::InvalidSaveLocation(value) if value == "s3");
}

#[test]
fn unknown_dedup_rule_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("jobs-etl.json");
    std::fs::write(&path, r#"{"features": {"dedup_keep": "newest"}}"#).unwrap();

    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, PipelineError::InvalidDedupRule(_));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::load(path.to_str()).unwrap_err();
    assert_matches!(err, PipelineError::ConfigRead(_));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("jobs-etl.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::load(path.to_str()).unwrap_err();
    assert_matches!(err, PipelineError::ConfigParse(_));
}

#[test]
fn request_params_combine_api_section_with_grid_values() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("jobs-etl.json");
    std::fs::write(&path, r#"{"api": {"hl": "en", "lrad": 50}}"#).unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    let params = resolved.api.params_for("Data Engineer", "Bonn,Germany", 10);
    assert_eq!(params.engine, "google_jobs");
    assert_eq!(params.hl, "en");
    assert_eq!(params.lrad, 50);
    assert_eq!(params.q, "Data Engineer");
    assert_eq!(params.location, "Bonn,Germany");
    assert_eq!(params.start, 10);
}
