use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use job_postings_pipeline::error::PipelineError;
use job_postings_pipeline::warehouse::{
    FieldSchema, LoadRequest, LocalWarehouse, TableRef, Warehouse, WriteDisposition,
};

fn warehouse(root: &std::path::Path) -> LocalWarehouse {
    LocalWarehouse::new(Utf8PathBuf::from_path_buf(root.join("warehouse")).unwrap())
}

fn source(root: &std::path::Path, name: &str, content: &str) -> String {
    let path = root.join(name);
    std::fs::write(&path, content).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn append_then_truncate() {
    let temp = tempfile::tempdir().unwrap();
    let warehouse = warehouse(temp.path());
    let table = TableRef::new("final", "job_results");

    let first = source(temp.path(), "a.json", "{\"job_id\":\"1\"}\n{\"job_id\":\"2\"}\n");
    let second = source(temp.path(), "b.json", "{\"job_id\":\"3\"}\n");

    for uri in [&first, &second] {
        warehouse
            .load(&LoadRequest {
                table: table.clone(),
                source_uri: uri.clone(),
                schema: None,
                write: WriteDisposition::Append,
            })
            .unwrap();
    }
    assert_eq!(warehouse.read_table(&table).unwrap().len(), 3);

    warehouse
        .load(&LoadRequest {
            table: table.clone(),
            source_uri: second,
            schema: None,
            write: WriteDisposition::Truncate,
        })
        .unwrap();
    let rows = warehouse.read_table(&table).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["job_id"], "3");
}

#[test]
fn explicit_schema_projects_columns() {
    let temp = tempfile::tempdir().unwrap();
    let warehouse = warehouse(temp.path());
    let table = TableRef::new("raw", "search_metadata");
    let uri = source(
        temp.path(),
        "search_metadata_abc.json",
        r#"{"id": "abc", "status": "Success", "extra": 1}"#,
    );

    warehouse
        .load(&LoadRequest {
            table: table.clone(),
            source_uri: uri,
            schema: Some(vec![
                FieldSchema::nullable("id", "STRING"),
                FieldSchema::nullable("created_at", "TIMESTAMP"),
            ]),
            write: WriteDisposition::Append,
        })
        .unwrap();

    let rows = warehouse.read_table(&table).unwrap();
    assert_eq!(rows[0].len(), 2);
    assert!(rows[0]["created_at"].is_null());
    let ids = warehouse.distinct_values(&table, "id").unwrap();
    assert!(ids.contains("abc"));
}

#[test]
fn missing_table_has_no_ids() {
    let temp = tempfile::tempdir().unwrap();
    let warehouse = warehouse(temp.path());
    let ids = warehouse
        .distinct_values(&TableRef::new("raw", "job_results"), "search_id")
        .unwrap();
    assert!(ids.is_empty());
}

#[test]
fn remote_sources_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let err = warehouse(temp.path())
        .load(&LoadRequest {
            table: TableRef::new("raw", "job_results"),
            source_uri: "gs://serpapi_jobs/data/processed/job_results_abc.json".to_string(),
            schema: None,
            write: WriteDisposition::Append,
        })
        .unwrap_err();
    assert_matches!(err, PipelineError::InvalidConfig(_));
}
