use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use tracing::{error, warn};

use crate::classify::{ExtensionKind, PostingAge, classify_extension_value, extract_keywords};
use crate::config::{FeatureSettings, KeywordCategories};
use crate::domain::{DedupKeep, JobIdentity, JobRow};
use crate::error::PipelineError;
use crate::text::tokenize_text;
use crate::warehouse::FieldSchema;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    pub search_id: String,
    pub job_id: String,
    pub htidocid: String,
    pub job_title: Option<String>,
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub via: Option<String>,
    pub q: Option<String>,
    pub google_jobs_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub description_length: usize,
    pub description_tokens: usize,
    #[serde(flatten)]
    pub keywords: IndexMap<String, Vec<String>>,
    pub employment_type: Option<String>,
    pub posted_n_periods_ago: Option<String>,
    pub posted_number: Option<i64>,
    pub posted_unit: Option<String>,
    pub posted_hours: Option<i64>,
    pub posted_at: Option<DateTime<Utc>>,
    pub homeoffice: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    pub keyword_columns: Vec<String>,
    pub records: Vec<FeatureRecord>,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionColumns {
    pub employment_type: Option<String>,
    pub posted_n_periods_ago: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostingDate {
    pub age: Option<PostingAge>,
    pub hours: Option<i64>,
    pub posted_at: Option<DateTime<Utc>>,
}

pub fn validate_keywords(category: &str, keywords: &[String]) -> Result<(), PipelineError> {
    if keywords.is_empty() {
        return Err(PipelineError::InvalidKeywords {
            category: category.to_string(),
            reason: "keyword list is empty".to_string(),
        });
    }
    if keywords.iter().any(|keyword| keyword.trim().is_empty()) {
        return Err(PipelineError::InvalidKeywords {
            category: category.to_string(),
            reason: "keyword list contains a blank entry".to_string(),
        });
    }
    Ok(())
}

pub fn keyword_columns(
    rows: &[JobRow],
    categories: &KeywordCategories,
) -> IndexMap<String, HashMap<String, Vec<String>>> {
    let mut columns = IndexMap::new();
    for (category, keywords) in categories {
        if let Err(err) = validate_keywords(category, keywords) {
            error!(category = %category, error = %err, "skipping keyword category");
            continue;
        }
        let mut column = HashMap::new();
        for row in rows {
            column
                .entry(row.job_id.clone())
                .or_insert_with(|| extract_keywords(keywords, &row.description));
        }
        columns.insert(category.clone(), column);
    }
    columns
}

pub fn text_metrics(description: &str) -> (usize, usize) {
    (description.chars().count(), tokenize_text(description).len())
}

pub fn decompose_identities(rows: Vec<JobRow>) -> (Vec<(JobRow, JobIdentity)>, usize) {
    let mut decoded = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        match JobIdentity::decode(&row.job_id) {
            Ok(identity) => decoded.push((row, identity)),
            Err(err) => {
                warn!(job_id = %row.job_id, error = %err, "skipping row with undecodable job_id");
                skipped += 1;
            }
        }
    }
    (decoded, skipped)
}

pub fn deduplicate(
    mut rows: Vec<(JobRow, JobIdentity)>,
    keep: DedupKeep,
) -> Vec<(JobRow, JobIdentity)> {
    match keep {
        DedupKeep::Earliest => rows.sort_by(|a, b| a.0.created_at.cmp(&b.0.created_at)),
        DedupKeep::Latest => rows.sort_by(|a, b| b.0.created_at.cmp(&a.0.created_at)),
    }
    let mut seen = HashSet::new();
    rows.retain(|(_, identity)| seen.insert(identity.htidocid.clone()));
    rows
}

pub fn unpivot_extensions(rows: &[JobRow], pattern: &Regex) -> HashMap<String, ExtensionColumns> {
    let mut columns: HashMap<String, ExtensionColumns> = HashMap::new();
    for row in rows {
        let entry = columns.entry(row.job_id.clone()).or_default();
        for extension in &row.extensions {
            let kind = match classify_extension_value(extension, pattern) {
                Ok(kind) => kind,
                Err(err) => {
                    warn!(job_id = %row.job_id, error = %err, "ignoring extension");
                    continue;
                }
            };
            let slot = match kind {
                ExtensionKind::EmploymentType => &mut entry.employment_type,
                ExtensionKind::PostedNPeriodsAgo => &mut entry.posted_n_periods_ago,
                ExtensionKind::Other => continue,
            };
            let Some(value) = extension.as_str() else {
                continue;
            };
            if let Some(existing) = slot.as_deref() {
                warn!(
                    job_id = %row.job_id,
                    kind = %kind,
                    kept = existing,
                    ignored = value,
                    "duplicate extension value"
                );
            } else {
                *slot = Some(value.to_string());
            }
        }
    }
    columns
}

pub fn posting_date(
    created_at: DateTime<Utc>,
    posted_n_periods_ago: Option<&str>,
    pattern: &Regex,
) -> PostingDate {
    let Some(age) = posted_n_periods_ago.and_then(|text| PostingAge::parse(text, pattern)) else {
        return PostingDate::default();
    };
    let hours = age.in_hours();
    let posted_at = hours
        .and_then(TimeDelta::try_hours)
        .and_then(|offset| created_at.checked_sub_signed(offset));
    if posted_at.is_none() {
        warn!(number = age.number, unit = age.unit.canonical(), "posting age out of range");
    }
    PostingDate {
        age: Some(age),
        hours: hours.filter(|_| posted_at.is_some()),
        posted_at,
    }
}

pub fn is_homeoffice(description: &str) -> bool {
    description.to_lowercase().contains("homeoffice")
}

pub fn derive_features(rows: Vec<JobRow>, settings: &FeatureSettings) -> FeatureTable {
    let (decoded, skipped_rows) = decompose_identities(rows);
    let deduplicated = deduplicate(decoded, settings.dedup_keep);
    let (base, identities): (Vec<JobRow>, Vec<JobIdentity>) = deduplicated.into_iter().unzip();

    let keywords = keyword_columns(&base, &settings.keywords);
    let extensions = unpivot_extensions(&base, &settings.day_hour_regex);

    let records = base
        .into_iter()
        .zip(identities)
        .map(|(row, identity)| {
            let row_keywords = keywords
                .iter()
                .map(|(category, column)| {
                    (
                        category.clone(),
                        column.get(&row.job_id).cloned().unwrap_or_default(),
                    )
                })
                .collect();
            let extension = extensions.get(&row.job_id).cloned().unwrap_or_default();
            let posted = posting_date(
                row.created_at,
                extension.posted_n_periods_ago.as_deref(),
                &settings.day_hour_regex,
            );
            let (description_length, description_tokens) = text_metrics(&row.description);

            FeatureRecord {
                homeoffice: is_homeoffice(&row.description),
                search_id: row.search_id,
                job_id: row.job_id,
                htidocid: identity.htidocid,
                job_title: identity.job_title,
                title: row.title,
                company_name: row.company_name,
                location: row.location,
                via: row.via,
                q: row.query,
                google_jobs_url: row.google_jobs_url,
                created_at: row.created_at,
                description: row.description,
                description_length,
                description_tokens,
                keywords: row_keywords,
                employment_type: extension.employment_type,
                posted_n_periods_ago: extension.posted_n_periods_ago,
                posted_number: posted.age.map(|age| age.number),
                posted_unit: posted.age.map(|age| age.unit.canonical().to_string()),
                posted_hours: posted.hours,
                posted_at: posted.posted_at,
            }
        })
        .collect();

    FeatureTable {
        keyword_columns: keywords.keys().cloned().collect(),
        records,
        skipped_rows,
    }
}

const LEADING_COLUMNS: [&str; 14] = [
    "search_id",
    "job_id",
    "htidocid",
    "job_title",
    "title",
    "company_name",
    "location",
    "via",
    "q",
    "google_jobs_url",
    "created_at",
    "description",
    "description_length",
    "description_tokens",
];

const TRAILING_COLUMNS: [&str; 7] = [
    "employment_type",
    "posted_n_periods_ago",
    "posted_number",
    "posted_unit",
    "posted_hours",
    "posted_at",
    "homeoffice",
];

impl FeatureTable {
    pub fn header(&self) -> Vec<String> {
        LEADING_COLUMNS
            .iter()
            .map(|column| column.to_string())
            .chain(self.keyword_columns.iter().cloned())
            .chain(TRAILING_COLUMNS.iter().map(|column| column.to_string()))
            .collect()
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, PipelineError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_writer(Vec::new());
        writer
            .write_record(self.header())
            .map_err(|err| PipelineError::Csv(err.to_string()))?;

        for record in &self.records {
            let mut fields = vec![
                record.search_id.clone(),
                record.job_id.clone(),
                record.htidocid.clone(),
                optional(&record.job_title),
                optional(&record.title),
                optional(&record.company_name),
                optional(&record.location),
                optional(&record.via),
                optional(&record.q),
                optional(&record.google_jobs_url),
                record.created_at.to_rfc3339(),
                record.description.clone(),
                record.description_length.to_string(),
                record.description_tokens.to_string(),
            ];
            for category in &self.keyword_columns {
                let matches = record.keywords.get(category).cloned().unwrap_or_default();
                fields.push(
                    serde_json::to_string(&matches)
                        .map_err(|err| PipelineError::Serialization(err.to_string()))?,
                );
            }
            fields.extend([
                optional(&record.employment_type),
                optional(&record.posted_n_periods_ago),
                record.posted_number.map(|n| n.to_string()).unwrap_or_default(),
                optional(&record.posted_unit),
                record.posted_hours.map(|h| h.to_string()).unwrap_or_default(),
                record
                    .posted_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
                record.homeoffice.to_string(),
            ]);
            writer
                .write_record(&fields)
                .map_err(|err| PipelineError::Csv(err.to_string()))?;
        }

        writer
            .into_inner()
            .map_err(|err| PipelineError::Csv(err.to_string()))
    }
}

fn optional(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

pub fn final_table_schema(keyword_columns: &[String]) -> Vec<FieldSchema> {
    let mut schema = vec![
        FieldSchema::required("search_id", "STRING"),
        FieldSchema::required("job_id", "STRING"),
        FieldSchema::required("htidocid", "STRING"),
        FieldSchema::nullable("job_title", "STRING"),
        FieldSchema::nullable("title", "STRING"),
        FieldSchema::nullable("company_name", "STRING"),
        FieldSchema::nullable("location", "STRING"),
        FieldSchema::nullable("via", "STRING"),
        FieldSchema::nullable("q", "STRING"),
        FieldSchema::nullable("google_jobs_url", "STRING"),
        FieldSchema::required("created_at", "TIMESTAMP"),
        FieldSchema::nullable("description", "STRING"),
        FieldSchema::nullable("description_length", "INTEGER"),
        FieldSchema::nullable("description_tokens", "INTEGER"),
    ];
    schema.extend(
        keyword_columns
            .iter()
            .map(|column| FieldSchema::repeated(column, "STRING")),
    );
    schema.extend([
        FieldSchema::nullable("employment_type", "STRING"),
        FieldSchema::nullable("posted_n_periods_ago", "STRING"),
        FieldSchema::nullable("posted_number", "INTEGER"),
        FieldSchema::nullable("posted_unit", "STRING"),
        FieldSchema::nullable("posted_hours", "INTEGER"),
        FieldSchema::nullable("posted_at", "TIMESTAMP"),
        FieldSchema::nullable("homeoffice", "BOOLEAN"),
    ]);
    schema
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::classify::{DEFAULT_DAY_HOUR_PATTERN, PeriodUnit};

    fn pattern() -> Regex {
        Regex::new(DEFAULT_DAY_HOUR_PATTERN).unwrap()
    }

    fn row(job_id: &str, created_at: DateTime<Utc>) -> JobRow {
        JobRow {
            search_id: "s1".to_string(),
            job_id: job_id.to_string(),
            title: Some("Data Analyst".to_string()),
            company_name: None,
            location: None,
            via: None,
            description: "Python und SQL, Homeoffice möglich".to_string(),
            extensions: vec![json!("vor 3 Tagen"), json!("Vollzeit")],
            created_at,
            google_jobs_url: None,
            query: Some("Data Analyst".to_string()),
        }
    }

    fn settings() -> FeatureSettings {
        let mut keywords = KeywordCategories::new();
        keywords.insert("programming_languages".to_string(), vec!["Python".to_string(), "SQL".to_string()]);
        FeatureSettings {
            keywords,
            day_hour_regex: pattern(),
            dedup_keep: DedupKeep::Earliest,
            output_csv: "job_results.csv".into(),
            load_final_table: false,
        }
    }

    #[test]
    fn posting_date_in_days() {
        let created = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let posted = posting_date(created, Some("vor 3 Tagen"), &pattern());
        let age = posted.age.unwrap();
        assert_eq!(age.number, 3);
        assert_eq!(age.unit, PeriodUnit::Day);
        assert_eq!(posted.hours, Some(72));
        assert_eq!(
            posted.posted_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn posting_date_in_hours() {
        let created = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let posted = posting_date(created, Some("vor 5 Stunden"), &pattern());
        assert_eq!(posted.age.map(|age| age.unit.canonical()), Some("Stunde"));
        assert_eq!(
            posted.posted_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 10, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn posting_date_out_of_range_is_null() {
        let created = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let posted = posting_date(created, Some("vor 3000000000000 Stunden"), &pattern());
        assert_eq!(posted.age.map(|age| age.number), Some(3_000_000_000_000));
        assert_eq!(posted.hours, None);
        assert_eq!(posted.posted_at, None);

        let posted = posting_date(created, Some("vor 9000000000000000000 Tagen"), &pattern());
        assert_eq!(posted.hours, None);
        assert_eq!(posted.posted_at, None);
    }

    #[test]
    fn posting_date_without_extension_is_null() {
        let created = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(posting_date(created, None, &pattern()), PostingDate::default());
    }

    #[test]
    fn invalid_category_is_skipped() {
        let mut categories = KeywordCategories::new();
        categories.insert("empty".to_string(), Vec::new());
        categories.insert("langs".to_string(), vec!["Python".to_string()]);
        let rows = vec![row("j1", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())];
        let columns = keyword_columns(&rows, &categories);
        assert!(!columns.contains_key("empty"));
        assert_eq!(columns["langs"]["j1"], vec!["Python"]);
    }

    #[test]
    fn blank_keyword_is_invalid() {
        let err = validate_keywords("tools", &["Excel".to_string(), " ".to_string()]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidKeywords { .. }));
    }

    #[test]
    fn duplicate_extension_keeps_first() {
        let mut job = row("j1", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        job.extensions = vec![
            json!("Teilzeit"),
            json!("Vollzeit"),
            json!("Krankenversicherung"),
            json!(5),
        ];
        let columns = unpivot_extensions(&[job], &pattern());
        assert_eq!(
            columns["j1"],
            ExtensionColumns {
                employment_type: Some("Teilzeit".to_string()),
                posted_n_periods_ago: None,
            }
        );
    }

    #[test]
    fn dedup_latest_keeps_newest() {
        let older = row(r#"{"htidocid":"abc"}"#, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut newer = row(r#"{"htidocid":"abc"}"#, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        newer.search_id = "s2".to_string();
        let (decoded, skipped) = decompose_identities(vec![older, newer]);
        assert_eq!(skipped, 0);
        let kept = deduplicate(decoded, DedupKeep::Latest);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].0.search_id, "s2");
    }

    #[test]
    fn derive_features_fills_columns() {
        let created = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let rows = vec![
            row(r#"{"htidocid":"abc","job_title":"Data Analyst"}"#, created),
            row("not a job id", created),
        ];
        let table = derive_features(rows, &settings());
        assert_eq!(table.skipped_rows, 1);
        assert_eq!(table.records.len(), 1);
        let record = &table.records[0];
        assert_eq!(record.htidocid, "abc");
        assert_eq!(record.keywords["programming_languages"], vec!["Python", "SQL"]);
        assert_eq!(record.employment_type.as_deref(), Some("Vollzeit"));
        assert_eq!(record.posted_hours, Some(72));
        assert!(record.homeoffice);
        assert_eq!(record.description_tokens, 5);
    }

    #[test]
    fn csv_uses_semicolons_and_json_lists() {
        let created = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let settings = settings();
        let table = derive_features(vec![row(r#"{"htidocid":"abc"}"#, created)], &settings);
        let csv = String::from_utf8(table.to_csv().unwrap()).unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("search_id;job_id;htidocid;"));
        assert!(header.contains(";programming_languages;"));
        let data = lines.next().unwrap();
        assert!(data.contains(r#""[""Python"",""SQL""]""#));
    }
}
