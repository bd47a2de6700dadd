use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{SaveLocation, SearchId};
use crate::error::PipelineError;
use crate::google::{GoogleHttp, GoogleService, api_url};

#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub location: SaveLocation,
    pub local_root: Utf8PathBuf,
    pub bucket: String,
    pub raw_dir: String,
    pub processed_dir: String,
    pub final_dir: String,
    pub file_name: String,
    pub extension: String,
}

impl StorageLayout {
    pub fn successful_dir(&self) -> String {
        format!("{}/successful", self.raw_dir)
    }

    pub fn error_dir(&self) -> String {
        format!("{}/error", self.raw_dir)
    }

    pub fn raw_file_name(&self, id: &SearchId) -> String {
        format!("{}_{}", self.file_name, id)
    }

    pub fn object_path(&self, dir: &str, file_name: &str) -> String {
        let dir = dir.trim_end_matches('/');
        if dir.is_empty() {
            format!("{file_name}.{}", self.extension)
        } else {
            format!("{dir}/{file_name}.{}", self.extension)
        }
    }
}

pub trait ObjectStore: Send + Sync {
    fn put(&self, path: &str, content: &[u8], content_type: &str) -> Result<(), PipelineError>;
    fn get(&self, path: &str) -> Result<Vec<u8>, PipelineError>;
    fn list(&self, prefix: &str) -> Result<Vec<String>, PipelineError>;
    fn uri(&self, path: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: Utf8PathBuf,
}

impl LocalStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn resolve(&self, path: &str) -> Utf8PathBuf {
        self.root.join(path)
    }
}

impl ObjectStore for LocalStore {
    fn put(&self, path: &str, content: &[u8], _content_type: &str) -> Result<(), PipelineError> {
        write_bytes_atomic(&self.resolve(path), content)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, PipelineError> {
        let full = self.resolve(path);
        fs::read(full.as_std_path()).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => PipelineError::ObjectNotFound(full.to_string()),
            _ => PipelineError::Filesystem(format!("read {full}: {err}")),
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, PipelineError> {
        let dir = self.resolve(prefix);
        if !dir.as_std_path().is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for path in walk_dir(dir.as_std_path())? {
            if !path.is_file() {
                continue;
            }
            let relative = path
                .strip_prefix(self.root.as_std_path())
                .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
            let relative = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            names.push(relative);
        }
        names.sort();
        Ok(names)
    }

    fn uri(&self, path: &str) -> String {
        self.resolve(path).to_string()
    }
}

#[derive(Clone)]
pub struct GcsStore {
    http: GoogleHttp,
    bucket: String,
    base_url: String,
}

impl GcsStore {
    pub fn new(bucket: &str, access_token: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            http: GoogleHttp::new(access_token, GoogleService::Storage)?,
            bucket: bucket.to_string(),
            base_url: "https://storage.googleapis.com".to_string(),
        })
    }

    fn object_url(&self, path: &str) -> Result<reqwest::Url, PipelineError> {
        api_url(
            &self.base_url,
            &["storage", "v1", "b", &self.bucket, "o", path],
        )
    }
}

impl ObjectStore for GcsStore {
    fn put(&self, path: &str, content: &[u8], content_type: &str) -> Result<(), PipelineError> {
        let mut url = api_url(&self.base_url, &["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", path);
        let response = self.http.send_with_retries(|| {
            self.http
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(content.to_vec())
        })?;
        self.http.handle_status(response)?;
        debug!(bucket = %self.bucket, path, "uploaded object");
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, PipelineError> {
        let mut url = self.object_url(path)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self.http.send_with_retries(|| self.http.get(url.clone()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PipelineError::ObjectNotFound(self.uri(path)));
        }
        let response = self.http.handle_status(response)?;
        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| PipelineError::StorageHttp(err.to_string()))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, PipelineError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = api_url(&self.base_url, &["storage", "v1", "b", &self.bucket, "o"])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", prefix);
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let response = self.http.send_with_retries(|| self.http.get(url.clone()))?;
            let page: Value = self
                .http
                .handle_status(response)?
                .json()
                .map_err(|err| PipelineError::StorageHttp(err.to_string()))?;
            if let Some(items) = page.get("items").and_then(Value::as_array) {
                names.extend(
                    items
                        .iter()
                        .filter_map(|item| item.get("name").and_then(Value::as_str))
                        // the directory placeholder object itself
                        .filter(|name| !name.ends_with('/'))
                        .map(str::to_string),
                );
            }
            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }
        Ok(names)
    }

    fn uri(&self, path: &str) -> String {
        format!("gs://{}/{}", self.bucket, path)
    }
}

pub enum StorageBackend {
    Local(LocalStore),
    Gcs(GcsStore),
}

impl StorageBackend {
    pub fn from_layout(
        layout: &StorageLayout,
        access_token: Option<&str>,
    ) -> Result<Self, PipelineError> {
        match layout.location {
            SaveLocation::Local => Ok(StorageBackend::Local(LocalStore::new(
                layout.local_root.clone(),
            ))),
            SaveLocation::Gcs => {
                let token = access_token.ok_or_else(|| {
                    PipelineError::MissingCredential("GCP_ACCESS_TOKEN".to_string())
                })?;
                Ok(StorageBackend::Gcs(GcsStore::new(&layout.bucket, token)?))
            }
        }
    }
}

impl ObjectStore for StorageBackend {
    fn put(&self, path: &str, content: &[u8], content_type: &str) -> Result<(), PipelineError> {
        match self {
            StorageBackend::Local(store) => store.put(path, content, content_type),
            StorageBackend::Gcs(store) => store.put(path, content, content_type),
        }
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, PipelineError> {
        match self {
            StorageBackend::Local(store) => store.get(path),
            StorageBackend::Gcs(store) => store.get(path),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, PipelineError> {
        match self {
            StorageBackend::Local(store) => store.list(prefix),
            StorageBackend::Gcs(store) => store.list(prefix),
        }
    }

    fn uri(&self, path: &str) -> String {
        match self {
            StorageBackend::Local(store) => store.uri(path),
            StorageBackend::Gcs(store) => store.uri(path),
        }
    }
}

pub struct FilePersistence<S: ObjectStore> {
    store: S,
    layout: StorageLayout,
}

impl<S: ObjectStore> FilePersistence<S> {
    pub fn new(store: S, layout: StorageLayout) -> Self {
        Self { store, layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn save_json<T: Serialize>(
        &self,
        dir: &str,
        file_name: &str,
        value: &T,
    ) -> Result<String, PipelineError> {
        let content = match self.layout.location {
            SaveLocation::Local => serde_json::to_vec_pretty(value),
            SaveLocation::Gcs => serde_json::to_vec(value),
        }
        .map_err(|err| PipelineError::Serialization(err.to_string()))?;
        let path = self.layout.object_path(dir, file_name);
        self.store.put(&path, &content, "application/json")?;
        info!(path = %path, location = %self.layout.location, "saved file");
        Ok(path)
    }

    pub fn save_ndjson<T: Serialize>(
        &self,
        dir: &str,
        file_name: &str,
        records: &[T],
    ) -> Result<String, PipelineError> {
        let content = to_ndjson(records)?;
        let path = self.layout.object_path(dir, file_name);
        self.store
            .put(&path, &content, "application/x-ndjson")?;
        info!(path = %path, records = records.len(), "saved newline-delimited file");
        Ok(path)
    }

    pub fn load_json(&self, dir: &str, file_name: &str) -> Result<Value, PipelineError> {
        let path = self.layout.object_path(dir, file_name);
        let bytes = self.store.get(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|err| PipelineError::Serialization(format!("{path}: {err}")))
    }

    pub fn list_search_ids(&self, dir: &str, prefix: &str) -> Result<Vec<SearchId>, PipelineError> {
        let dir = dir.trim_end_matches('/');
        let mut ids = Vec::new();
        for name in self.store.list(&format!("{dir}/"))? {
            let Some(file) = name.rsplit('/').next() else {
                continue;
            };
            match search_id_from_file_name(file, prefix) {
                Some(id) => ids.push(id),
                None => debug!(file, prefix, "skipping file without search id"),
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

pub fn search_id_from_file_name(file: &str, prefix: &str) -> Option<SearchId> {
    let stem = file.split('.').next()?;
    let rest = stem.strip_prefix(prefix)?.strip_prefix('_')?;
    let id = rest.rsplit('_').next()?;
    if id != rest {
        return None;
    }
    id.parse().ok()
}

pub fn to_ndjson<T: Serialize>(records: &[T]) -> Result<Vec<u8>, PipelineError> {
    let mut content = Vec::new();
    for record in records {
        serde_json::to_writer(&mut content, record)
            .map_err(|err| PipelineError::Serialization(err.to_string()))?;
        content.push(b'\n');
    }
    Ok(content)
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PipelineError> {
    let parent = path
        .parent()
        .ok_or_else(|| PipelineError::Filesystem(format!("invalid destination path {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".jobs-etl")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    io::Write::write_all(&mut temp, content)
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    Ok(())
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}
