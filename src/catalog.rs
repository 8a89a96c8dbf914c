//! Installed-app catalog persistence
//!
//! JSON arrays for installed apps and services, plus the CSV table the app
//! launcher reads. All mutations go through a [`CatalogGuard`] obtained from
//! [`CatalogStore::lock`], so install, remove and reload never interleave.
//!
//! Reading is lenient: a missing or unparseable file is an empty catalog.
//! Mutations are strict about unparseable JSON so a corrupt file is reported
//! instead of silently overwritten.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};

pub const CSV_HEADER: [&str; 4] = ["foldername", "displayname", "executable", "iconpath"];

/// Executable written for every app installed from the marketplace
pub const DEFAULT_EXECUTABLE: &str = "start.sh";

pub const SERVICE_CATEGORY: &str = "vehicle-service";
pub const APP_CATEGORY: &str = "vehicle";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatedBy {
    #[serde(rename = "fullName", default)]
    pub full_name: String,
}

/// Object stored in `installedapps.json` / `installedservices.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub downloads: u64,
    #[serde(rename = "createdBy", default)]
    pub created_by: CreatedBy,
    /// Fields written by other tools survive a rewrite
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Marketplace item as delivered by the package source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub downloads: u64,
    #[serde(rename = "createdBy", default)]
    pub created_by: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageDescriptor {
    pub fn is_service(&self) -> bool {
        self.category.to_lowercase().contains(SERVICE_CATEGORY)
    }

    /// Author from an embedded descriptor document, `fullName`, or "Unknown"
    pub fn author(&self) -> String {
        if let Some(descriptor) = self.created_by.get("descriptor").and_then(Value::as_str) {
            let name = serde_json::from_str::<Value>(descriptor)
                .ok()
                .and_then(|doc| doc.get("name").and_then(Value::as_str).map(str::to_string));
            return name.unwrap_or_default();
        }
        self.created_by
            .get("fullName")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Entry recorded once the package is installed
    pub fn to_catalog_entry(&self) -> CatalogEntry {
        CatalogEntry {
            id: self.id.clone(),
            name: self.name.clone(),
            category: if self.is_service() {
                SERVICE_CATEGORY
            } else {
                APP_CATEGORY
            }
            .to_string(),
            thumbnail: self.thumbnail.clone(),
            downloads: 0,
            created_by: CreatedBy {
                full_name: "Unknown".to_string(),
            },
            extra: Map::new(),
        }
    }

    pub fn to_csv_row(&self) -> CsvAppRow {
        CsvAppRow {
            foldername: self.id.clone(),
            displayname: self.name.clone(),
            executable: DEFAULT_EXECUTABLE.to_string(),
            iconpath: self.thumbnail.clone(),
        }
    }
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Row of `installedapps.csv`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvAppRow {
    pub foldername: String,
    pub displayname: String,
    pub executable: String,
    pub iconpath: String,
}

impl CsvAppRow {
    fn from_record(record: &csv::StringRecord) -> Self {
        let field = |i: usize| record.get(i).unwrap_or("").to_string();
        Self {
            foldername: field(0),
            displayname: field(1),
            executable: field(2),
            iconpath: field(3),
        }
    }

    fn to_record(&self) -> csv::StringRecord {
        csv::StringRecord::from(vec![
            self.foldername.as_str(),
            self.displayname.as_str(),
            self.executable.as_str(),
            self.iconpath.as_str(),
        ])
    }
}

/// Read a JSON array; missing or unparseable files yield an empty list
pub fn read_json_or_empty<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    match read_json_strict(path) {
        Ok(items) => items,
        Err(e) => {
            log::warn!("{}; treating as empty", e);
            Vec::new()
        }
    }
}

/// Missing file is empty; unreadable or unparseable content is an error
pub fn read_json_strict<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CatalogError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(CatalogError::io(path, source)),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|source| CatalogError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace `path` via a sibling temp file and rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CatalogError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(|e| CatalogError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| CatalogError::io(path, e))
}

fn write_json<T: Serialize>(path: &Path, items: &[T]) -> Result<(), CatalogError> {
    write_json_value(path, items)
}

fn write_json_value<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CatalogError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| CatalogError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// All records including the header row at index 0
fn read_csv_records(path: &Path) -> Result<Vec<csv::StringRecord>, CatalogError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(CatalogError::io(path, source)),
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CatalogError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

fn write_csv_records(path: &Path, records: &[csv::StringRecord]) -> Result<(), CatalogError> {
    let csv_err = |source| CatalogError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for record in records {
        writer.write_record(record).map_err(csv_err)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| CatalogError::io(path, e.into_error()))?;
    write_atomic(path, &bytes)
}

fn header_record() -> csv::StringRecord {
    csv::StringRecord::from(CSV_HEADER.to_vec())
}

/// Serializes every catalog read-modify-write within this process
#[derive(Debug, Default)]
pub struct CatalogStore {
    lock: Mutex<()>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> CatalogGuard<'_> {
        CatalogGuard {
            _guard: self.lock.lock().await,
        }
    }
}

/// Exclusive access to the catalog files while held
pub struct CatalogGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl CatalogGuard<'_> {
    pub fn load<T: DeserializeOwned>(&self, path: &Path) -> Vec<T> {
        read_json_or_empty(path)
    }

    pub fn append<T: Serialize + DeserializeOwned>(
        &self,
        path: &Path,
        record: T,
    ) -> Result<(), CatalogError> {
        let mut items: Vec<T> = read_json_strict(path)?;
        items.push(record);
        write_json(path, &items)
    }

    pub fn remove_at<T: Serialize + DeserializeOwned>(
        &self,
        path: &Path,
        index: usize,
    ) -> Result<T, CatalogError> {
        let mut items: Vec<T> = read_json_strict(path)?;
        if index >= items.len() {
            return Err(CatalogError::IndexOutOfRange {
                index,
                len: items.len(),
            });
        }
        let removed = items.remove(index);
        write_json(path, &items)?;
        Ok(removed)
    }

    pub fn replace_all<T: Serialize>(&self, path: &Path, records: &[T]) -> Result<(), CatalogError> {
        write_json(path, records)
    }

    /// Append `entry` unless an entry with the same id exists; returns whether it was added
    pub fn append_entry_if_absent(
        &self,
        path: &Path,
        entry: CatalogEntry,
    ) -> Result<bool, CatalogError> {
        let mut items: Vec<CatalogEntry> = read_json_strict(path)?;
        if items.iter().any(|e| e.id == entry.id) {
            log::debug!("{} already lists {}", path.display(), entry.id);
            return Ok(false);
        }
        items.push(entry);
        write_json(path, &items)?;
        Ok(true)
    }

    /// Drop every entry with `id`; returns whether the file changed
    pub fn remove_entry(&self, path: &Path, id: &str) -> Result<bool, CatalogError> {
        let mut items: Vec<CatalogEntry> = read_json_strict(path)?;
        let before = items.len();
        items.retain(|e| e.id != id);
        if items.len() == before {
            return Ok(false);
        }
        write_json(path, &items)?;
        Ok(true)
    }

    /// Data rows (header excluded); missing file is empty
    pub fn load_csv(&self, path: &Path) -> Vec<CsvAppRow> {
        match read_csv_records(path) {
            Ok(records) => records.iter().skip(1).map(CsvAppRow::from_record).collect(),
            Err(e) => {
                log::warn!("{}; treating as empty", e);
                Vec::new()
            }
        }
    }

    /// Write a header-only table if the file does not exist
    pub fn ensure_csv(&self, path: &Path) -> Result<(), CatalogError> {
        if path.exists() {
            return Ok(());
        }
        write_csv_records(path, &[header_record()])
    }

    /// Append `row` unless its folder name is already listed; returns whether it was added
    pub fn append_csv_if_absent(&self, path: &Path, row: &CsvAppRow) -> Result<bool, CatalogError> {
        let mut records = read_csv_records(path)?;
        if records.is_empty() {
            records.push(header_record());
        }
        if records
            .iter()
            .skip(1)
            .any(|r| r.get(0) == Some(row.foldername.as_str()))
        {
            return Ok(false);
        }
        records.push(row.to_record());
        write_csv_records(path, &records)?;
        Ok(true)
    }

    /// Remove data row `index`; file record `index + 1` since record 0 is the header
    pub fn remove_csv_at(&self, path: &Path, index: usize) -> Result<CsvAppRow, CatalogError> {
        let mut records = read_csv_records(path)?;
        let rows = records.len().saturating_sub(1);
        if index >= rows {
            return Err(CatalogError::IndexOutOfRange { index, len: rows });
        }
        let removed = records.remove(index + 1);
        write_csv_records(path, &records)?;
        Ok(CsvAppRow::from_record(&removed))
    }

    /// Remove every data row whose folder name is `id`; returns how many went
    pub fn remove_csv_id(&self, path: &Path, id: &str) -> Result<usize, CatalogError> {
        let mut records = read_csv_records(path)?;
        if records.is_empty() {
            return Ok(0);
        }
        let before = records.len();
        let header = records.remove(0);
        records.retain(|r| r.get(0) != Some(id));
        let removed = before - 1 - records.len();
        if removed > 0 {
            records.insert(0, header);
            write_csv_records(path, &records)?;
        }
        Ok(removed)
    }

    /// Delete `<dir>/<id>` and `<dir>/<id>.zip`; absent paths are fine
    pub fn remove_app_files(&self, dir: &Path, id: &str) -> Result<(), CatalogError> {
        let folder = dir.join(id);
        match fs::remove_dir_all(&folder) {
            Ok(()) => log::debug!("removed {}", folder.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CatalogError::io(&folder, e)),
        }
        let archive = dir.join(format!("{}.zip", id));
        match fs::remove_file(&archive) {
            Ok(()) => log::debug!("removed {}", archive.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CatalogError::io(&archive, e)),
        }
        Ok(())
    }

    /// Overwrite `path` with a single JSON document
    pub fn replace_json<T: Serialize + ?Sized>(&self, path: &Path, contents: &T) -> Result<(), CatalogError> {
        write_json_value(path, contents)
    }

    /// Write `contents` to `path` unless it already exists; returns whether it was written
    pub fn write_if_missing<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        contents: &T,
    ) -> Result<bool, CatalogError> {
        if path.exists() {
            return Ok(false);
        }
        write_json_value(path, contents)?;
        Ok(true)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid CSV in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("Index {index} out of range ({len} entries)")]
    IndexOutOfRange { index: usize, len: usize },
}

impl CatalogError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, name: &str, category: &str) -> PackageDescriptor {
        serde_json::from_value(serde_json::json!({
            "_id": id,
            "name": name,
            "category": category,
            "thumbnail": "t.png",
            "downloads": 12,
            "createdBy": {"fullName": "Jane"},
            "dashboardConfig": "{}"
        }))
        .unwrap()
    }

    #[test]
    fn test_descriptor_classification() {
        assert!(descriptor("s", "S", "Vehicle-Service").is_service());
        assert!(!descriptor("a", "A", "vehicle").is_service());

        let entry = descriptor("s", "S", "vehicle-service/can").to_catalog_entry();
        assert_eq!(entry.category, SERVICE_CATEGORY);
        assert_eq!(entry.downloads, 0);
        assert_eq!(entry.created_by.full_name, "Unknown");
    }

    #[test]
    fn test_descriptor_author() {
        assert_eq!(descriptor("a", "A", "vehicle").author(), "Jane");

        let mut d = descriptor("a", "A", "vehicle");
        d.created_by = serde_json::json!({"descriptor": "{\"name\": \"Acme\"}"});
        assert_eq!(d.author(), "Acme");

        d.created_by = Value::Null;
        assert_eq!(d.author(), "Unknown");
    }

    #[test]
    fn test_descriptor_keeps_unknown_fields() {
        let d = descriptor("a", "A", "vehicle");
        assert_eq!(d.extra.get("dashboardConfig"), Some(&Value::String("{}".into())));
    }

    #[test]
    fn test_lenient_downloads() {
        let entry: CatalogEntry =
            serde_json::from_str(r#"{"_id": "x", "downloads": "17"}"#).unwrap();
        assert_eq!(entry.downloads, 17);
        let entry: CatalogEntry = serde_json::from_str(r#"{"_id": "x", "downloads": 3.0}"#).unwrap();
        assert_eq!(entry.downloads, 3);
    }

    #[tokio::test]
    async fn test_absent_json_loads_empty_then_append_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dk_installedapps/installedapps.json");
        let store = CatalogStore::new();
        let guard = store.lock().await;

        assert!(guard.load::<CatalogEntry>(&path).is_empty());
        guard
            .append(&path, descriptor("abc", "Test", "vehicle").to_catalog_entry())
            .unwrap();

        let loaded: Vec<CatalogEntry> = guard.load(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "abc");
        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 1);
        assert_eq!(raw[0]["createdBy"]["fullName"], "Unknown");
    }

    #[tokio::test]
    async fn test_corrupt_json_is_empty_on_load_but_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.json");
        fs::write(&path, "[{broken").unwrap();
        let store = CatalogStore::new();
        let guard = store.lock().await;

        assert!(guard.load::<CatalogEntry>(&path).is_empty());
        let err = guard
            .append_entry_if_absent(&path, descriptor("a", "A", "vehicle").to_catalog_entry())
            .unwrap_err();
        assert!(matches!(err, CatalogError::Json { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "[{broken");
    }

    #[tokio::test]
    async fn test_append_entry_if_absent_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.json");
        let store = CatalogStore::new();
        let guard = store.lock().await;
        let entry = descriptor("abc", "Test", "vehicle").to_catalog_entry();

        assert!(guard.append_entry_if_absent(&path, entry.clone()).unwrap());
        assert!(!guard.append_entry_if_absent(&path, entry).unwrap());
        assert_eq!(guard.load::<CatalogEntry>(&path).len(), 1);

        assert!(guard.remove_entry(&path, "abc").unwrap());
        assert!(!guard.remove_entry(&path, "abc").unwrap());
        assert!(guard.load::<CatalogEntry>(&path).is_empty());
    }

    #[tokio::test]
    async fn test_remove_at_and_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        let store = CatalogStore::new();
        let guard = store.lock().await;

        guard.replace_all(&path, &["a", "b", "c"]).unwrap();
        assert_eq!(guard.remove_at::<String>(&path, 1).unwrap(), "b");
        assert_eq!(guard.load::<String>(&path), vec!["a", "c"]);
        assert!(matches!(
            guard.remove_at::<String>(&path, 2),
            Err(CatalogError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    fn row(id: &str) -> CsvAppRow {
        CsvAppRow {
            foldername: id.to_string(),
            displayname: format!("App {}", id),
            executable: DEFAULT_EXECUTABLE.to_string(),
            iconpath: format!("{}.png", id),
        }
    }

    const HEADER_LINE: &str = "foldername,displayname,executable,iconpath\n";

    #[tokio::test]
    async fn test_csv_append_writes_header_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installedapps/installedapps.csv");
        let store = CatalogStore::new();
        let guard = store.lock().await;

        let d = descriptor("abc", "Test", "vehicle");
        assert!(guard.append_csv_if_absent(&path, &d.to_csv_row()).unwrap());
        assert!(!guard.append_csv_if_absent(&path, &d.to_csv_row()).unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}abc,Test,start.sh,t.png\n", HEADER_LINE)
        );
    }

    #[tokio::test]
    async fn test_csv_remove_first_and_last_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.csv");
        let store = CatalogStore::new();
        let guard = store.lock().await;
        for id in ["a", "b", "c"] {
            guard.append_csv_if_absent(&path, &row(id)).unwrap();
        }

        // Index 0 is the first data row, never the header
        assert_eq!(guard.remove_csv_at(&path, 0).unwrap().foldername, "a");
        let rows = guard.load_csv(&path);
        assert_eq!(rows, vec![row("b"), row("c")]);

        // Last row
        assert_eq!(guard.remove_csv_at(&path, 1).unwrap().foldername, "c");
        assert_eq!(guard.load_csv(&path), vec![row("b")]);

        assert!(matches!(
            guard.remove_csv_at(&path, 1),
            Err(CatalogError::IndexOutOfRange { index: 1, len: 1 })
        ));

        guard.remove_csv_at(&path, 0).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), HEADER_LINE);
        assert!(matches!(
            guard.remove_csv_at(&path, 0),
            Err(CatalogError::IndexOutOfRange { index: 0, len: 0 })
        ));
    }

    #[tokio::test]
    async fn test_csv_short_rows_keep_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.csv");
        fs::write(&path, format!("{}a,App a\nb,App b,run.sh,b.png\n", HEADER_LINE)).unwrap();
        let store = CatalogStore::new();
        let guard = store.lock().await;

        let rows = guard.load_csv(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].executable, "");
        assert_eq!(rows[1].foldername, "b");

        assert_eq!(guard.remove_csv_id(&path, "a").unwrap(), 1);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}b,App b,run.sh,b.png\n", HEADER_LINE)
        );
    }

    #[tokio::test]
    async fn test_missing_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.csv");
        let store = CatalogStore::new();
        let guard = store.lock().await;

        assert!(guard.load_csv(&path).is_empty());
        assert_eq!(guard.remove_csv_id(&path, "x").unwrap(), 0);
        guard.ensure_csv(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), HEADER_LINE);
    }

    #[tokio::test]
    async fn test_remove_app_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("abc/bin")).unwrap();
        fs::write(dir.path().join("abc/bin/start.sh"), "#!/bin/sh").unwrap();
        fs::write(dir.path().join("abc.zip"), "PK").unwrap();

        let store = CatalogStore::new();
        let guard = store.lock().await;
        guard.remove_app_files(dir.path(), "abc").unwrap();
        assert!(!dir.path().join("abc").exists());
        assert!(!dir.path().join("abc.zip").exists());
        // Second removal finds nothing and still succeeds
        guard.remove_app_files(dir.path(), "abc").unwrap();
    }

    #[tokio::test]
    async fn test_write_if_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dk_marketplace/abc_installcfg.json");
        let store = CatalogStore::new();
        let guard = store.lock().await;

        let d = descriptor("abc", "Test", "vehicle");
        assert!(guard.write_if_missing(&path, &d).unwrap());
        assert!(!guard.write_if_missing(&path, &descriptor("zzz", "Z", "vehicle")).unwrap());
        let stored: PackageDescriptor =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.id, "abc");
    }
}
