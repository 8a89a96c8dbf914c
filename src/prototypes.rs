//! Deployable prototypes
//!
//! `prototypes.json` is written by the remote deployment agent. The book
//! keeps the parsed list in memory along with the locally computed
//! subscription flag, which survives reloads by matching on id.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use futures_lite::StreamExt;
use inotify::{Inotify, WatchMask};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::{read_json_or_empty, CatalogGuard, CatalogStore};

/// Persisted form, one element of `prototypes.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrototypeEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "lastDeploy", default, deserialize_with = "lenient_timestamp")]
    pub last_deploy: f64,
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrototypeRecord {
    pub name: String,
    pub id: String,
    pub last_deploy: String,
    pub is_subscribed: bool,
}

impl PrototypeRecord {
    fn from_entry(entry: PrototypeEntry, is_subscribed: bool) -> Self {
        Self {
            name: entry.name,
            id: entry.id,
            last_deploy: format_timestamp(entry.last_deploy),
            is_subscribed,
        }
    }
}

/// Millisecond timestamps print without a fractional part or exponent
fn format_timestamp(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        value.to_string()
    }
}

#[derive(Debug, Default)]
pub struct PrototypeBook {
    records: RwLock<Vec<PrototypeRecord>>,
}

impl PrototypeBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<PrototypeRecord>> {
        self.records.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<PrototypeRecord>> {
        self.records.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Re-read `path` while holding the catalog lock; returns the new count
    pub fn reload(&self, _guard: &CatalogGuard<'_>, path: &Path) -> usize {
        if !path.exists() {
            log::info!("{} does not exist yet", path.display());
        }
        let entries: Vec<PrototypeEntry> = read_json_or_empty(path);

        let mut records = self.write();
        let next: Vec<PrototypeRecord> = entries
            .into_iter()
            .map(|entry| {
                let subscribed = records
                    .iter()
                    .find(|r| r.id == entry.id)
                    .map(|r| r.is_subscribed)
                    .unwrap_or(false);
                PrototypeRecord::from_entry(entry, subscribed)
            })
            .collect();
        *records = next;
        records.len()
    }

    pub fn list(&self) -> Vec<PrototypeRecord> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<PrototypeRecord> {
        self.read().get(index).cloned()
    }

    pub fn find(&self, id: &str) -> Option<PrototypeRecord> {
        self.read().iter().find(|r| r.id == id).cloned()
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.read().iter().any(|r| r.id == id && r.is_subscribed)
    }

    /// Returns false when no prototype has `id`
    pub fn set_subscribed(&self, id: &str, subscribed: bool) -> bool {
        match self.write().iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.is_subscribed = subscribed;
                true
            }
            None => false,
        }
    }

    /// Subscription follows presence of each id in a `docker ps` listing;
    /// returns the ids whose flag flipped
    pub fn sync_running(&self, listing: &str) -> Vec<String> {
        let mut flipped = Vec::new();
        for record in self.write().iter_mut() {
            let running = !record.id.is_empty() && listing.contains(&record.id);
            if record.is_subscribed != running {
                record.is_subscribed = running;
                flipped.push(record.id.clone());
            }
        }
        flipped
    }

    pub fn remove_index(&self, index: usize) -> Option<PrototypeRecord> {
        let mut records = self.write();
        (index < records.len()).then(|| records.remove(index))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Reload `book` whenever `file` inside its directory is closed after
/// writing or moved in. Each reload sends the new prototype count on
/// `notify`. Must be called from within a tokio runtime.
pub fn watch_prototypes(
    book: Arc<PrototypeBook>,
    store: Arc<CatalogStore>,
    file: PathBuf,
    notify: mpsc::Sender<usize>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, WatchError> {
    let dir = file.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let file_name: OsString = file.file_name().map(OsString::from).unwrap_or_default();
    let watch_err = |source| WatchError::Watch {
        path: dir.clone(),
        source,
    };

    std::fs::create_dir_all(&dir).map_err(watch_err)?;
    let inotify = Inotify::init().map_err(watch_err)?;
    inotify
        .watches()
        .add(&dir, WatchMask::CLOSE_WRITE | WatchMask::MOVED_TO)
        .map_err(watch_err)?;
    let mut events = inotify
        .into_event_stream([0u8; 4096])
        .map_err(watch_err)?;

    log::info!("Watching {} for prototype updates", file.display());

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => event,
            };
            match event {
                Some(Ok(event)) if event.name.as_deref() == Some(file_name.as_os_str()) => {
                    let count = {
                        let guard = store.lock().await;
                        book.reload(&guard, &file)
                    };
                    log::info!("Prototypes reloaded: {} available", count);
                    if notify.send(count).await.is_err() {
                        break;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::error!("Prototype watch failed: {}", e);
                    break;
                }
                None => break,
            }
        }
        log::debug!("Prototype watch stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn write_prototypes(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn test_reload_carries_subscription_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prototypes.json");
        write_prototypes(
            &path,
            r#"[{"name": "Wipers", "id": "p1", "lastDeploy": 1718000000000},
                {"name": "Lights", "id": "p2", "lastDeploy": 1718000000001}]"#,
        );
        let store = CatalogStore::new();
        let book = PrototypeBook::new();

        assert_eq!(book.reload(&store.lock().await, &path), 2);
        assert_eq!(book.get(0).unwrap().last_deploy, "1718000000000");
        assert!(book.set_subscribed("p2", true));
        assert!(!book.set_subscribed("nope", true));

        // Reordered with a new entry
        write_prototypes(
            &path,
            r#"[{"name": "Horn", "id": "p3", "lastDeploy": "5"},
                {"name": "Lights v2", "id": "p2", "lastDeploy": 1718000000002}]"#,
        );
        book.reload(&store.lock().await, &path);
        let list = book.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].last_deploy, "5");
        assert!(!list[0].is_subscribed);
        assert_eq!(list[1].name, "Lights v2");
        assert!(list[1].is_subscribed);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new();
        let book = PrototypeBook::new();
        assert_eq!(book.reload(&store.lock().await, &dir.path().join("prototypes.json")), 0);
        assert!(book.is_empty());
    }

    #[tokio::test]
    async fn test_sync_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prototypes.json");
        write_prototypes(&path, r#"[{"name": "A", "id": "p1"}, {"name": "B", "id": "p2"}]"#);
        let store = CatalogStore::new();
        let book = PrototypeBook::new();
        book.reload(&store.lock().await, &path);
        book.set_subscribed("p2", true);

        let flipped = book.sync_running("abc123  base  Up 3s  p1\n");
        assert_eq!(flipped, vec!["p1", "p2"]);
        assert!(book.is_subscribed("p1"));
        assert!(!book.is_subscribed("p2"));
        assert!(book.sync_running("abc123  base  Up 3s  p1\n").is_empty());
    }

    #[test]
    fn test_remove_index_bounds() {
        let book = PrototypeBook::new();
        book.write().push(PrototypeRecord {
            name: "A".into(),
            id: "p1".into(),
            last_deploy: "0".into(),
            is_subscribed: false,
        });
        assert!(book.remove_index(1).is_none());
        assert_eq!(book.remove_index(0).unwrap().id, "p1");
        assert!(book.remove_index(0).is_none());
    }

    #[tokio::test]
    async fn test_watch_reloads_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prototypes").join("prototypes.json");
        let book = Arc::new(PrototypeBook::new());
        let store = Arc::new(CatalogStore::new());
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let task = watch_prototypes(
            Arc::clone(&book),
            Arc::clone(&store),
            path.clone(),
            tx,
            cancel.clone(),
        )
        .unwrap();

        // Unrelated files in the directory are ignored
        fs::write(path.with_file_name("other.json"), "[]").unwrap();
        fs::write(&path, r#"[{"name": "A", "id": "p1", "lastDeploy": 1}]"#).unwrap();

        let count = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(book.get(0).unwrap().id, "p1");

        cancel.cancel();
        task.await.unwrap();
    }
}
