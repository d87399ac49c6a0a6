use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::models::{ExtractedItem, ItemRecord, Query};
use crate::utils::error::{AppError, Result};

pub type KnownItemsIndex = BTreeMap<String, BTreeMap<String, ItemRecord>>;

/// Durable per-query record of every item id that has already been seen.
///
/// The whole index lives in one JSON document which is rewritten on every
/// commit through a temp file and an atomic rename.
pub struct KnownItemStore {
    path: PathBuf,
    index: KnownItemsIndex,
}

impl KnownItemStore {
    /// Loads the index, treating a missing file as an empty one.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<KnownItemsIndex>(&text) {
                Ok(index) => index,
                Err(e) => {
                    let aside = quarantine(&path)?;
                    error!(
                        path = %path.display(),
                        moved_to = %aside.display(),
                        error = %e,
                        "Known items file is unreadable, starting with an empty index"
                    );
                    KnownItemsIndex::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No known items file yet, starting fresh");
                KnownItemsIndex::new()
            }
            Err(e) => return Err(AppError::persistence(&path, e)),
        };

        let total: usize = index.values().map(BTreeMap::len).sum();
        debug!(path = %path.display(), queries = index.len(), items = total, "Loaded known items");
        Ok(Self { path, index })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ensure_query(&mut self, query: &Query) {
        if !self.index.contains_key(query.as_str()) {
            debug!(query = %query, "Initializing known items for new query");
            self.index.insert(query.as_str().to_string(), BTreeMap::new());
        }
    }

    pub fn len(&self, query: &Query) -> usize {
        self.index.get(query.as_str()).map_or(0, BTreeMap::len)
    }

    pub fn contains(&self, query: &Query, id: &str) -> bool {
        self.index
            .get(query.as_str())
            .is_some_and(|bucket| bucket.contains_key(id))
    }

    pub fn get(&self, query: &Query, id: &str) -> Option<&ItemRecord> {
        self.index.get(query.as_str())?.get(id)
    }

    pub fn index(&self) -> &KnownItemsIndex {
        &self.index
    }

    /// Items whose id is not yet known for `query`, in extraction order.
    pub fn diff(&self, query: &Query, extracted: &[ExtractedItem]) -> Vec<ExtractedItem> {
        let mut seen = HashSet::new();
        extracted
            .iter()
            .filter(|item| !self.contains(query, &item.id))
            .filter(|item| seen.insert(item.id.as_str()))
            .cloned()
            .collect()
    }

    pub fn commit(&mut self, query: &Query, new_records: Vec<ItemRecord>) -> Result<usize> {
        self.commit_at(query, new_records, Utc::now())
    }

    /// Merges `new_records` into the query's bucket and writes the whole index.
    ///
    /// Records whose id is already stored are left untouched. When the write
    /// fails the merge is undone, so memory keeps matching the file on disk.
    pub fn commit_at(&mut self, query: &Query, new_records: Vec<ItemRecord>, now: DateTime<Utc>) -> Result<usize> {
        let bucket = self.index.entry(query.as_str().to_string()).or_default();

        let mut inserted = Vec::new();
        for mut record in new_records {
            if bucket.contains_key(&record.id) {
                continue;
            }
            record.first_seen_at = now;
            inserted.push(record.id.clone());
            bucket.insert(record.id.clone(), record);
        }

        if let Err(e) = self.persist() {
            if let Some(bucket) = self.index.get_mut(query.as_str()) {
                for id in &inserted {
                    bucket.remove(id);
                }
            }
            return Err(e);
        }

        debug!(query = %query, inserted = inserted.len(), total = self.len(query), "Committed known items");
        Ok(inserted.len())
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.index)?;
        write_atomically(&self.path, &json).map_err(|e| AppError::persistence(&self.path, e))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

fn quarantine(path: &Path) -> Result<PathBuf> {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")));
    let aside = path.with_file_name(name);
    fs::rename(path, &aside).map_err(|e| AppError::persistence(path, e))?;
    Ok(aside)
}
