//! Record storage. Implementations must never persist virtual fields.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::CoreError;
use crate::{fernbook_dir, PlantRecord};

pub trait RecordStore: Send + Sync {
    fn load(&self, id: &str) -> Result<PlantRecord, CoreError>;

    /// Persist `record`, minus its virtual fields.
    fn save(&self, record: &PlantRecord) -> Result<(), CoreError>;
}

/// One JSON file per record in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// ~/.fernbook/records
    pub fn default_location() -> Self {
        Self::new(fernbook_dir().join("records"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, CoreError> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Ids of all stored records, sorted. Files whose stem is not a valid id are skipped.
    pub fn list(&self) -> Result<Vec<String>, CoreError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut ids: Vec<String> = fs::read_dir(&self.dir)
            .map_err(|e| CoreError::io(&self.dir, e))?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    return None;
                }
                let id = name.strip_suffix(".json")?;
                if let Err(e) = validate_id(id) {
                    tracing::warn!(file = %name, "skipping record file: {}", e);
                    return None;
                }
                Some(id.to_string())
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl RecordStore for FileStore {
    fn load(&self, id: &str) -> Result<PlantRecord, CoreError> {
        let path = self.record_path(id)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::RecordNotFound(id.to_string()))
            }
            Err(e) => return Err(CoreError::io(&path, e)),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    /// Atomic write (temp file + rename) so readers never see a half-written record.
    fn save(&self, record: &PlantRecord) -> Result<(), CoreError> {
        let path = self.record_path(&record.id)?;
        fs::create_dir_all(&self.dir).map_err(|e| CoreError::io(&self.dir, e))?;

        let mut persisted = record.clone();
        persisted.retain_persisted();
        let json = serde_json::to_string_pretty(&persisted)?;

        let tmp = self.dir.join(format!(".{}.json.tmp", record.id));
        fs::write(&tmp, json).map_err(|e| CoreError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            CoreError::io(&path, e)
        })
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, PlantRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = PlantRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|mut record| {
                record.retain_persisted();
                (record.id.clone(), record)
            })
            .collect();
        Self {
            records: Mutex::new(map),
        }
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, id: &str) -> Result<PlantRecord, CoreError> {
        let map = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.get(id)
            .cloned()
            .ok_or_else(|| CoreError::RecordNotFound(id.to_string()))
    }

    fn save(&self, record: &PlantRecord) -> Result<(), CoreError> {
        let mut persisted = record.clone();
        persisted.retain_persisted();
        let mut map = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.insert(persisted.id.clone(), persisted);
        Ok(())
    }
}

/// Ids become file names: no separators, no leading dot.
fn validate_id(id: &str) -> Result<(), CoreError> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidRecordId(id.to_string()))
    }
}
