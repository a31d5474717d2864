use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::storage::redb_file::check_database_file;
use redb::{Database, ReadableTable, TableDefinition};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::SystemTime;

/// Table definition for file state tracking
/// Using &str for both key and value (JSON serialized)
const FILE_STATE_TABLE: TableDefinition<&str, &str> = TableDefinition::new("file_state");

/// Run-level metadata, e.g. the model the index was built with
const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");

const META_MODEL_ID_KEY: &str = "model_id";

/// State information for an indexed file
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FileState {
    /// SHA256 hash of the decoded file content
    pub content_hash: String,
    /// Last modification time (Unix seconds)
    pub last_modified: u64,
    /// Embedding model used for this file's records
    pub model_id: String,
    /// Number of chunks written for the file
    pub chunk_count: usize,
    /// Chunk window the records were cut with
    #[serde(default)]
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
    /// Timestamp when file was last indexed
    pub indexed_at: u64,
}

impl FileState {
    /// Create a new file state for records built with `config`, stamped with the current time
    pub fn new(content_hash: String, last_modified: u64, config: &Config, chunk_count: usize) -> Self {
        Self {
            content_hash,
            last_modified,
            model_id: config.model_id.clone(),
            chunk_count,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            indexed_at: SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    /// Serialize to JSON string
    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Database(format!("Failed to serialize file state: {}", e)))
    }

    /// Deserialize from JSON string
    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Database(format!("Failed to deserialize file state: {}", e)))
    }
}

/// State store for tracking which files are indexed and with what content
pub struct StateStore {
    db: Database,
}

impl StateStore {
    /// Open or create the state store
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_path(&config.state_path())
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        check_database_file(path)
            .map_err(|e| Error::Database(format!("Refusing to open state database: {}", e)))?;

        let db = Database::create(path).map_err(|e| {
            let msg = e.to_string();
            if msg.to_lowercase().contains("lock") {
                Error::Database("State database is locked. Another src2vec process may be running. Close other instances and try again.".to_string())
            } else {
                Error::Database(format!("Failed to open state database: {}", e))
            }
        })?;

        // Initialize tables (safe even if they already exist)
        let write_txn = db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;
        {
            let _files = write_txn.open_table(FILE_STATE_TABLE).map_err(db_err)?;
            let _meta = write_txn.open_table(META_TABLE).map_err(db_err)?;
        }
        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(Self { db })
    }

    /// Get the state of a file
    pub fn get_file_state(&self, file_path: &str) -> Result<Option<FileState>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(FILE_STATE_TABLE).map_err(db_err)?;

        let json_str = match table.get(file_path).map_err(db_err)? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        FileState::from_json(&json_str).map(Some)
    }

    /// Record the state of several files in one transaction
    pub fn update_file_states(&self, states: &[(String, FileState)]) -> Result<()> {
        if states.is_empty() {
            return Ok(());
        }

        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(FILE_STATE_TABLE).map_err(db_err)?;
            for (file_path, state) in states {
                let json_str = state.to_json()?;
                table
                    .insert(file_path.as_str(), json_str.as_str())
                    .map_err(db_err)?;
            }
        }
        write_txn.commit().map_err(db_err)?;

        Ok(())
    }

    /// Remove a file from the state store
    pub fn remove_file(&self, file_path: &str) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(FILE_STATE_TABLE).map_err(db_err)?;
            table.remove(file_path).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;

        Ok(())
    }

    /// Every file with a recorded state
    pub fn files(&self) -> Result<BTreeSet<String>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(FILE_STATE_TABLE).map_err(db_err)?;

        let mut files = BTreeSet::new();
        for item in table.iter().map_err(db_err)? {
            let (key, _value) = item.map_err(db_err)?;
            files.insert(key.value().to_string());
        }
        Ok(files)
    }

    /// Check if a file needs indexing under `config`.
    ///
    /// A file is changed when it is unknown, its content differs, or its records
    /// were built with another model or chunk window.
    pub fn has_file_changed(&self, file_path: &str, current_hash: &str, config: &Config) -> Result<bool> {
        match self.get_file_state(file_path)? {
            Some(state) => Ok(state.content_hash != current_hash
                || state.model_id != config.model_id
                || state.chunk_size != config.chunk_size
                || state.chunk_overlap != config.chunk_overlap),
            None => Ok(true),
        }
    }

    pub fn get_model_id(&self) -> Result<Option<String>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(META_TABLE).map_err(db_err)?;

        let model_id = table
            .get(META_MODEL_ID_KEY)
            .map_err(db_err)?
            .map(|guard| guard.value().to_string());
        Ok(model_id)
    }

    pub fn set_model_id(&self, model_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(META_TABLE).map_err(db_err)?;
            table.insert(META_MODEL_ID_KEY, model_id).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;

        Ok(())
    }

    /// Forget every file and the recorded model
    pub fn clear(&self) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        write_txn.delete_table(FILE_STATE_TABLE).map_err(db_err)?;
        write_txn.delete_table(META_TABLE).map_err(db_err)?;
        {
            let _files = write_txn.open_table(FILE_STATE_TABLE).map_err(db_err)?;
            let _meta = write_txn.open_table(META_TABLE).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: impl std::fmt::Display) -> Error {
    Error::Database(e.to_string())
}

/// SHA256 of file content, hex encoded
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Get file modification time as Unix timestamp
pub fn get_file_modified_time(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified()?;
    let duration = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| Error::Io(std::io::Error::other(format!(
            "Failed to get modification time: {}",
            e
        ))))?;
    Ok(duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir) -> StateStore {
        StateStore::open(&Config::in_dir(temp_dir.path())).unwrap()
    }

    #[test]
    fn test_file_state_serialization() {
        let state = FileState::new("abc123".to_string(), 12345, &Config::default(), 4);
        assert!(state.indexed_at > 0);

        let json = state.to_json().unwrap();
        assert!(json.contains("abc123"));
        assert_eq!(FileState::from_json(&json).unwrap(), state);
    }

    #[test]
    fn test_update_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        assert!(store.get_file_state("test.cs").unwrap().is_none());

        let state = FileState::new("hash123".to_string(), 12345, &Config::default(), 2);
        store
            .update_file_states(&[("test.cs".to_string(), state.clone())])
            .unwrap();

        assert_eq!(store.get_file_state("test.cs").unwrap(), Some(state));
        assert_eq!(store.files().unwrap().into_iter().collect::<Vec<_>>(), vec!["test.cs"]);
    }

    #[test]
    fn test_has_file_changed() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let config = Config::default();

        // New file should be considered changed
        assert!(store.has_file_changed("new.sql", "hash1", &config).unwrap());

        store
            .update_file_states(&[("new.sql".to_string(), FileState::new("hash1".to_string(), 1, &config, 1))])
            .unwrap();

        assert!(!store.has_file_changed("new.sql", "hash1", &config).unwrap());
        assert!(store.has_file_changed("new.sql", "hash2", &config).unwrap());

        // Same content embedded by another model
        let other_model = Config {
            model_id: "other".to_string(),
            ..config.clone()
        };
        assert!(store.has_file_changed("new.sql", "hash1", &other_model).unwrap());

        // Same content cut with another window
        let smaller = Config {
            chunk_size: 500,
            chunk_overlap: 50,
            ..config.clone()
        };
        assert!(store.has_file_changed("new.sql", "hash1", &smaller).unwrap());
        let overlap_only = Config {
            chunk_overlap: 0,
            ..config
        };
        assert!(store.has_file_changed("new.sql", "hash1", &overlap_only).unwrap());
    }

    #[test]
    fn test_state_without_chunk_window_reads_as_changed() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let legacy = r#"{"content_hash":"h","last_modified":1,"model_id":"intfloat/e5-small-v2","chunk_count":1,"indexed_at":1}"#;

        let state = FileState::from_json(legacy).unwrap();
        assert_eq!((state.chunk_size, state.chunk_overlap), (0, 0));

        let config = Config {
            model_id: "intfloat/e5-small-v2".to_string(),
            ..Config::default()
        };
        store.update_file_states(&[("a.cs".to_string(), state)]).unwrap();
        assert!(store.has_file_changed("a.cs", "h", &config).unwrap());
    }

    #[test]
    fn test_remove_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store
            .update_file_states(&[("test.vb".to_string(), FileState::new("h".to_string(), 1, &Config::default(), 1))])
            .unwrap();
        store.remove_file("test.vb").unwrap();
        assert!(store.get_file_state("test.vb").unwrap().is_none());

        // Removing non-existent file should not error
        store.remove_file("nonexistent.vb").unwrap();
    }

    #[test]
    fn test_model_id_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        assert_eq!(store.get_model_id().unwrap(), None);
        store.set_model_id("intfloat/e5-small-v2").unwrap();
        assert_eq!(store.get_model_id().unwrap().as_deref(), Some("intfloat/e5-small-v2"));

        store
            .update_file_states(&[("a.cs".to_string(), FileState::new("h".to_string(), 1, &Config::default(), 1))])
            .unwrap();
        store.clear().unwrap();
        assert_eq!(store.get_model_id().unwrap(), None);
        assert!(store.files().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_fatal_and_left_alone() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::in_dir(temp_dir.path());
        fs::create_dir_all(&config.store_dir).unwrap();
        fs::write(config.state_path(), vec![0xAB; 4096]).unwrap();

        let err = StateStore::open(&config).err().unwrap();
        assert!(matches!(err, Error::Database(_)));
        assert!(err.is_fatal());
        assert_eq!(fs::read(config.state_path()).unwrap(), vec![0xAB; 4096]);
    }

    #[test]
    fn test_content_hash() {
        let hash = content_hash("Hello, world!");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, content_hash("Hello, world!"));
        assert_ne!(hash, content_hash("Different content"));
    }

    #[test]
    fn test_get_file_modified_time() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.cs");
        fs::write(&test_file, "class A {}").unwrap();

        assert!(get_file_modified_time(&test_file).unwrap() > 0);
        assert!(get_file_modified_time(Path::new("/nonexistent/file.cs")).is_err());
    }
}
