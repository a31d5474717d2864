use crate::core::error::{Error, Result};
use crate::storage::redb_file::check_database_file;
use redb::{Database, ReadableTable, TableDefinition};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Key: fingerprint of (model id, text), hex SHA-256
/// Value: embedding as little-endian f32 bytes
const EMBEDDINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("embeddings");

/// Fingerprint of a text under a given model.
///
/// The model id is part of the key so switching models never reuses another
/// model's vectors.
pub fn fingerprint(text: &str, model_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint-keyed vector storage used by the embedding generator
pub trait EmbeddingCache {
    /// Look up a vector by fingerprint
    fn get(&self, key: &str) -> Result<Option<Vec<f32>>>;

    /// Store vectors for fingerprints that are not cached yet. Returns how many were added.
    fn insert_many(&self, entries: &[(String, Vec<f32>)]) -> Result<usize>;
}

/// Persistent content-addressed embedding cache.
///
/// Entries are written once and never replaced: the cache maps a fingerprint to
/// the one vector the model produced for that text.
pub struct ContentCache {
    db: Database,
}

impl ContentCache {
    /// Open or create the cache database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::CacheUnavailable(format!("Failed to create cache directory: {}", e)))?;
        }
        check_database_file(path).map_err(Error::CacheUnavailable)?;

        let db = Database::create(path).map_err(|e| {
            let msg = e.to_string();
            if msg.to_lowercase().contains("lock") {
                Error::CacheUnavailable("Cache database is locked. Another src2vec process may be running.".to_string())
            } else {
                Error::CacheUnavailable(format!("Failed to open cache database: {}", e))
            }
        })?;

        let write_txn = db.begin_write().map_err(cache_err)?;
        {
            let _table = write_txn.open_table(EMBEDDINGS_TABLE).map_err(cache_err)?;
        }
        write_txn.commit().map_err(cache_err)?;

        Ok(Self { db })
    }

    /// Return the cached vector for `text` under `model_id`, computing and storing it on a miss.
    ///
    /// `compute` runs only on a miss.
    pub fn get_or_compute<F>(&self, text: &str, model_id: &str, compute: F) -> Result<Vec<f32>>
    where
        F: FnOnce(&str) -> Result<Vec<f32>>,
    {
        let key = fingerprint(text, model_id);
        if let Some(vector) = self.get(&key)? {
            return Ok(vector);
        }

        let vector = compute(text)?;
        self.insert_many(&[(key, vector.clone())])?;
        Ok(vector)
    }

    /// Number of cached embeddings
    pub fn len(&self) -> Result<u64> {
        let read_txn = self.db.begin_read().map_err(cache_err)?;
        let table = read_txn.open_table(EMBEDDINGS_TABLE).map_err(cache_err)?;
        table.len().map_err(cache_err)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every cached embedding
    pub fn clear(&self) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(cache_err)?;
        write_txn.delete_table(EMBEDDINGS_TABLE).map_err(cache_err)?;
        {
            let _table = write_txn.open_table(EMBEDDINGS_TABLE).map_err(cache_err)?;
        }
        write_txn.commit().map_err(cache_err)?;
        Ok(())
    }
}

impl EmbeddingCache for ContentCache {
    fn get(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let read_txn = self.db.begin_read().map_err(cache_err)?;
        let table = read_txn.open_table(EMBEDDINGS_TABLE).map_err(cache_err)?;

        let guard = table.get(key).map_err(cache_err)?;
        match guard {
            Some(bytes) => decode_vector(bytes.value()).map(Some),
            None => Ok(None),
        }
    }

    /// Writes in one transaction. Keys that already exist keep their original vector.
    fn insert_many(&self, entries: &[(String, Vec<f32>)]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write().map_err(cache_err)?;
        let mut added = 0;
        {
            let mut table = write_txn.open_table(EMBEDDINGS_TABLE).map_err(cache_err)?;
            for (key, vector) in entries {
                if table.get(key.as_str()).map_err(cache_err)?.is_some() {
                    continue;
                }
                table
                    .insert(key.as_str(), encode_vector(vector).as_slice())
                    .map_err(cache_err)?;
                added += 1;
            }
        }
        write_txn.commit().map_err(cache_err)?;

        Ok(added)
    }
}

fn cache_err(e: impl std::fmt::Display) -> Error {
    Error::CacheUnavailable(e.to_string())
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::CacheUnavailable(format!(
            "corrupt cache entry: {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
