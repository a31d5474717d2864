use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::indexing::discovery::file_type_of;
use crate::storage::redb_file::check_database_file;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::path::Path;

/// Table definition for vector storage
/// Key: record id (format: "file_path:chunk_index")
/// Value: JSON serialized VectorRecord
const VECTORS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("vectors");

/// Id of the record for chunk `chunk_index` of `file_path`.
///
/// Re-indexing the same chunk of the same file always produces the same id, so
/// writes overwrite instead of duplicating.
pub fn record_id(file_path: &str, chunk_index: usize) -> String {
    format!("{}:{}", file_path, chunk_index)
}

/// Split a record id back into file path and chunk index
pub fn parse_record_id(id: &str) -> Option<(&str, usize)> {
    let (file_path, index) = id.rsplit_once(':')?;
    Some((file_path, index.parse().ok()?))
}

/// One embedded chunk with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// File path (relative to the indexed root)
    pub file_path: String,
    /// Chunk index within the file
    pub chunk_index: usize,
    /// Lowercased extension, e.g. ".cs"
    pub file_type: String,
    /// The embedding vector
    pub embedding: Vec<f32>,
    /// Text content of the chunk
    pub text: String,
    /// Character offsets of the chunk in the file
    pub start: usize,
    pub end: usize,
    /// Line range in the source file
    pub start_line: usize,
    pub end_line: usize,
}

impl VectorRecord {
    pub fn id(&self) -> String {
        record_id(&self.file_path, self.chunk_index)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Database(format!("Failed to serialize vector record: {}", e)))
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Database(format!("Failed to deserialize vector record: {}", e)))
    }
}

/// Restricts a query to part of the index
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Allowed file types (".cs", ".sql", ...); empty means all
    pub file_types: Vec<String>,
    /// Only files whose relative path starts with this prefix
    pub path_prefix: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, file_path: &str) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !file_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if self.file_types.is_empty() {
            return true;
        }
        let file_type = file_type_of(Path::new(file_path));
        self.file_types.iter().any(|t| *t == file_type)
    }
}

/// What the indexing pipeline and search need from a vector database
pub trait VectorIndex {
    /// Insert or overwrite records by id, all or nothing
    fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Remove the records of `file_path` whose chunk index is `>= keep`; returns how many went
    fn remove_stale(&self, file_path: &str, keep: usize) -> Result<usize>;

    /// Remove all records of `file_path`
    fn remove_file(&self, file_path: &str) -> Result<usize> {
        self.remove_stale(file_path, 0)
    }

    /// The `top_k` records most similar to `embedding`, best first
    fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<(VectorRecord, f32)>>;

    /// Relative paths of every file with at least one record
    fn indexed_files(&self) -> Result<BTreeSet<String>>;

    /// Total number of records
    fn count(&self) -> Result<usize>;
}

/// Counts reported by `src2vec stats`
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub records: usize,
    pub files: usize,
    /// Records per file type
    pub by_file_type: BTreeMap<String, usize>,
}

/// redb-backed vector store with exact cosine search
pub struct VectorStore {
    db: Database,
}

impl VectorStore {
    /// Open or create the vector store
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_path(&config.vectors_path())
    }

    /// Open the vector store only if it has been created, e.g. by a previous `index` run
    pub fn open_existing(config: &Config) -> Result<Option<Self>> {
        let path = config.vectors_path();
        if !path.exists() {
            return Ok(None);
        }
        Self::open_path(&path).map(Some)
    }

    pub fn open_path(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        check_database_file(db_path)
            .map_err(|e| Error::Database(format!("Refusing to open vector database: {}", e)))?;

        let db = Database::create(db_path).map_err(|e| {
            let msg = e.to_string();
            if msg.to_lowercase().contains("lock") {
                Error::Database("Vector database is locked. Another src2vec process may be running. Close other instances and try again.".to_string())
            } else {
                Error::Database(format!("Failed to open vector database: {}", e))
            }
        })?;

        // Initialize table
        let write_txn = db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;
        {
            let _table = write_txn.open_table(VECTORS_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;
        }
        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(Self { db })
    }

    /// Get a record by id
    pub fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(VECTORS_TABLE).map_err(read_err)?;

        let json_str = match table.get(id).map_err(read_err)? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        VectorRecord::from_json(&json_str).map(Some)
    }

    /// All records of one file, ordered by chunk index
    pub fn file_records(&self, file_path: &str) -> Result<Vec<VectorRecord>> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(VECTORS_TABLE).map_err(read_err)?;

        let prefix = format!("{}:", file_path);
        let mut results = Vec::new();

        for item in table.range(prefix.as_str()..).map_err(read_err)? {
            let (key, value) = item.map_err(read_err)?;
            let key_str = key.value();
            if !key_str.starts_with(&prefix) {
                break;
            }
            if parse_record_id(key_str).map(|(f, _)| f) != Some(file_path) {
                continue;
            }
            results.push(VectorRecord::from_json(value.value())?);
        }

        results.sort_by_key(|r| r.chunk_index);
        Ok(results)
    }

    /// Record count, file count and per-type distribution
    pub fn stats(&self) -> Result<StoreStats> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(VECTORS_TABLE).map_err(read_err)?;

        let mut stats = StoreStats::default();
        let mut files = BTreeSet::new();

        for item in table.iter().map_err(read_err)? {
            let (key, _value) = item.map_err(read_err)?;
            let Some((file_path, _)) = parse_record_id(key.value()) else {
                continue;
            };
            stats.records += 1;
            *stats
                .by_file_type
                .entry(file_type_of(Path::new(file_path)))
                .or_insert(0) += 1;
            files.insert(file_path.to_string());
        }

        stats.files = files.len();
        Ok(stats)
    }

    /// Drop every record
    pub fn clear(&self) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(write_err)?;
        write_txn.delete_table(VECTORS_TABLE).map_err(write_err)?;
        {
            let _table = write_txn.open_table(VECTORS_TABLE).map_err(write_err)?;
        }
        write_txn.commit().map_err(write_err)?;
        Ok(())
    }
}

impl VectorIndex for VectorStore {
    fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let write_txn = self.db.begin_write().map_err(write_err)?;
        {
            let mut table = write_txn.open_table(VECTORS_TABLE).map_err(write_err)?;
            for record in records {
                let json_str = record
                    .to_json()
                    .map_err(|e| Error::StoreWrite(e.to_string()))?;
                table
                    .insert(record.id().as_str(), json_str.as_str())
                    .map_err(write_err)?;
            }
        }
        write_txn.commit().map_err(write_err)?;

        Ok(())
    }

    fn remove_stale(&self, file_path: &str, keep: usize) -> Result<usize> {
        let prefix = format!("{}:", file_path);

        let write_txn = self.db.begin_write().map_err(write_err)?;
        let removed = {
            let mut table = write_txn.open_table(VECTORS_TABLE).map_err(write_err)?;

            let mut to_remove = Vec::new();
            for item in table.range(prefix.as_str()..).map_err(write_err)? {
                let (key, _value) = item.map_err(write_err)?;
                let key_str = key.value();
                if !key_str.starts_with(&prefix) {
                    break;
                }
                if let Some((f, index)) = parse_record_id(key_str) {
                    if f == file_path && index >= keep {
                        to_remove.push(key_str.to_string());
                    }
                }
            }

            for id in &to_remove {
                table.remove(id.as_str()).map_err(write_err)?;
            }
            to_remove.len()
        };
        write_txn.commit().map_err(write_err)?;

        Ok(removed)
    }

    /// Exact cosine similarity scan.
    /// Uses a min-heap to keep only the top K results
    fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<(VectorRecord, f32)>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(VECTORS_TABLE).map_err(read_err)?;

        let mut heap: BinaryHeap<SimilarityEntry> = BinaryHeap::with_capacity(top_k + 1);

        for item in table.iter().map_err(read_err)? {
            let (key, value) = item.map_err(read_err)?;

            // Check scope before deserializing.
            let in_scope = parse_record_id(key.value())
                .map(|(file_path, _)| filter.matches(file_path))
                .unwrap_or(false);
            if !in_scope {
                continue;
            }

            let record = VectorRecord::from_json(value.value())?;
            let similarity = cosine_similarity(embedding, &record.embedding);
            heap.push(SimilarityEntry {
                id: key.value().to_string(),
                record,
                similarity,
            });
            if heap.len() > top_k {
                heap.pop();
            }
        }

        let mut entries = heap.into_vec();
        entries.sort();
        Ok(entries.into_iter().map(|e| (e.record, e.similarity)).collect())
    }

    fn indexed_files(&self) -> Result<BTreeSet<String>> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(VECTORS_TABLE).map_err(read_err)?;

        let mut files = BTreeSet::new();
        for item in table.iter().map_err(read_err)? {
            let (key, _value) = item.map_err(read_err)?;
            if let Some((file_path, _)) = parse_record_id(key.value()) {
                files.insert(file_path.to_string());
            }
        }
        Ok(files)
    }

    fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(VECTORS_TABLE).map_err(read_err)?;
        let len = table.len().map_err(read_err)?;
        Ok(len as usize)
    }
}

fn read_err(e: impl std::fmt::Display) -> Error {
    Error::Database(e.to_string())
}

fn write_err(e: impl std::fmt::Display) -> Error {
    Error::StoreWrite(e.to_string())
}

/// Heap entry ordered so the worst match is the greatest:
/// lower similarity first, then larger id.
struct SimilarityEntry {
    id: String,
    record: VectorRecord,
    similarity: f32,
}

impl PartialEq for SimilarityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimilarityEntry {}

impl PartialOrd for SimilarityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimilarityEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .similarity
            .total_cmp(&self.similarity)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
