use super::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Default embedding model
/// https://huggingface.co/intfloat/e5-small-v2
pub const DEFAULT_MODEL: &str = "intfloat/e5-small-v2";

pub const DEFAULT_EXTENSIONS: &[&str] = &[".cs", ".sql", ".vb", ".aspx"];

pub const DEFAULT_IGNORED_FOLDERS: &[&str] = &[".git", "node_modules", "bin", "obj", ".vs"];

/// What to do when the embedding cache cannot be read or written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Abort the run
    #[default]
    Fail,
    /// Keep going without the cache and recompute every embedding
    Bypass,
}

/// Settings for one run of src2vec.
///
/// Built once (defaults overridden by CLI flags), checked with [`Config::validate`]
/// and then handed by reference to every component.
#[derive(Debug, Clone)]
pub struct Config {
    /// File extensions to index, lowercase with a leading dot
    pub extensions: Vec<String>,
    /// Folder names whose subtrees are never walked
    pub ignored_folders: Vec<String>,
    /// Chunk window size in characters
    pub chunk_size: usize,
    /// Characters shared by adjacent chunks
    pub chunk_overlap: usize,
    /// HuggingFace identifier of the embedding model
    pub model_id: String,
    /// Path to the embedding cache database
    pub cache_path: PathBuf,
    /// Directory holding the vector store and file state
    pub store_dir: PathBuf,
    /// Number of vector records written per store transaction
    pub batch_size: usize,
    /// Thread count for the numeric backend
    pub num_threads: usize,
    pub cache_policy: CachePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ignored_folders: DEFAULT_IGNORED_FOLDERS.iter().map(|f| f.to_string()).collect(),
            chunk_size: 1000,
            chunk_overlap: 100,
            model_id: DEFAULT_MODEL.to_string(),
            cache_path: PathBuf::from("cache.db"),
            store_dir: PathBuf::from("chroma_store"),
            batch_size: 100,
            num_threads: 1,
            cache_policy: CachePolicy::Fail,
        }
    }
}

impl Config {
    /// Create a configuration rooted at `base_dir`, keeping every other default
    pub fn in_dir(base_dir: &Path) -> Self {
        Self {
            cache_path: base_dir.join("cache.db"),
            store_dir: base_dir.join("chroma_store"),
            ..Self::default()
        }
    }

    /// Check parameter combinations, normalize extensions and resolve paths.
    pub fn validate(mut self) -> Result<Self> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfiguration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidConfiguration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "batch size must be greater than zero".to_string(),
            ));
        }
        if self.num_threads == 0 {
            return Err(Error::InvalidConfiguration(
                "thread count must be at least 1".to_string(),
            ));
        }
        if self.model_id.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "model identifier is empty".to_string(),
            ));
        }

        self.extensions = self
            .extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| e.len() > 1)
            .collect();
        self.extensions.sort();
        self.extensions.dedup();
        if self.extensions.is_empty() {
            return Err(Error::InvalidConfiguration(
                "at least one file extension is required".to_string(),
            ));
        }

        self.cache_path = absolute(&self.cache_path)?;
        self.store_dir = absolute(&self.store_dir)?;

        Ok(self)
    }

    /// Path of the vector record database inside the store directory
    pub fn vectors_path(&self) -> PathBuf {
        self.store_dir.join("vectors.redb")
    }

    /// Path of the per-file state database inside the store directory
    pub fn state_path(&self) -> PathBuf {
        self.store_dir.join("state.redb")
    }

    /// Whether `path` has one of the configured extensions (case-insensitive)
    pub fn is_supported_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = format!(".{}", ext.to_lowercase());
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }

    /// Whether a folder with this name is skipped during scanning
    pub fn is_ignored_folder(&self, name: &str) -> bool {
        self.ignored_folders.iter().any(|ignored| ignored == name)
    }
}

/// Lowercase an extension and make sure it starts with a dot
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
