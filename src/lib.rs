// Core functionality
pub mod core {
    pub mod config;
    pub mod error;
    pub mod runtime;
}

// Data storage
pub mod storage {
    pub mod cache;
    pub mod redb_file;
    pub mod state;
    pub mod vectors;
}

// Indexing pipeline
pub mod indexing {
    pub mod chunker;
    pub mod discovery;
    pub mod pipeline;
}

// Search & ML
pub mod search {
    pub mod embedder;
    pub mod model;
    pub mod query;
}

// User interfaces
pub mod ui {
    pub mod cli;
}

// Re-export commonly used types
pub use core::config::{CachePolicy, Config};
pub use core::error::{Error, Result};
pub use indexing::chunker::{chunk_text, Chunk};
pub use indexing::discovery::{discover_files, scan, FileRecord};
pub use indexing::pipeline::{index_directory, IndexError, IndexReport, Indexer};
pub use search::embedder::{CacheStats, EmbeddingGenerator};
pub use search::model::{CandleLoader, Encoder, EncoderLoader, TextKind};
pub use search::query::{ScoredResult, SearchOptions, VectorSearch};
pub use storage::cache::{ContentCache, EmbeddingCache};
pub use storage::state::StateStore;
pub use storage::vectors::{RecordFilter, VectorIndex, VectorRecord, VectorStore};
pub use ui::cli::Cli;
