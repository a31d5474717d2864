use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// src2vec - Local semantic search for source code
#[derive(Parser, Debug)]
#[command(name = "src2vec")]
#[command(about = "Index a source tree into a local vector store and search it in plain language", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the embedding cache database
    #[arg(long, global = true, default_value = "cache.db")]
    pub cache_db: PathBuf,

    /// Directory holding the vector store
    #[arg(long, global = true, default_value = "chroma_store")]
    pub chroma_db: PathBuf,

    /// Verbose logging (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index source files under a directory
    Index {
        /// Root of the source tree
        path: PathBuf,
        /// Embedding model (HuggingFace id or local directory)
        #[arg(long)]
        model: Option<String>,
        /// Chunk size in characters
        #[arg(long, default_value_t = 1000)]
        chunk_size: usize,
        /// Characters shared by adjacent chunks
        #[arg(long, default_value_t = 100)]
        chunk_overlap: usize,
        /// File extensions to index (e.g. .cs .sql)
        #[arg(long, num_args = 1..)]
        extensions: Option<Vec<String>>,
        /// Folder names to skip wherever they occur
        #[arg(long, num_args = 1..)]
        ignore: Option<Vec<String>>,
        /// Records written per store transaction
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        /// Re-embed files even if unchanged
        #[arg(short, long)]
        force: bool,
        /// Keep going without the embedding cache if it cannot be opened
        #[arg(long)]
        bypass_broken_cache: bool,
    },
    /// Search the index
    Search {
        /// One or more queries; results are pooled
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Maximum number of results to return
        #[arg(short = 'n', long = "results", default_value_t = 10)]
        results: usize,
        /// Drop results scoring below this similarity
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,
        /// Only search files with these extensions
        #[arg(long, num_args = 1..)]
        file_type: Vec<String>,
        /// Embedding model; defaults to the one the index was built with
        #[arg(long)]
        model: Option<String>,
    },
    /// Show index statistics
    Stats,
    /// Show the indexed chunks of one file
    Show {
        /// Path relative to the indexed root
        path: String,
    },
    /// Delete every record from the index
    Reset {
        /// Also clear the embedding cache
        #[arg(long)]
        cache: bool,
    },
}
