//! Incremental synchronization of a source tree into the vector store.

use crate::core::config::{CachePolicy, Config};
use crate::core::error::{Error, Result};
use crate::indexing::chunker::chunk_text;
use crate::indexing::discovery::{scan, FileRecord};
use crate::search::embedder::EmbeddingGenerator;
use crate::search::model::{CandleLoader, EncoderLoader};
use crate::storage::cache::{ContentCache, EmbeddingCache};
use crate::storage::state::{content_hash, get_file_modified_time, FileState, StateStore};
use crate::storage::vectors::{VectorIndex, VectorRecord, VectorStore};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A file that could not be indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexError {
    pub path: String,
    pub message: String,
}

/// Outcome of one indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Matching files found by the scanner, including unreadable ones
    pub files_scanned: usize,
    /// Files chunked, embedded and queued for the store
    pub files_indexed: usize,
    /// Unchanged since the last run
    pub files_skipped: usize,
    /// Previously indexed files no longer on disk
    pub files_removed: usize,
    pub chunks_created: usize,
    /// Chunks whose embedding came from the content cache
    pub chunks_from_cache: usize,
    /// Stale and deleted-file records dropped from the store
    pub chunks_removed: usize,
    pub batches_flushed: usize,
    pub duration_ms: u64,
    pub errors: Vec<IndexError>,
}

/// Records reserved up front for a batch; larger batches grow on demand
const MAX_BATCH_RESERVE: usize = 1024;

/// Drives scanner, chunker, embedder and stores through one run.
///
/// Records are written in batches of `config.batch_size`; a file's state is
/// only committed once all of its records are durable, so an interrupted run
/// picks unfinished files up again next time.
pub struct Indexer<'a, S: VectorIndex> {
    config: &'a Config,
    generator: &'a mut EmbeddingGenerator,
    store: &'a S,
    state: &'a StateStore,
    batch: Vec<VectorRecord>,
    pending: Vec<(String, FileState)>,
}

impl<'a, S: VectorIndex> Indexer<'a, S> {
    pub fn new(
        config: &'a Config,
        generator: &'a mut EmbeddingGenerator,
        store: &'a S,
        state: &'a StateStore,
    ) -> Self {
        Self {
            config,
            generator,
            store,
            state,
            batch: Vec::with_capacity(config.batch_size.min(MAX_BATCH_RESERVE)),
            pending: Vec::new(),
        }
    }

    /// Index everything under `root`.
    ///
    /// With `force`, files are re-embedded even if their content is unchanged.
    pub fn index(&mut self, root: &Path, force: bool) -> Result<IndexReport> {
        let started = Instant::now();
        let mut report = IndexReport::default();
        let model_id = self.config.model_id.clone();

        let mut force = force;
        if let Some(previous) = self.state.get_model_id()? {
            if previous != model_id {
                warn!(
                    previous = %previous,
                    current = %model_id,
                    "embedding model changed, re-indexing every file"
                );
                force = true;
            }
        }

        let files = scan(root, self.config)?;
        self.state.set_model_id(&model_id)?;

        let hits_before = self.generator.stats().hits;
        let mut seen: BTreeSet<String> = BTreeSet::new();

        info!(root = %root.display(), model = %model_id, "indexing started");

        for item in files {
            report.files_scanned += 1;

            let file = match item {
                Ok(file) => file,
                Err(Error::FileRead { path, source }) => {
                    // Still on disk, so its old records are kept.
                    let relative = relative_path(root, &path);
                    seen.insert(relative.clone());
                    report.errors.push(IndexError {
                        path: relative,
                        message: source.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            seen.insert(file.relative_path.clone());
            self.index_file(&file, force, &mut report)?;
        }

        self.flush(&mut report)?;

        let known: BTreeSet<String> = self
            .state
            .files()?
            .into_iter()
            .chain(self.store.indexed_files()?)
            .collect();
        for gone in known.difference(&seen) {
            let removed = self.store.remove_file(gone)?;
            self.state.remove_file(gone)?;
            info!(file = %gone, records = removed, "removed deleted file from index");
            report.files_removed += 1;
            report.chunks_removed += removed;
        }

        report.chunks_from_cache = (self.generator.stats().hits - hits_before) as usize;
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            scanned = report.files_scanned,
            indexed = report.files_indexed,
            skipped = report.files_skipped,
            removed = report.files_removed,
            chunks = report.chunks_created,
            cached = report.chunks_from_cache,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "indexing complete"
        );

        Ok(report)
    }

    fn index_file(&mut self, file: &FileRecord, force: bool, report: &mut IndexReport) -> Result<()> {
        let relative = file.relative_path.as_str();
        let hash = content_hash(&file.content);

        if !force && !self.state.has_file_changed(relative, &hash, self.config)? {
            debug!(file = %relative, "unchanged, skipping");
            report.files_skipped += 1;
            return Ok(());
        }

        let chunks = if file.content.trim().is_empty() {
            Vec::new()
        } else {
            chunk_text(&file.content, self.config.chunk_size, self.config.chunk_overlap)
        };

        let chunk_count = chunks.len();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = match self.embed(&texts) {
            Ok(vectors) => vectors,
            Err(e) if e.is_fatal() || matches!(e, Error::CacheUnavailable(_)) => return Err(e),
            Err(e) => {
                warn!(file = %relative, error = %e, "failed to embed file");
                report.errors.push(IndexError {
                    path: relative.to_string(),
                    message: e.to_string(),
                });
                return Ok(());
            }
        };

        // A shorter file must not leave its old tail chunks behind.
        report.chunks_removed += self.store.remove_stale(relative, chunk_count)?;

        let file_type = file.file_type();
        for (chunk, embedding) in chunks.into_iter().zip(vectors) {
            self.batch.push(VectorRecord {
                file_path: relative.to_string(),
                chunk_index: chunk.index,
                file_type: file_type.clone(),
                embedding,
                text: chunk.text,
                start: chunk.start,
                end: chunk.end,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
            });
            report.chunks_created += 1;

            if self.batch.len() >= self.config.batch_size {
                self.flush(report)?;
            }
        }

        let last_modified = get_file_modified_time(&file.path).unwrap_or_default();
        self.pending.push((
            relative.to_string(),
            FileState::new(hash, last_modified, self.config, chunk_count),
        ));
        report.files_indexed += 1;
        debug!(file = %relative, chunks = chunk_count, "file queued");

        Ok(())
    }

    /// Embed through the generator, applying the cache policy on cache failure
    fn embed(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.generator.embed(texts) {
            Err(Error::CacheUnavailable(msg)) if self.config.cache_policy == CachePolicy::Bypass => {
                warn!(error = %msg, "embedding cache unavailable, continuing without it");
                self.generator.disable_cache();
                self.generator.embed(texts)
            }
            other => other,
        }
    }

    /// Write the current batch, then commit the states of files now fully stored
    fn flush(&mut self, report: &mut IndexReport) -> Result<()> {
        if !self.batch.is_empty() {
            self.store.upsert(&self.batch).map_err(|e| match e {
                Error::StoreWrite(_) => e,
                other => Error::StoreWrite(other.to_string()),
            })?;
            report.batches_flushed += 1;
            info!(
                records = self.batch.len(),
                total = report.chunks_created,
                "flushed batch"
            );
            self.batch.clear();
        }

        self.state.update_file_states(&self.pending)?;
        self.pending.clear();
        Ok(())
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Open the content cache, honoring the configured policy when it is broken
pub fn open_cache(config: &Config) -> Result<Option<ContentCache>> {
    match ContentCache::open(&config.cache_path) {
        Ok(cache) => Ok(Some(cache)),
        Err(Error::CacheUnavailable(msg)) if config.cache_policy == CachePolicy::Bypass => {
            warn!(error = %msg, "embedding cache unavailable, running without it");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Index `root` with the configured candle model
pub fn index_directory(root: &Path, config: &Config, force: bool) -> Result<IndexReport> {
    index_directory_with_loader(root, config, force, Box::new(CandleLoader))
}

/// Index `root`, opening every store from `config` and loading the model through `loader`
pub fn index_directory_with_loader(
    root: &Path,
    config: &Config,
    force: bool,
    loader: Box<dyn EncoderLoader>,
) -> Result<IndexReport> {
    let store = VectorStore::open(config)?;
    let state = StateStore::open(config)?;
    let cache = open_cache(config)?.map(|c| Box::new(c) as Box<dyn EmbeddingCache>);
    let mut generator = EmbeddingGenerator::new(config, loader, cache);

    Indexer::new(config, &mut generator, &store, &state).index(root, force)
}
