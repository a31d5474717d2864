//! Cache-backed embedding generation.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::runtime::enforce_thread_limit;
use crate::search::model::{Encoder, EncoderLoader, TextKind};
use crate::storage::cache::{fingerprint, EmbeddingCache};
use std::collections::HashMap;
use tracing::{debug, info};

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Texts answered from the cache
    pub hits: u64,
    /// Texts that had to be encoded
    pub misses: u64,
}

/// Turns chunk texts into vectors, consulting the content cache first.
///
/// The model is loaded on the first cache miss (or first query), not at
/// construction, and the numeric thread limit is applied right before loading.
pub struct EmbeddingGenerator {
    model_id: String,
    chunk_size: usize,
    num_threads: usize,
    loader: Box<dyn EncoderLoader>,
    encoder: Option<Box<dyn Encoder>>,
    cache: Option<Box<dyn EmbeddingCache>>,
    stats: CacheStats,
    dimension: Option<usize>,
}

impl EmbeddingGenerator {
    pub fn new(
        config: &Config,
        loader: Box<dyn EncoderLoader>,
        cache: Option<Box<dyn EmbeddingCache>>,
    ) -> Self {
        Self {
            model_id: config.model_id.clone(),
            chunk_size: config.chunk_size,
            num_threads: config.num_threads,
            loader,
            encoder: None,
            cache,
            stats: CacheStats::default(),
            dimension: None,
        }
    }

    /// Whether the model has been loaded yet
    pub fn is_loaded(&self) -> bool {
        self.encoder.is_some()
    }

    /// Stop using the content cache; every later call recomputes
    pub fn disable_cache(&mut self) {
        self.cache = None;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Vector length of the loaded model, once known
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn encoder(&mut self) -> Result<&dyn Encoder> {
        if self.encoder.is_none() {
            enforce_thread_limit(self.num_threads);
            let encoder = self.loader.load(&self.model_id).map_err(|e| match e {
                Error::ModelUnavailable(_) => e,
                other => Error::ModelUnavailable(other.to_string()),
            })?;
            self.encoder = Some(encoder);
        }
        self.encoder
            .as_deref()
            .ok_or_else(|| Error::ModelUnavailable(self.model_id.clone()))
    }

    /// Embed chunk texts, one vector per text in the same order.
    ///
    /// Every text must already fit in one chunk. Cached texts are answered from
    /// the cache; the rest go to the model as a single batch and are then cached.
    pub fn embed(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            let len = text.chars().count();
            if len > self.chunk_size {
                return Err(Error::Embedding(format!(
                    "text of {} characters exceeds the chunk size of {}",
                    len, self.chunk_size
                )));
            }
        }

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        // Misses grouped by fingerprint so repeated texts are encoded once.
        let mut miss_keys: Vec<String> = Vec::new();
        let mut miss_texts: Vec<&str> = Vec::new();
        let mut miss_positions: HashMap<String, Vec<usize>> = HashMap::new();
        let mut hits = 0u64;

        for (i, text) in texts.iter().enumerate() {
            let key = fingerprint(text, &self.model_id);
            if let Some(cache) = &self.cache {
                if let Some(vector) = cache.get(&key)? {
                    results[i] = Some(vector);
                    hits += 1;
                    continue;
                }
            }
            let positions = miss_positions.entry(key.clone()).or_default();
            if positions.is_empty() {
                miss_keys.push(key);
                miss_texts.push(*text);
            }
            positions.push(i);
        }

        let misses = (texts.len() as u64) - hits;
        debug!(hits, misses, "embedding cache lookup");

        if !miss_texts.is_empty() {
            let vectors = self.encoder()?.encode(&miss_texts, TextKind::Passage)?;
            self.check_output(&vectors, miss_texts.len())?;

            if let Some(cache) = &self.cache {
                let entries: Vec<(String, Vec<f32>)> = miss_keys
                    .iter()
                    .cloned()
                    .zip(vectors.iter().cloned())
                    .collect();
                cache.insert_many(&entries)?;
            }

            for (key, vector) in miss_keys.iter().zip(vectors) {
                if let Some(positions) = miss_positions.get(key) {
                    for &i in positions {
                        results[i] = Some(vector.clone());
                    }
                }
            }
        }

        self.stats.hits += hits;
        self.stats.misses += misses;

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| Error::Embedding("missing embedding for input".to_string())))
            .collect()
    }

    /// Embed search queries. Queries are one-off and never cached.
    pub fn embed_queries(&mut self, queries: &[&str]) -> Result<Vec<Vec<f32>>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.encoder()?.encode(queries, TextKind::Query)?;
        self.check_output(&vectors, queries.len())?;
        Ok(vectors)
    }

    fn check_output(&mut self, vectors: &[Vec<f32>], expected: usize) -> Result<()> {
        if vectors.len() != expected {
            return Err(Error::Embedding(format!(
                "model returned {} vectors for {} inputs",
                vectors.len(),
                expected
            )));
        }
        for vector in vectors {
            match self.dimension {
                None => {
                    info!(dimension = vector.len(), "embedding dimension");
                    self.dimension = Some(vector.len());
                }
                Some(dim) if dim != vector.len() => {
                    return Err(Error::Embedding(format!(
                        "model returned a {}-dimensional vector, expected {}",
                        vector.len(),
                        dim
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
