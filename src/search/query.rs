//! Multi-query vector search over the index.

use crate::core::error::Result;
use crate::search::embedder::EmbeddingGenerator;
use crate::storage::vectors::{RecordFilter, VectorIndex, VectorRecord};
use std::collections::HashMap;
use tracing::debug;

/// Anything that can turn query strings into vectors
pub trait QueryEmbedder {
    fn embed_queries(&mut self, queries: &[&str]) -> Result<Vec<Vec<f32>>>;
}

impl QueryEmbedder for EmbeddingGenerator {
    fn embed_queries(&mut self, queries: &[&str]) -> Result<Vec<Vec<f32>>> {
        EmbeddingGenerator::embed_queries(self, queries)
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResult {
    /// Record id ("file_path:chunk_index")
    pub id: String,
    pub file_path: String,
    pub file_type: String,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    /// Cosine similarity, higher is better
    pub score: f32,
    pub text: String,
    /// The query that produced the best score
    pub query: String,
}

impl ScoredResult {
    fn from_record(record: VectorRecord, score: f32, query: &str) -> Self {
        Self {
            id: record.id(),
            file_path: record.file_path,
            file_type: record.file_type,
            chunk_index: record.chunk_index,
            start_line: record.start_line,
            end_line: record.end_line,
            score,
            text: record.text,
            query: query.to_string(),
        }
    }
}

/// Search parameters
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Hits scoring below this are dropped
    pub similarity_threshold: f32,
    pub filter: RecordFilter,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            similarity_threshold: 0.0,
            filter: RecordFilter::default(),
        }
    }
}

/// Embeds queries and ranks stored records against them
pub struct VectorSearch<'a, E: QueryEmbedder, S: VectorIndex> {
    embedder: &'a mut E,
    store: &'a S,
}

impl<'a, E: QueryEmbedder, S: VectorIndex> VectorSearch<'a, E, S> {
    pub fn new(embedder: &'a mut E, store: &'a S) -> Self {
        Self { embedder, store }
    }

    /// Search with one or more query strings.
    ///
    /// Hits from all queries are pooled; a record found by several queries
    /// keeps its best score. The pool is sorted by score (first seen wins on
    /// ties) and cut to `top_k`.
    pub fn search(&mut self, queries: &[&str], options: &SearchOptions) -> Result<Vec<ScoredResult>> {
        if queries.is_empty() || options.top_k == 0 {
            return Ok(Vec::new());
        }

        let embeddings = self.embedder.embed_queries(queries)?;

        let mut pooled: Vec<ScoredResult> = Vec::new();
        let mut position: HashMap<String, usize> = HashMap::new();

        for (query, embedding) in queries.iter().zip(&embeddings) {
            let hits = self.store.query(embedding, options.top_k, &options.filter)?;
            debug!(query = *query, hits = hits.len(), "vector query");

            for (record, score) in hits {
                if score < options.similarity_threshold {
                    continue;
                }
                let id = record.id();
                match position.get(&id) {
                    Some(&i) => {
                        if score > pooled[i].score {
                            pooled[i].score = score;
                            pooled[i].query = query.to_string();
                        }
                    }
                    None => {
                        position.insert(id, pooled.len());
                        pooled.push(ScoredResult::from_record(record, score, query));
                    }
                }
            }
        }

        // Stable sort keeps first-seen order among equal scores.
        pooled.sort_by(|a, b| b.score.total_cmp(&a.score));
        pooled.truncate(options.top_k);
        Ok(pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::storage::vectors::VectorStore;
    use tempfile::TempDir;

    /// Maps known queries to fixed vectors
    struct FixedEmbedder(HashMap<&'static str, Vec<f32>>);

    impl QueryEmbedder for FixedEmbedder {
        fn embed_queries(&mut self, queries: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(queries
                .iter()
                .map(|q| self.0.get(q).cloned().unwrap_or_else(|| vec![0.0, 0.0, 0.0]))
                .collect())
        }
    }

    fn record(file: &str, index: usize, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            file_path: file.to_string(),
            chunk_index: index,
            file_type: ".cs".to_string(),
            embedding,
            text: format!("{}#{}", file, index),
            start: 0,
            end: 1,
            start_line: 1,
            end_line: 1,
        }
    }

    fn store_with(temp_dir: &TempDir, records: &[VectorRecord]) -> VectorStore {
        let store = VectorStore::open(&Config::in_dir(temp_dir.path())).unwrap();
        store.upsert(records).unwrap();
        store
    }

    fn embedder() -> FixedEmbedder {
        FixedEmbedder(HashMap::from([
            ("x", vec![1.0, 0.0, 0.0]),
            ("y", vec![0.0, 1.0, 0.0]),
            ("xy", vec![1.0, 1.0, 0.0]),
        ]))
    }

    #[test]
    fn test_single_query_ranking() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(
            &temp_dir,
            &[
                record("a.cs", 0, vec![1.0, 0.0, 0.0]),
                record("b.cs", 0, vec![0.7, 0.7, 0.0]),
                record("c.cs", 0, vec![0.0, 0.0, 1.0]),
            ],
        );
        let mut embedder = embedder();
        let mut search = VectorSearch::new(&mut embedder, &store);

        let results = search.search(&["x"], &SearchOptions::default()).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a.cs:0", "b.cs:0", "c.cs:0"]);
        assert!(results[0].score > 0.99);
        assert_eq!(results[0].query, "x");
    }

    #[test]
    fn test_threshold_filters_results() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(
            &temp_dir,
            &[
                record("a.cs", 0, vec![1.0, 0.0, 0.0]),
                record("c.cs", 0, vec![0.0, 0.0, 1.0]),
            ],
        );
        let mut embedder = embedder();
        let mut search = VectorSearch::new(&mut embedder, &store);
        let options = SearchOptions {
            similarity_threshold: 0.5,
            ..SearchOptions::default()
        };

        let results = search.search(&["x"], &options).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_path, "a.cs");
    }

    #[test]
    fn test_multiple_queries_pool_and_keep_best_score() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(
            &temp_dir,
            &[
                record("a.cs", 0, vec![1.0, 0.0, 0.0]),
                record("b.cs", 0, vec![0.0, 1.0, 0.0]),
                record("c.cs", 0, vec![1.0, 1.0, 0.0]),
            ],
        );
        let mut embedder = embedder();
        let mut search = VectorSearch::new(&mut embedder, &store);

        let results = search.search(&["x", "xy"], &SearchOptions::default()).unwrap();

        // Each record appears once
        let mut ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
        assert_eq!(results.len(), 3);

        // c.cs scores ~0.707 for "x" but 1.0 for "xy"
        let c = results.iter().find(|r| r.file_path == "c.cs").unwrap();
        assert!(c.score > 0.99);
        assert_eq!(c.query, "xy");

        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(
            &temp_dir,
            &[
                record("b.cs", 0, vec![1.0, 0.0, 0.0]),
                record("a.cs", 0, vec![0.0, 1.0, 0.0]),
            ],
        );
        let mut embedder = embedder();
        let mut search = VectorSearch::new(&mut embedder, &store);

        // Both score 1.0; "y" is asked first so its hit comes first.
        let options = SearchOptions {
            top_k: 1,
            ..SearchOptions::default()
        };
        let results = search.search(&["y", "x"], &options).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_path, "a.cs");
    }

    #[test]
    fn test_top_k_truncates_pool() {
        let temp_dir = TempDir::new().unwrap();
        let records: Vec<_> = (0..10).map(|i| record("many.cs", i, vec![1.0, i as f32 * 0.1, 0.0])).collect();
        let store = store_with(&temp_dir, &records);
        let mut embedder = embedder();
        let mut search = VectorSearch::new(&mut embedder, &store);

        let options = SearchOptions {
            top_k: 3,
            ..SearchOptions::default()
        };
        assert_eq!(search.search(&["x", "y"], &options).unwrap().len(), 3);
        assert!(search.search(&[], &options).unwrap().is_empty());
    }

    #[test]
    fn test_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, &[]);
        let mut embedder = embedder();
        let mut search = VectorSearch::new(&mut embedder, &store);
        assert!(search.search(&["x"], &SearchOptions::default()).unwrap().is_empty());
    }
}
