#![allow(dead_code)]

use src2vec::core::config::Config;
use src2vec::core::error::Result;
use src2vec::search::model::{Encoder, EncoderLoader, TextKind};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const DIMENSION: usize = 1024;

/// Hashes character trigrams into a fixed-size, L2-normalized vector.
///
/// Texts sharing many trigrams end up close, so substring queries find
/// their source chunk without a real model.
pub struct TrigramEncoder;

impl Encoder for TrigramEncoder {
    fn encode(&self, texts: &[&str], _kind: TextKind) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| trigram_vector(t)).collect())
    }
}

pub struct TrigramLoader;

impl EncoderLoader for TrigramLoader {
    fn load(&self, _model_id: &str) -> Result<Box<dyn Encoder>> {
        Ok(Box::new(TrigramEncoder))
    }
}

pub fn trigram_vector(text: &str) -> Vec<f32> {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    let mut vector = vec![0.0f32; DIMENSION];
    for window in chars.windows(3) {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for c in window {
            hash ^= *c as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        vector[(hash % DIMENSION as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// A source tree and a data directory inside one temp dir
pub struct Workspace {
    pub temp_dir: TempDir,
    pub config: Config,
}

impl Workspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("repo")).unwrap();
        let config = Config::in_dir(&temp_dir.path().join("data"));
        Self { temp_dir, config }
    }

    pub fn root(&self) -> PathBuf {
        self.temp_dir.path().join("repo")
    }

    pub fn write(&self, relative: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.root().join(relative)).unwrap();
    }
}

/// Deterministic SQL-looking text of exactly `len` characters
pub fn sql_text(len: usize, seed: usize) -> String {
    let mut text = String::new();
    let mut i = seed;
    while text.len() < len {
        text.push_str(&format!(
            "SELECT o.order_{i}, c.customer_name_{i} FROM orders_{i} o JOIN customers c ON c.id = o.customer_{i} WHERE o.total > {};\n",
            i * 37 % 1000
        ));
        i += 1;
    }
    text.truncate(len);
    text
}
