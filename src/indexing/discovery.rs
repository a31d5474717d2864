use crate::core::config::Config;
use crate::core::error::{Error, Result};
use ignore::{DirEntry, WalkBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// How a file's bytes were turned into text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// One byte per character; used when the file is not valid UTF-8
    Latin1,
}

/// A source file found by [`scan`], with its decoded content
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    /// Path relative to the scan root with `/` separators; the file's stable identifier
    pub relative_path: String,
    pub content: String,
    pub encoding: Encoding,
}

impl FileRecord {
    /// Lowercased extension with leading dot, e.g. `.sql`
    pub fn file_type(&self) -> String {
        file_type_of(&self.path)
    }
}

/// Walk `root` and lazily yield every file that passes the extension and ignore filters.
///
/// Folders whose name is in the ignore set are skipped wherever they occur.
/// Unreadable files come out as [`Error::FileRead`] items (and are logged) so a
/// caller can record them and keep going; nothing is persisted between calls.
pub fn scan<'a>(root: &Path, config: &'a Config) -> Result<impl Iterator<Item = Result<FileRecord>> + 'a> {
    if !root.exists() {
        return Err(Error::InvalidConfiguration(format!(
            "Directory does not exist: {}",
            root.display()
        )));
    }

    if !root.is_dir() {
        return Err(Error::InvalidConfiguration(format!(
            "Path is not a directory: {}",
            root.display()
        )));
    }

    let root = root.to_path_buf();
    let ignored: Arc<Vec<String>> = Arc::new(config.ignored_folders.clone());

    // Only our own filters apply: no .gitignore, hidden files are walked too.
    let walker = WalkBuilder::new(&root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| !is_ignored_dir(entry, &ignored))
        .build();

    Ok(walker.filter_map(move |result| match result {
        Ok(entry) => {
            let path = entry.path();
            if !entry.file_type().is_some_and(|ft| ft.is_file()) || !config.is_supported_file(path) {
                return None;
            }
            Some(read_record(&root, path))
        }
        Err(err) => {
            warn!(error = %err, "skipping unreadable entry");
            None
        }
    }))
}

/// Collect every matching file; convenience over [`scan`] that drops read failures
pub fn discover_files(root: &Path, config: &Config) -> Result<Vec<FileRecord>> {
    Ok(scan(root, config)?.filter_map(|r| r.ok()).collect())
}

fn is_ignored_dir(entry: &DirEntry, ignored: &[String]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .map(|name| ignored.iter().any(|i| i == name))
        .unwrap_or(false)
}

fn read_record(root: &Path, path: &Path) -> Result<FileRecord> {
    let bytes = std::fs::read(path).map_err(|source| {
        warn!(file = %path.display(), error = %source, "skipping file");
        Error::FileRead {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let (content, encoding) = decode(bytes);

    Ok(FileRecord {
        path: path.to_path_buf(),
        relative_path: relative_id(root, path),
        content,
        encoding,
    })
}

/// UTF-8 first (a leading BOM is dropped), Latin-1 otherwise. Never fails.
pub fn decode(bytes: Vec<u8>) -> (String, Encoding) {
    match String::from_utf8(bytes) {
        Ok(mut text) => {
            if text.starts_with('\u{feff}') {
                text.drain(..'\u{feff}'.len_utf8());
            }
            (text, Encoding::Utf8)
        }
        Err(err) => {
            let text = err.into_bytes().into_iter().map(char::from).collect();
            (text, Encoding::Latin1)
        }
    }
}

fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(root: &Path, config: &Config) -> Vec<String> {
        discover_files(root, config)
            .unwrap()
            .into_iter()
            .map(|f| f.relative_path)
            .collect()
    }

    #[test]
    fn test_extension_filter() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("foo.cs"), "class Foo {}").unwrap();
        fs::write(root.join("foo.py"), "print('hi')").unwrap();
        fs::write(root.join("Query.SQL"), "SELECT 1").unwrap();

        let files = names(root, &Config::default());
        assert_eq!(files, vec!["Query.SQL".to_string(), "foo.cs".to_string()]);
    }

    #[test]
    fn test_ignored_folder_at_any_depth() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src/app/bin/Debug")).unwrap();
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("src/app/bin/Debug/Gen.cs"), "x").unwrap();
        fs::write(root.join("bin/Top.cs"), "x").unwrap();
        fs::write(root.join(".git/hook.cs"), "x").unwrap();
        fs::write(root.join("src/app/Keep.cs"), "x").unwrap();
        // Only folder names are matched, not file names
        fs::write(root.join("src/bin.cs"), "x").unwrap();

        let files = names(root, &Config::default());
        assert_eq!(files, vec!["src/app/Keep.cs".to_string(), "src/bin.cs".to_string()]);
    }

    #[test]
    fn test_root_named_like_ignored_folder_is_scanned() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("bin");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("Tool.vb"), "Module Tool").unwrap();

        assert_eq!(names(&root, &Config::default()), vec!["Tool.vb".to_string()]);
    }

    #[test]
    fn test_invalid_utf8_falls_back_to_latin1() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("legacy.vb"), b"' caf\xe9 \xff\xfe end").unwrap();

        let files = discover_files(root, &Config::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].encoding, Encoding::Latin1);
        assert_eq!(files[0].content, "' café ÿþ end");
    }

    #[test]
    fn test_utf8_bom_is_dropped() {
        let (text, encoding) = decode(b"\xef\xbb\xbfusing System;".to_vec());
        assert_eq!(encoding, Encoding::Utf8);
        assert_eq!(text, "using System;");
    }

    #[test]
    fn test_scan_is_restartable() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.cs"), "a").unwrap();
        let config = Config::default();

        assert_eq!(scan(root, &config).unwrap().count(), 1);
        fs::write(root.join("b.cs"), "b").unwrap();
        assert_eq!(scan(root, &config).unwrap().count(), 2);
    }

    #[test]
    fn test_scan_nonexistent_directory() {
        let config = Config::default();
        assert!(scan(Path::new("/nonexistent/directory"), &config).is_err());
    }

    #[test]
    fn test_scan_file_instead_of_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.cs");
        fs::write(&file, "x").unwrap();
        assert!(scan(&file, &Config::default()).is_err());
    }

    #[test]
    fn test_file_type() {
        assert_eq!(file_type_of(Path::new("a/B.ASPX")), ".aspx");
        assert_eq!(file_type_of(Path::new("Makefile")), "");
    }
}
