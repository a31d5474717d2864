use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Leading bytes of every redb database file
const REDB_MAGIC: &[u8; 8] = b"redb\x1a\x0a\xa9\x0d";

/// Check that an existing file at `path` is a redb database before opening it.
///
/// `Database::create` happily reinitializes a file it does not recognize, so a
/// corrupt or foreign file would otherwise be wiped without a word. A missing
/// or empty file passes: redb creates a fresh database there.
pub fn check_database_file(path: &Path) -> Result<(), String> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(format!("cannot read {}: {}", path.display(), e)),
    };

    if !metadata.is_file() {
        return Err(format!("{} is not a regular file", path.display()));
    }
    if metadata.len() == 0 {
        return Ok(());
    }

    let mut header = [0u8; 8];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut header))
        .map_err(|e| format!("{} is not a redb database: {}", path.display(), e))?;

    if &header != REDB_MAGIC {
        return Err(format!("{} is not a redb database (bad header)", path.display()));
    }
    Ok(())
}
