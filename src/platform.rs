use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace `path` with `content` in one step
///
/// The content goes to a uniquely named temporary file in the target's
/// directory, is synced, then renamed over the target. Concurrent writers of
/// sibling files never share a temporary file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_directory_exists(dir)?;

    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to stage write in {}", dir.display()))?;
    staged
        .write_all(content)
        .context("Failed to write staged content")?;
    staged
        .as_file()
        .sync_all()
        .context("Failed to sync staged content")?;

    staged
        .persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}

/// Ensure a directory exists, creating it and all parents if needed
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() || path.exists() {
        return Ok(());
    }

    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("state.json");

        atomic_write(&target, b"{\"records\":[]}").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"{\"records\":[]}");
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_atomic_write_replaces_existing_content() {
        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("state.json");

        atomic_write(&target, b"first version, rather long").unwrap();
        atomic_write(&target, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "second");
    }

    #[test]
    fn test_sibling_files_with_same_stem_stay_separate() {
        let temp_dir = tempdir().unwrap();
        let state = temp_dir.path().join("state.json");
        let export = temp_dir.path().join("state.csv");

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let (target, body) = if i % 2 == 0 {
                    (state.clone(), "{\"version\":\"1.0\"}")
                } else {
                    (export.clone(), "dni,server_timestamp")
                };
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        atomic_write(&target, body.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(std::fs::read_to_string(&state).unwrap(), "{\"version\":\"1.0\"}");
        assert_eq!(std::fs::read_to_string(&export).unwrap(), "dni,server_timestamp");
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_atomic_write_nested_path() {
        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("nested").join("path").join("state.json");

        atomic_write(&target, b"nested").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "nested");
    }

    #[test]
    fn test_atomic_write_fails_when_parent_is_a_file() {
        let temp_dir = tempdir().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        assert!(atomic_write(&blocker.join("state.json"), b"x").is_err());
    }

    #[test]
    fn test_ensure_directory_exists_idempotent() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join("idempotent_test");

        ensure_directory_exists(&dir).unwrap();
        ensure_directory_exists(&dir).unwrap();
        assert!(dir.is_dir());
    }
}
