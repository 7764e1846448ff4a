//! JSON document persistence.
//!
//! Loading never fails the caller: a missing file yields `T::default()` and a
//! corrupt one is logged and also yields the default, so a damaged file can
//! never block startup. Saving writes to a sibling temp file and renames it
//! into place; with `backup` set, the previous file is first rotated to
//! `<name>.bak`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{PersistError, Result};

/// Path of the backup file for `path` (`memories.json` -> `memories.json.bak`).
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

/// Load a JSON document, falling back to the default on a missing or corrupt file.
pub fn load_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No persisted file, starting empty");
            return T::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read persisted file, starting empty");
            return T::default();
        }
    };

    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Persisted file is malformed, starting empty");
            T::default()
        }
    }
}

/// Save a JSON document atomically, optionally rotating the old file to `.bak`.
pub fn save_json<T>(path: &Path, value: &T, backup: bool) -> Result<()>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| PersistError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(value)?;

    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = fs::File::create(&tmp_path).map_err(|e| PersistError::io(&tmp_path, e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| PersistError::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| PersistError::io(&tmp_path, e))?;
    }

    if backup && path.exists() {
        let bak = backup_path(path);
        fs::rename(path, &bak).map_err(|e| PersistError::io(&bak, e))?;
        debug!(path = %bak.display(), "Rotated previous file to backup");
    }

    fs::rename(&tmp_path, path).map_err(|e| PersistError::io(path, e))?;
    debug!(path = %path.display(), bytes = json.len(), "Saved persisted file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        items: Vec<String>,
    }

    #[test]
    fn test_load_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let doc: Doc = load_json_or_default(&dir.path().join("missing.json"));
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn test_load_corrupt_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();

        let doc: Doc = load_json_or_default(&path);
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let doc = Doc {
            items: vec!["a".into(), "b".into()],
        };

        save_json(&path, &doc, false).unwrap();
        let loaded: Doc = load_json_or_default(&path);
        assert_eq!(loaded, doc);
        assert!(!path.with_file_name("doc.json.tmp").exists());
    }

    #[test]
    fn test_backup_rotates_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        save_json(&path, &Doc { items: vec!["old".into()] }, true).unwrap();
        assert!(!backup_path(&path).exists());

        save_json(&path, &Doc { items: vec!["new".into()] }, true).unwrap();

        let current: Doc = load_json_or_default(&path);
        let previous: Doc = load_json_or_default(&backup_path(&path));
        assert_eq!(current.items, vec!["new"]);
        assert_eq!(previous.items, vec!["old"]);
    }

    #[test]
    fn test_save_without_backup_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        save_json(&path, &Doc { items: vec!["one".into()] }, false).unwrap();
        save_json(&path, &Doc { items: vec!["two".into()] }, false).unwrap();

        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_backup_path() {
        let p = backup_path(Path::new("/data/memories.json"));
        assert_eq!(p, PathBuf::from("/data/memories.json.bak"));
    }
}
