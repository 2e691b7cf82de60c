//! Persistence backends for store tables.
//!
//! A backend is a flat key/blob store. The store keeps one item per model,
//! keyed by the model name, holding the table's JSON serialization.

use getrandom::fill;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Key/blob persistence used by the store.
///
/// A missing key is `Ok(None)`, never an error.
pub trait Backend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// Directory-of-files backend: one file per key.
#[derive(Clone, Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Opens a backend rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Returns the directory holding the item files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && !key.contains(['/', '\\'])
            && !key.contains(".tmp.");
        if !valid {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid storage key: {key:?}"),
            )
            .into());
        }
        Ok(self.dir.join(key))
    }

    /// Writes `data` to `path` atomically.
    ///
    /// The data goes to a randomly named sibling file which is synced and
    /// then renamed over the target; the directory is synced afterwards so
    /// the rename itself is durable. A crash leaves either the old or the new
    /// content, never a partial write.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let tmp_path = random_tmp_path(path)?;

        let mut tmp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;

        tmp_file.write_all(data)?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        if let Err(e) = atomic_replace(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        #[cfg(not(target_os = "windows"))]
        File::open(&self.dir)?.sync_all()?;

        Ok(())
    }
}

impl Backend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        self.write_atomic(&path, value.as_bytes())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// Generates a unique temporary file path next to `path`.
///
/// Format: `filename.tmp.<randomhex>`
fn random_tmp_path(path: &Path) -> Result<PathBuf> {
    let mut buf = [0u8; 8]; // 64 bit entropy
    fill(&mut buf).map_err(|e| io::Error::other(format!("random generator unavailable: {e}")))?;

    let rand_string = buf.iter().map(|b| format!("{:02x}", b)).collect::<String>();

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(path.with_file_name(format!("{file_name}.tmp.{rand_string}")))
}

/// Replaces `target` with `tmp_path` using `ReplaceFileW` with
/// `REPLACEFILE_WRITE_THROUGH`. A plain rename is used when the target does
/// not exist yet, since `ReplaceFileW` requires an existing file.
#[cfg(target_os = "windows")]
fn atomic_replace(tmp_path: &Path, target: &Path) -> io::Result<()> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

    if !target.exists() {
        return fs::rename(tmp_path, target);
    }

    fn to_wide(s: &OsStr) -> Vec<u16> {
        s.encode_wide().chain(std::iter::once(0)).collect()
    }

    let target_w = to_wide(target.as_os_str());
    let tmp_w = to_wide(tmp_path.as_os_str());

    // SAFETY:
    // - Strings are valid UTF-16 and null-terminated
    // - Pointers remain valid during the call
    // - Windows does not retain the pointers after return
    let result = unsafe {
        ReplaceFileW(
            target_w.as_ptr(),
            tmp_w.as_ptr(),
            std::ptr::null(),
            REPLACEFILE_WRITE_THROUGH,
            std::ptr::null(),
            std::ptr::null(),
        )
    };

    if result == 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// On Unix, `rename()` is atomic when both paths are on the same filesystem.
#[cfg(not(target_os = "windows"))]
fn atomic_replace(tmp_path: &Path, target: &Path) -> io::Result<()> {
    fs::rename(tmp_path, target)
}

/// Process-local backend, mostly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl Backend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.items.lock().clear();
        Ok(())
    }
}

/// Backend that persists nothing; every read is a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn get_item(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove_item(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    // --------------------------------------------------
    // FILE BACKEND
    // --------------------------------------------------

    #[test]
    fn get_returns_written_value() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();

        backend.set_item("User", "{\"1\":null}").unwrap();

        assert_eq!(backend.get_item("User").unwrap().as_deref(), Some("{\"1\":null}"));
    }

    #[test]
    fn missing_key_is_none() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();

        assert_eq!(backend.get_item("Message").unwrap(), None);
    }

    #[test]
    fn set_replaces_existing_value() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();

        backend.set_item("User", "first").unwrap();
        backend.set_item("User", "second").unwrap();

        let content = fs::read_to_string(dir.path().join("User")).unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn tmp_file_is_removed_after_success() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.set_item("User", "data").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], "User");
    }

    #[test]
    fn directory_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("woosh");

        FileBackend::new(&nested).unwrap();

        assert!(nested.is_dir());
    }

    #[test]
    fn remove_and_clear() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.set_item("User", "u").unwrap();
        backend.set_item("Message", "m").unwrap();

        backend.remove_item("User").unwrap();
        backend.remove_item("User").unwrap();
        assert_eq!(backend.get_item("User").unwrap(), None);

        backend.clear().unwrap();
        assert_eq!(backend.get_item("Message").unwrap(), None);
    }

    #[test]
    fn keys_cannot_escape_the_directory() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("store")).unwrap();

        assert!(backend.set_item("../escape", "x").is_err());
        assert!(backend.set_item("a/b", "x").is_err());
        assert!(backend.get_item("").is_err());
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn tmp_names_are_unique_and_siblings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("User");

        let a = random_tmp_path(&path).unwrap();
        let b = random_tmp_path(&path).unwrap();

        assert_ne!(a, b);
        assert_ne!(a, path);
        assert_eq!(a.parent(), path.parent());
    }

    // --------------------------------------------------
    // MEMORY / NULL BACKENDS
    // --------------------------------------------------

    #[test]
    fn memory_backend_behaves_like_a_map() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get_item("k").unwrap(), None);

        backend.set_item("k", "v").unwrap();
        assert_eq!(backend.get_item("k").unwrap().as_deref(), Some("v"));
        assert_eq!(backend.len(), 1);

        backend.clear().unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn null_backend_forgets_everything() {
        let backend = NullBackend;
        backend.set_item("k", "v").unwrap();
        assert_eq!(backend.get_item("k").unwrap(), None);
    }
}
