// src/fs/mock.rs

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use super::FileSystem;

#[derive(Debug, Default)]
struct MockState {
    files: HashMap<PathBuf, Vec<u8>>,
    dirs: HashSet<PathBuf>,
    symlinks: HashMap<PathBuf, PathBuf>,
    read_only: bool,
}

/// In-memory filesystem for tests. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let fs = Self::default();
        fs.state.lock().dirs.insert(PathBuf::from("."));
        fs.state.lock().dirs.insert(PathBuf::from("/"));
        fs
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state.lock();
        add_parents(&mut state.dirs, &path);
        state.files.insert(path, content.into());
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state.lock();
        add_parents(&mut state.dirs, &path);
        state.dirs.insert(path);
    }

    /// Make every mutating call fail, as on a full or read-only disk.
    pub fn set_read_only(&self, read_only: bool) {
        self.state.lock().read_only = read_only;
    }

    pub fn file_contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state
            .lock()
            .files
            .get(path.as_ref())
            .map(|c| String::from_utf8_lossy(c).into_owned())
    }

    pub fn symlink_target(&self, link: impl AsRef<Path>) -> Option<PathBuf> {
        self.state.lock().symlinks.get(link.as_ref()).cloned()
    }

    fn check_writable(&self, path: &Path) -> Result<()> {
        if self.state.lock().read_only {
            return Err(anyhow!("read-only filesystem: {:?}", path));
        }
        Ok(())
    }
}

fn add_parents(dirs: &mut HashSet<PathBuf>, path: &Path) {
    let mut parent = path.parent();
    while let Some(p) = parent {
        if p.as_os_str().is_empty() {
            break;
        }
        dirs.insert(p.to_path_buf());
        parent = p.parent();
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let state = self.state.lock();
        match state.files.get(path) {
            Some(content) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            None if state.dirs.contains(path) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.check_writable(path)?;
        self.add_file(path, contents);
        Ok(())
    }

    fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.check_writable(path)?;
        let mut state = self.state.lock();
        add_parents(&mut state.dirs, path);
        state
            .files
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(contents);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.check_writable(path)?;
        self.state
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| anyhow!("File not found: {:?}", path))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        self.check_writable(path)?;
        let mut state = self.state.lock();
        if state.dirs.contains(path) || state.files.contains_key(path) {
            return Err(anyhow!("already exists: {:?}", path));
        }
        state.dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.check_writable(path)?;
        let mut state = self.state.lock();
        if !state.dirs.contains(path) {
            return Err(anyhow!("Not a directory or not found: {:?}", path));
        }
        state.dirs.retain(|d| !d.starts_with(path));
        state.files.retain(|f, _| !f.starts_with(path));
        state.symlinks.retain(|l, _| !l.starts_with(path));
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        self.check_writable(link)?;
        self.state
            .lock()
            .symlinks
            .insert(link.to_path_buf(), target.to_path_buf());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state.lock();
        state.files.contains_key(path) || state.dirs.contains(path) || state.symlinks.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state.lock().dirs.contains(path)
    }
}
