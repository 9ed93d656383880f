//! Script registry: keeps the manifest consistent with the scripts directory.
//!
//! Every operation reloads the manifest, reconciles it against the directory
//! listing, applies its change and writes it back, all while holding the
//! registry lock. The lock is the single writer for the manifest of one
//! scripts directory; clones of a [`Registry`] share it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::models::{is_plain_file_name, is_script_file, Script};
use crate::store::{ManifestStore, StoreError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("script not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid script filename: {0:?}")]
    InvalidName(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone)]
pub struct Registry {
    dir: PathBuf,
    store: Arc<Mutex<ManifestStore>>,
}

impl Registry {
    /// Open the registry for `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| RegistryError::Io {
            path: dir.clone(),
            source,
        })?;
        let store = ManifestStore::new(&dir);
        Ok(Self {
            dir,
            store: Arc::new(Mutex::new(store)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ============================================================
    // Queries
    // ============================================================

    /// Reconcile the manifest with the directory and return every entry.
    ///
    /// The manifest is rewritten even when nothing changed. Order follows the
    /// manifest; callers sort by id for display.
    pub fn list(&self) -> Result<Vec<Script>> {
        let store = self.store.lock().expect("manifest lock poisoned");
        let (scripts, added) = self.reconcile(&store)?;
        store.save(&scripts)?;
        if added > 0 {
            tracing::info!(added, total = scripts.len(), "Registered new scripts");
        }
        Ok(scripts)
    }

    /// Raw content of a script file.
    pub fn read(&self, file: &str) -> Result<String> {
        let path = self.file_path(file)?;
        fs::read_to_string(&path).map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "Failed to read script");
            RegistryError::NotFound(file.to_string())
        })
    }

    /// Highest id in the manifest, or 0 when it is empty. Advisory only.
    pub fn max_id(&self) -> Result<u32> {
        let store = self.store.lock().expect("manifest lock poisoned");
        Ok(max_id(&store.load()?))
    }

    // ============================================================
    // Mutations
    // ============================================================

    /// Write a new script and register it under `id`.
    ///
    /// The content is written before the manifest, so a failed content write
    /// leaves the manifest untouched.
    pub fn create(&self, id: u32, file: &str, content: &str) -> Result<Script> {
        let path = self.file_path(file)?;
        let store = self.store.lock().expect("manifest lock poisoned");
        let (mut scripts, _) = self.reconcile(&store)?;

        if scripts.iter().any(|s| s.id == id) {
            return Err(RegistryError::Conflict(format!("id {id} already exists")));
        }
        if scripts.iter().any(|s| s.file == file) {
            return Err(RegistryError::Conflict(format!("{file} already exists")));
        }

        write_file(&path, content)?;
        let script = Script::new(id, file);
        scripts.push(script.clone());
        store.save(&scripts)?;

        tracing::info!(id, file, "Created script");
        Ok(script)
    }

    /// Overwrite the content of `existing.file` and move its entry to `new_id`.
    ///
    /// The filename never changes. When `existing` (compared on both id and
    /// file) is not in the manifest, only the content is written and `new_id`
    /// is not checked.
    pub fn update(&self, existing: &Script, new_id: u32, content: &str) -> Result<()> {
        let path = self.file_path(&existing.file)?;
        let store = self.store.lock().expect("manifest lock poisoned");
        let (mut scripts, added) = self.reconcile(&store)?;

        match scripts.iter().position(|s| s == existing) {
            Some(pos) => {
                if scripts
                    .iter()
                    .any(|s| s.id == new_id && s.file != existing.file)
                {
                    return Err(RegistryError::Conflict(format!(
                        "id {new_id} already exists"
                    )));
                }
                write_file(&path, content)?;
                scripts[pos].id = new_id;
                store.save(&scripts)?;
                tracing::info!(old_id = existing.id, new_id, file = %existing.file, "Updated script");
            }
            None => {
                write_file(&path, content)?;
                if added > 0 {
                    store.save(&scripts)?;
                }
                tracing::warn!(
                    id = existing.id,
                    file = %existing.file,
                    "Script not in manifest, wrote content only"
                );
            }
        }

        Ok(())
    }

    /// Remove the script file and its manifest entry.
    ///
    /// Returns `None` when no entry has `id`. A backing file that is already
    /// gone is not an error.
    pub fn delete(&self, id: u32) -> Result<Option<Script>> {
        let store = self.store.lock().expect("manifest lock poisoned");
        let (mut scripts, _) = self.reconcile(&store)?;

        let Some(pos) = scripts.iter().position(|s| s.id == id) else {
            return Ok(None);
        };

        let script = scripts.remove(pos);
        let path = self.file_path(&script.file)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(RegistryError::Io { path, source }),
        }
        store.save(&scripts)?;

        tracing::info!(id, file = %script.file, "Deleted script");
        Ok(Some(script))
    }

    // ============================================================
    // Internals
    // ============================================================

    /// Load the manifest and append an entry for every untracked script file.
    ///
    /// Entries whose file is gone are kept. Returns the entries and how many
    /// were added.
    fn reconcile(&self, store: &ManifestStore) -> Result<(Vec<Script>, usize)> {
        let mut scripts = store.load()?;
        let mut last = max_id(&scripts);
        let mut added = 0;

        for file in self.script_files()? {
            if scripts.iter().any(|s| s.file == file) {
                continue;
            }
            let Some(next) = last.checked_add(1) else {
                tracing::error!(file = %file, "No id left for untracked script");
                return Err(RegistryError::Conflict("id space exhausted".to_string()));
            };
            tracing::debug!(id = next, file = %file, "Allocating id for untracked script");
            scripts.push(Script::new(next, file));
            last = next;
            added += 1;
        }

        Ok((scripts, added))
    }

    /// Names of regular files directly in the directory with a script extension, sorted.
    fn script_files(&self) -> Result<Vec<String>> {
        let io_err = |source| RegistryError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_script_file(&name) {
                continue;
            }
            // Follows symlinks, so a linked script counts as a file.
            if fs::metadata(entry.path()).is_ok_and(|m| m.is_file()) {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    fn file_path(&self, file: &str) -> Result<PathBuf> {
        if !is_plain_file_name(file) {
            return Err(RegistryError::InvalidName(file.to_string()));
        }
        Ok(self.dir.join(file))
    }
}

fn max_id(scripts: &[Script]) -> u32 {
    scripts.iter().map(|s| s.id).max().unwrap_or(0)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })
}
