//! On-disk manifest mapping script ids to filenames.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use thiserror::Error;

use crate::models::Script;

/// Manifest filename, stored alongside the scripts it describes.
pub const MANIFEST_FILE: &str = "scripts.json";

const INDENT: &[u8] = b"    ";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read manifest {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write manifest {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reads and writes `scripts.json` for one scripts directory.
///
/// The store itself is not synchronized; callers that share it across
/// threads wrap it in a lock (see [`crate::registry::Registry`]).
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(scripts_dir: impl AsRef<Path>) -> Self {
        Self {
            path: scripts_dir.as_ref().join(MANIFEST_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest.
    ///
    /// A missing file yields an empty manifest. Malformed content is also
    /// treated as empty so the next reconciliation rebuilds it from the
    /// directory listing. Only a file that exists but cannot be read is an
    /// error.
    pub fn load(&self) -> Result<Vec<Script>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let scripts: Vec<Script> = match serde_json::from_str(&content) {
            Ok(scripts) => scripts,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Malformed manifest, rebuilding from directory scan"
                );
                return Ok(Vec::new());
            }
        };

        Ok(dedup_by_file(scripts))
    }

    /// Persist the manifest with four-space indentation and a trailing newline.
    ///
    /// Content goes to a sibling temporary file that is then renamed over the
    /// manifest, so an interrupted write leaves the previous manifest intact.
    pub fn save(&self, scripts: &[Script]) -> Result<(), StoreError> {
        let bytes = to_pretty_json(scripts)?;
        let tmp = self.path.with_extension("json.tmp");

        let write = |path: &Path| -> io::Result<()> {
            let mut file = fs::File::create(path)?;
            file.write_all(&bytes)?;
            file.sync_all()
        };

        write(&tmp)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|source| {
                let _ = fs::remove_file(&tmp);
                StoreError::Write {
                    path: self.path.clone(),
                    source,
                }
            })
    }
}

fn to_pretty_json(scripts: &[Script]) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    {
        let formatter = PrettyFormatter::with_indent(INDENT);
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        scripts.serialize(&mut ser)?;
    }
    buf.push(b'\n');
    Ok(buf)
}

/// Keep the first entry for each filename.
fn dedup_by_file(scripts: Vec<Script>) -> Vec<Script> {
    let mut seen = HashSet::new();
    let before = scripts.len();
    let scripts: Vec<Script> = scripts
        .into_iter()
        .filter(|s| seen.insert(s.file.clone()))
        .collect();
    if scripts.len() != before {
        tracing::warn!(
            dropped = before - scripts.len(),
            "Manifest contained duplicate filenames"
        );
    }
    scripts
}
