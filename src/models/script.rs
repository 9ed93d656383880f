use std::path::Path;

use serde::{Deserialize, Serialize};

/// File extensions recognized as runnable scripts. Matched exactly, case-sensitive.
pub const SCRIPT_EXTENSIONS: &[&str] = &["ts", "js"];

/// A single task: an executable script file plus its registry id.
///
/// Field order is significant: the manifest is written with `id` before `file`
/// so that existing manifests round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script {
    pub id: u32,
    /// Filename (including extension) inside the scripts directory.
    pub file: String,
}

impl Script {
    pub fn new(id: u32, file: impl Into<String>) -> Self {
        Self {
            id,
            file: file.into(),
        }
    }

    /// Name shown to users: the filename without its extension.
    pub fn display_name(&self) -> &str {
        display_name(&self.file)
    }
}

/// Strip the final extension from a filename.
pub fn display_name(file: &str) -> &str {
    Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file)
}

/// Whether the filename carries one of [`SCRIPT_EXTENSIONS`].
pub fn is_script_file(file: &str) -> bool {
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext))
}

/// Whether `name` is a bare filename that stays inside the directory it is joined onto.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Turn a user-supplied task name into a script filename with extension `ext`.
///
/// Path separators become `-` and surrounding whitespace is trimmed. A name
/// that already ends in `.{ext}` is kept as is. Returns `None` when nothing
/// usable is left.
pub fn script_file_name(name: &str, ext: &str) -> Option<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        return None;
    }

    let suffix = format!(".{ext}");
    let file = if cleaned.ends_with(&suffix) {
        cleaned.to_string()
    } else {
        format!("{cleaned}{suffix}")
    };
    is_plain_file_name(&file).then_some(file)
}
