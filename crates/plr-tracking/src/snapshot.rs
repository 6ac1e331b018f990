//! Source-code snapshot selection.

use plr_types::{PlrResult, TrackingError};
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions captured by default.
pub const DEFAULT_EXTENSIONS: [&str; 4] = ["rs", "toml", "yaml", "yml"];

/// Default filter: Rust sources, manifests and YAML configs
pub fn default_include(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DEFAULT_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

fn skip_dir(name: &str) -> bool {
    name == "target" || name.starts_with('.')
}

/// Relative paths of every file under `root` accepted by `include`, sorted.
/// `target/` and hidden directories are not descended into.
pub fn collect_files<F>(root: &Path, include: F) -> PlrResult<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    if !root.is_dir() {
        return Err(TrackingError::Snapshot {
            message: format!("{} is not a directory", root.display()),
        }
        .into());
    }

    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            let name = entry.file_name().to_string_lossy().to_string();

            if file_type.is_dir() {
                if !skip_dir(&name) {
                    pending.push(path);
                }
            } else if file_type.is_file() && include(&path) {
                if let Ok(relative) = path.strip_prefix(root) {
                    found.push(relative.to_path_buf());
                }
            }
        }
    }

    found.sort();
    Ok(found)
}

/// `/`-separated form of a relative path, for upload names
pub fn upload_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
