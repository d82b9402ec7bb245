//! Path utilities.
//!
//! Resolves where lodestore keeps its data and maps workspace identifiers
//! onto directory names.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Get the lodestore configuration directory.
///
/// This follows XDG conventions on Linux/macOS:
/// - `$XDG_CONFIG_HOME/lodestore` if set
/// - `~/.config/lodestore` otherwise
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("lodestore"))
}

/// Get the lodestore data directory.
///
/// This follows XDG conventions:
/// - `$XDG_DATA_HOME/lodestore` if set
/// - `~/.local/share/lodestore` otherwise
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("lodestore"))
}

/// Get the default directory for durable key-value storage.
pub fn storage_dir() -> Option<PathBuf> {
    data_dir().map(|p| p.join("storage"))
}

/// Get the default config file path.
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|p| p.join("lodestore.json"))
}

/// Derive a stable directory name for a workspace identifier.
///
/// Workspace identifiers are usually URIs or absolute paths, neither of which
/// is safe to use as a single path component, so they are hashed.
pub fn workspace_storage_id(workspace: &str) -> String {
    let digest = Sha256::digest(workspace.as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Resolve the directory holding namespace files for an optional workspace.
pub fn scoped_dir(base: &Path, workspace: Option<&str>) -> PathBuf {
    match workspace {
        Some(ws) => base.join(workspace_storage_id(ws)),
        None => base.to_path_buf(),
    }
}

/// Check whether a name can be used as a single file name component.
///
/// Rejects empty names, separators and the relative directory markers.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}
