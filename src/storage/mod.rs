//! On-disk persistence for the playground's state
//!
//! Everything lives in one data directory: `config.toml`, `token.json` and
//! `usage.json`. Files hold credentials, so they are written owner-only.

mod tokens;
mod usage;

pub use tokens::FileTokenStore;
pub use usage::FileUsageLog;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolved locations of the persisted files.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Use `explicit` when given, otherwise the platform data directory.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path,
            None => ProjectDirs::from("com", "graph-playground", "graph-playground")
                .context("Could not determine data directory")?
                .data_dir()
                .to_path_buf(),
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn token_path(&self) -> PathBuf {
        self.root.join("token.json")
    }

    pub fn usage_path(&self) -> PathBuf {
        self.root.join("usage.json")
    }
}

/// Write `content` to `path`, creating parent directories, and restrict the
/// file to its owner.
pub fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
