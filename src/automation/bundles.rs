//! Local bundle packages.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{Result, ServerError};

const PACKAGE_EXTENSION: &str = "zip";

/// Directory of `<name>.zip` bundle packages.
///
/// ```text
/// {base_path}/
///   ModifyFamily.zip
///   CountIt.zip
/// ```
#[derive(Debug, Clone)]
pub struct BundleDirectory {
    base_path: PathBuf,
}

impl BundleDirectory {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path a package would live at; it may not exist
    pub fn package_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}.{}", name, PACKAGE_EXTENSION))
    }

    /// Names (without extension) of all packages, sorted.
    ///
    /// A missing directory lists as empty.
    pub async fn list(&self) -> Result<Vec<String>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(PACKAGE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Read a package, failing with `BundleNotFound` if it is absent
    pub async fn read(&self, name: &str) -> Result<Bytes> {
        let path = self.package_path(name);
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ServerError::BundleNotFound(path.display().to_string())
            } else {
                ServerError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }
}
