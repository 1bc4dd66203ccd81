use crate::error::Error;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// A directory receiving compact JSON files. Existing files are overwritten.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| Error::Write {
            path: root.clone(),
            source,
        })?;
        Ok(OutputDir { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns the number of bytes written.
    pub fn write<T: Serialize + ?Sized>(&self, file_name: &str, value: &T) -> Result<u64, Error> {
        let path = self.root.join(file_name);
        let bytes = serde_json::to_vec(value)?;
        fs::write(&path, &bytes).map_err(|source| Error::Write { path, source })?;
        Ok(bytes.len() as u64)
    }
}
