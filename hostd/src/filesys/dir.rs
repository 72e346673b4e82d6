//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::errors::HostError;
use crate::filesys::file::File;

/// A directory of record files
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), HostError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Remove the directory tree. Missing directories are fine.
    pub async fn delete(&self) -> Result<(), HostError> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Files ending in `.{extension}`, sorted by path. Leftover temporary
    /// files from interrupted writes are not listed.
    pub async fn list_files(&self, extension: &str) -> Result<Vec<File>, HostError> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut paths = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == extension) {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths.into_iter().map(File::new).collect())
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// The JSON record file of `id`
    pub fn record(&self, id: &Uuid) -> File {
        self.file(&format!("{}.json", id))
    }

    /// Fresh uniquely named directory under the system temp dir
    pub async fn create_temp_dir(prefix: &str) -> Result<Dir, HostError> {
        let dir = Dir::new(std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4())));
        dir.create().await?;
        Ok(dir)
    }
}
