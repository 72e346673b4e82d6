//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::HostError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout rooted at one base directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// One JSON document per server
    pub fn servers_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("servers"))
    }

    /// One JSON document per task/activity
    pub fn activities_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("activities"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create every directory of the layout
    pub async fn setup(&self) -> Result<(), HostError> {
        self.servers_dir().create().await?;
        self.activities_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/hostd");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hostd");

        Self::new(base_dir)
    }
}
