use crate::{Result, StorageAdapter};
use std::fs;
use std::path::PathBuf;

/// File-per-key storage under a single directory.
pub struct FileStorageAdapter {
    base_path: PathBuf,
}

impl FileStorageAdapter {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path)
            .map_err(|e| crate::Error::Storage(format!("Failed to create directory: {}", e)))?;
        Ok(Self { base_path })
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        let sanitized = key.replace(['/', '\\', ':'], "_");
        self.base_path.join(format!("{}.json", sanitized))
    }
}

impl StorageAdapter for FileStorageAdapter {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_to_path(key);

        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(crate::Error::Storage(format!("Failed to read file: {}", e))),
        }
    }

    fn put(&self, key: &str, value: String) -> Result<()> {
        let path = self.key_to_path(key);
        let temp_path = path.with_extension("json.tmp");

        fs::write(&temp_path, value)
            .map_err(|e| crate::Error::Storage(format!("Failed to write file: {}", e)))?;
        fs::rename(&temp_path, &path)
            .map_err(|e| crate::Error::Storage(format!("Failed to write file: {}", e)))?;

        Ok(())
    }

    fn del(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key);

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(crate::Error::Storage(format!(
                "Failed to delete file: {}",
                e
            ))),
        }
    }
}
