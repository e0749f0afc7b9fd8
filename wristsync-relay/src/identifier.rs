//! File-backed device identifier: a UUID written on first run and reused afterwards.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use wristsync_core::DeviceIdentifierService;

pub struct FileDeviceIdentifier {
    path: PathBuf,
    cached: OnceLock<String>,
}

impl FileDeviceIdentifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: OnceLock::new(),
        }
    }

    fn read_or_create(path: &Path) -> std::io::Result<String> {
        match std::fs::read_to_string(path) {
            Ok(s) => return Ok(s.trim().to_string()),
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
            Err(_) => {}
        }
        let id = uuid::Uuid::new_v4().to_string();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, &id)?;
        tracing::info!(path = %path.display(), "created device identifier");
        Ok(id)
    }
}

impl DeviceIdentifierService for FileDeviceIdentifier {
    /// Falls back to an unsaved identifier when the file cannot be used.
    fn device_identifier(&self) -> String {
        self.cached
            .get_or_init(|| match Self::read_or_create(&self.path) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "identifier not persisted");
                    uuid::Uuid::new_v4().to_string()
                }
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_created_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/device_id");
        let first = FileDeviceIdentifier::new(&path).device_identifier();
        assert_eq!(first.len(), 36);
        let second = FileDeviceIdentifier::new(&path).device_identifier();
        assert_eq!(first, second);
    }

    #[test]
    fn existing_file_is_read_verbatim_minus_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_id");
        std::fs::write(&path, "watch-7F3A\n").unwrap();
        assert_eq!(FileDeviceIdentifier::new(&path).device_identifier(), "watch-7F3A");
    }
}
