//! File Notification Cache
//!
//! Stores the notification list as a JSON array. Writes go to a sibling
//! temporary file that is then renamed over the cache, so a crash never
//! leaves a half-written list behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::application::ports::{CacheError, NotificationCachePort};
use crate::domain::notification::Notification;

/// JSON file implementation of `NotificationCachePort`.
#[derive(Debug, Clone)]
pub struct FileNotificationCache {
    path: PathBuf,
}

impl FileNotificationCache {
    /// Cache stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cache file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl NotificationCachePort for FileNotificationCache {
    fn load(&self) -> Result<Vec<Notification>, CacheError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn store(&self, notifications: &[Notification]) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(notifications)?;
        let temp = self.temp_path();
        std::fs::write(&temp, bytes)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::Severity;
    use chrono::Utc;

    fn notification(id: &str, read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            title: "Order filled".to_string(),
            message: "AAPL".to_string(),
            severity: Severity::High,
            payload: None,
            timestamp: Utc::now(),
            read,
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileNotificationCache::new(dir.path().join("none.json"));
        assert!(cache.load().unwrap().is_empty());
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileNotificationCache::new(dir.path().join("nested/notifications.json"));
        let stored = vec![notification("a", false), notification("b", true)];

        cache.store(&stored).unwrap();

        assert_eq!(cache.load().unwrap(), stored);
        assert!(!cache.temp_path().exists());
    }

    #[test]
    fn store_replaces_previous_list() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileNotificationCache::new(dir.path().join("n.json"));
        cache.store(&[notification("a", false)]).unwrap();
        cache.store(&[]).unwrap();
        assert!(cache.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"{not a list").unwrap();
        let cache = FileNotificationCache::new(file.path());
        assert!(matches!(cache.load(), Err(CacheError::Corrupt(_))));
    }
}
