//! Lease stores: where lock markers live.
//!
//! A marker is the acquisition timestamp for a lock name. A lock is held while
//! its marker is younger than the lock's TTL; stale markers are only noticed by
//! the next acquire attempt, never swept.

use chrono::{DateTime, TimeZone, Utc};
use station_core::config::{LockBackend, LocksConfig};
use station_core::error::{Result, StationError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub trait LeaseStore: Send + Sync {
    fn name(&self) -> &str;

    /// Record a marker for `name` at `now` unless a live one exists.
    /// Returns whether the marker was written.
    fn try_acquire(&self, name: &str, ttl: Duration, now: DateTime<Utc>) -> Result<bool>;

    /// Remove the marker. Absent markers are not an error.
    fn release(&self, name: &str) -> Result<()>;

    /// Timestamp of the current marker, live or stale.
    fn acquired_at(&self, name: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Marker at `acquired_at` still counts at `now`.
pub fn is_live(acquired_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    match (now - acquired_at).to_std() {
        Ok(age) => age < ttl,
        // Marker from the future (clock skew): treat as held.
        Err(_) => true,
    }
}

/// Create a lease store from configuration.
pub fn create_lease_store(config: &LocksConfig) -> Result<Arc<dyn LeaseStore>> {
    match config.backend {
        LockBackend::Memory => Ok(Arc::new(MemoryLeaseStore::new())),
        LockBackend::File => Ok(Arc::new(FileLeaseStore::open(config.dir_path())?)),
    }
}

/// Process-local markers.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    markers: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn markers(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>>> {
        self.markers
            .lock()
            .map_err(|e| StationError::lease(format!("marker table poisoned: {e}")))
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn try_acquire(&self, name: &str, ttl: Duration, now: DateTime<Utc>) -> Result<bool> {
        let mut markers = self.markers()?;
        if let Some(at) = markers.get(name) {
            if is_live(*at, ttl, now) {
                return Ok(false);
            }
        }
        markers.insert(name.to_string(), now);
        Ok(true)
    }

    fn release(&self, name: &str) -> Result<()> {
        self.markers()?.remove(name);
        Ok(())
    }

    fn acquired_at(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.markers()?.get(name).copied())
    }
}

/// One `<name>.lock` file per lock holding the acquisition time as fractional
/// unix seconds. Markers survive a crash and expire by TTL afterwards.
#[derive(Debug)]
pub struct FileLeaseStore {
    dir: PathBuf,
    // Serializes check-then-write within this process.
    write_lock: Mutex<()>,
}

impl FileLeaseStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        tracing::debug!("🔒 File lease store at {}", dir.display());
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn marker_path(&self, name: &str) -> PathBuf {
        let file: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.lock"))
    }

    fn read_marker(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StationError::lease(format!("read {}: {e}", path.display()))),
        };
        if let Some(at) = parse_marker(&content) {
            return Ok(Some(at));
        }
        // Half-written marker: fall back to the file's mtime.
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| StationError::lease(format!("stat {}: {e}", path.display())))?;
        Ok(Some(DateTime::<Utc>::from(modified)))
    }
}

fn parse_marker(content: &str) -> Option<DateTime<Utc>> {
    let secs: f64 = content.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(whole, nanos).single()
}

fn format_marker(at: DateTime<Utc>) -> String {
    format!("{:.6}", at.timestamp_micros() as f64 / 1e6)
}

impl LeaseStore for FileLeaseStore {
    fn name(&self) -> &str {
        "file"
    }

    fn try_acquire(&self, name: &str, ttl: Duration, now: DateTime<Utc>) -> Result<bool> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StationError::lease(format!("file store poisoned: {e}")))?;
        let path = self.marker_path(name);
        if let Some(at) = self.read_marker(&path)? {
            if is_live(at, ttl, now) {
                return Ok(false);
            }
        }
        std::fs::write(&path, format_marker(now))
            .map_err(|e| StationError::lease(format!("write {}: {e}", path.display())))?;
        Ok(true)
    }

    fn release(&self, name: &str) -> Result<()> {
        let path = self.marker_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StationError::lease(format!("remove {}: {e}", path.display()))),
        }
    }

    fn acquired_at(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        self.read_marker(&self.marker_path(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(8);

    #[test]
    fn test_is_live() {
        let at = Utc::now();
        assert!(is_live(at, TTL, at));
        assert!(is_live(at, TTL, at + chrono::Duration::seconds(7)));
        assert!(!is_live(at, TTL, at + chrono::Duration::seconds(8)));
    }

    #[test]
    fn test_memory_store_acquire_release() {
        let store = MemoryLeaseStore::new();
        let now = Utc::now();
        assert!(store.try_acquire("core", TTL, now).unwrap());
        assert!(!store.try_acquire("core", TTL, now).unwrap());
        assert!(store.try_acquire("git", TTL, now).unwrap());

        store.release("core").unwrap();
        store.release("core").unwrap();
        assert!(store.try_acquire("core", TTL, now).unwrap());
    }

    #[test]
    fn test_memory_store_expiry() {
        let store = MemoryLeaseStore::new();
        let now = Utc::now();
        assert!(store.try_acquire("core", TTL, now).unwrap());
        assert!(store.try_acquire("core", TTL, now + chrono::Duration::seconds(9)).unwrap());
        assert_eq!(
            store.acquired_at("core").unwrap(),
            Some(now + chrono::Duration::seconds(9))
        );
    }

    #[test]
    fn test_file_store_acquire_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLeaseStore::open(dir.path()).unwrap();
        let now = Utc::now();

        assert!(store.try_acquire("tasks/core", TTL, now).unwrap());
        assert!(dir.path().join("tasks_core.lock").exists());
        assert!(!store.try_acquire("tasks/core", TTL, now).unwrap());

        store.release("tasks/core").unwrap();
        assert!(!dir.path().join("tasks_core.lock").exists());
        store.release("tasks/core").unwrap();
    }

    #[test]
    fn test_file_store_marker_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let store = FileLeaseStore::open(dir.path()).unwrap();
            assert!(store.try_acquire("ops", TTL, now).unwrap());
        }
        let store = FileLeaseStore::open(dir.path()).unwrap();
        assert!(!store.try_acquire("ops", TTL, now + chrono::Duration::seconds(1)).unwrap());
        assert!(store.try_acquire("ops", TTL, now + chrono::Duration::seconds(20)).unwrap());
    }

    #[test]
    fn test_file_store_garbage_marker_uses_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLeaseStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("core.lock"), "not-a-number").unwrap();

        // Freshly written file counts as a live marker.
        assert!(!store.try_acquire("core", TTL, Utc::now()).unwrap());
    }

    #[test]
    fn test_marker_format_roundtrip() {
        let at = Utc.timestamp_opt(1_700_000_000, 250_000_000).single().unwrap();
        let parsed = parse_marker(&format_marker(at)).unwrap();
        assert_eq!(parsed.timestamp_millis(), at.timestamp_millis());
        assert!(parse_marker("-3").is_none());
        assert!(parse_marker("").is_none());
    }

    #[test]
    fn test_create_lease_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LocksConfig::default();
        assert_eq!(create_lease_store(&config).unwrap().name(), "memory");

        config.backend = LockBackend::File;
        config.dir = dir.path().join("locks").display().to_string();
        assert_eq!(create_lease_store(&config).unwrap().name(), "file");
        assert!(dir.path().join("locks").is_dir());
    }
}
