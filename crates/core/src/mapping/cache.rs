//! Modification-time based cache for the user mapping file.
//!
//! [`MappingCache`] re-examines the file's mtime on every call and re-parses
//! only when it moved forward. Readers load the published snapshot without
//! locking; reloads are serialized by a mutex and publish a new snapshot with
//! a single pointer swap, so nobody ever observes a half-built document.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use arc_swap::ArcSwapOption;
use tracing::{debug, info, warn};

use super::document::MappingDocument;
use super::parser;
use crate::errors::MappingError;

/// The last successfully parsed document and the mtime it was read at.
#[derive(Debug)]
pub struct Snapshot {
    pub modified: SystemTime,
    pub document: Arc<MappingDocument>,
}

/// Caches the parsed mapping file, reloading it when it changes on disk.
pub struct MappingCache {
    path: PathBuf,
    current: ArcSwapOption<Snapshot>,
    reload_lock: Mutex<()>,
    reloads: AtomicU64,
}

impl MappingCache {
    /// Create a cache for the mapping file at `path`. Nothing is read until
    /// the first [`get_mapping`](Self::get_mapping).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: ArcSwapOption::empty(),
            reload_lock: Mutex::new(()),
            reloads: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The currently published snapshot, without checking the file.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    /// Number of successful parses performed so far.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Return the current mapping, re-reading the file if it changed.
    ///
    /// Returns `None` when the file does not exist, or when it has never
    /// been parsed successfully. A failed reload keeps serving the previous
    /// document.
    pub fn get_mapping(&self) -> Option<Arc<MappingDocument>> {
        match self.refresh() {
            Ok(document) => Some(document),
            Err(MappingError::AbsentSource(path)) => {
                debug!(path = %path, "user mapping file does not exist and will not be read");
                None
            }
            Err(e) => {
                warn!(error = %e, "keeping previous user mapping");
                self.snapshot().map(|snapshot| Arc::clone(&snapshot.document))
            }
        }
    }

    /// Like [`get_mapping`](Self::get_mapping) but surfaces why no fresh
    /// document could be produced. State is left untouched on error.
    pub fn refresh(&self) -> Result<Arc<MappingDocument>, MappingError> {
        let modified = self.source_modified()?;

        if let Some(snapshot) = self.fresh_snapshot(modified) {
            debug!(path = %self.path.display(), "user mapping unchanged");
            return Ok(Arc::clone(&snapshot.document));
        }

        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished reloading this change while we
        // were waiting for the lock.
        if let Some(snapshot) = self.fresh_snapshot(modified) {
            return Ok(Arc::clone(&snapshot.document));
        }

        let document = Arc::new(parser::load_file(&self.path)?);

        for warning in document.unresolved_references() {
            warn!(
                path = %self.path.display(),
                config = %warning.config_name,
                "{}",
                warning
            );
        }

        self.current.store(Some(Arc::new(Snapshot {
            modified,
            document: Arc::clone(&document),
        })));
        self.reloads.fetch_add(1, Ordering::Relaxed);

        let summary = document.summary();
        info!(
            path = %self.path.display(),
            service = document.service_name(),
            configs = summary.configs,
            users = summary.users,
            groups = summary.groups,
            "user mapping loaded"
        );
        Ok(document)
    }

    /// The published snapshot, if it is at least as new as `modified`.
    fn fresh_snapshot(&self, modified: SystemTime) -> Option<Arc<Snapshot>> {
        self.current
            .load_full()
            .filter(|snapshot| modified <= snapshot.modified)
    }

    fn source_modified(&self) -> Result<SystemTime, MappingError> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MappingError::AbsentSource(self.path.display().to_string()));
            }
            Err(source) => {
                return Err(MappingError::Io {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };
        metadata.modified().map_err(|source| MappingError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

impl std::fmt::Debug for MappingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingCache")
            .field("path", &self.path)
            .field("loaded", &self.current.load().is_some())
            .field("reloads", &self.reload_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    const V1: &str = r#"<unix-user-mapping>
<config name="A" protocol="rdp"><param name="hostname" value="a"/></config>
<user name="alice"><config-ref name="A"/><config-ref name="B"/></user>
</unix-user-mapping>"#;

    const V2: &str = r#"<unix-user-mapping>
<config name="B" protocol="ssh"><param name="hostname" value="b"/></config>
<user name="alice"><config-ref name="A"/><config-ref name="B"/></user>
</unix-user-mapping>"#;

    fn write_at(path: &Path, contents: &str, modified: SystemTime) {
        std::fs::write(path, contents).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    fn base_time() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_absent_source() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MappingCache::new(dir.path().join("missing.xml"));
        assert!(cache.get_mapping().is_none());
        assert!(matches!(cache.refresh(), Err(MappingError::AbsentSource(_))));
        assert_eq!(cache.reload_count(), 0);
    }

    #[test]
    fn test_cache_hit_returns_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.xml");
        write_at(&path, V1, base_time());

        let cache = MappingCache::new(&path);
        let first = cache.get_mapping().unwrap();
        let second = cache.get_mapping().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.reload_count(), 1);
    }

    #[test]
    fn test_reload_on_newer_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.xml");
        write_at(&path, V1, base_time());

        let cache = MappingCache::new(&path);
        let v1 = cache.get_mapping().unwrap();
        assert!(v1.config("A").is_some());

        write_at(&path, V2, base_time() + Duration::from_secs(5));
        let v2 = cache.get_mapping().unwrap();
        assert!(v2.config("A").is_none());
        assert!(v2.config("B").is_some());
        assert_eq!(cache.reload_count(), 2);
        assert_eq!(
            cache.snapshot().unwrap().modified,
            base_time() + Duration::from_secs(5)
        );
    }

    #[test]
    fn test_older_mtime_is_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.xml");
        write_at(&path, V1, base_time());

        let cache = MappingCache::new(&path);
        cache.get_mapping().unwrap();

        write_at(&path, V2, base_time() - Duration::from_secs(60));
        let doc = cache.get_mapping().unwrap();
        assert!(doc.config("A").is_some());
        assert_eq!(cache.reload_count(), 1);
    }

    #[test]
    fn test_failed_reload_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.xml");
        write_at(&path, V1, base_time());

        let cache = MappingCache::new(&path);
        let v1 = cache.get_mapping().unwrap();

        let broken = r#"<unix-user-mapping><config name="B"/></unix-user-mapping>"#;
        write_at(&path, broken, base_time() + Duration::from_secs(5));

        assert!(matches!(
            cache.refresh(),
            Err(MappingError::Structural { .. })
        ));
        let served = cache.get_mapping().unwrap();
        assert!(Arc::ptr_eq(&v1, &served));
        assert_eq!(cache.snapshot().unwrap().modified, base_time());
        assert_eq!(cache.reload_count(), 1);
    }

    #[test]
    fn test_failed_first_load_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.xml");
        write_at(&path, "<unix-user-mapping>", base_time());

        let cache = MappingCache::new(&path);
        assert!(cache.get_mapping().is_none());
        assert!(cache.snapshot().is_none());
    }

    #[test]
    fn test_concurrent_callers_parse_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.xml");
        write_at(&path, V1, base_time());

        let cache = Arc::new(MappingCache::new(&path));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get_mapping().map(|doc| doc.summary()))
            })
            .collect();

        for handle in handles {
            let summary = handle.join().unwrap().unwrap();
            assert_eq!(summary.configs, 1);
        }
        assert_eq!(cache.reload_count(), 1);
    }
}
