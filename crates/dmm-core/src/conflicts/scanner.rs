//! Scan scheduling
//!
//! The core is synchronous: the scanner exposes explicit trigger methods and
//! `maybe_run_periodic`, which compares the last scan time against the
//! configured interval. Whatever owns the process clock (daemon, CLI, test)
//! calls it; the scanner never spawns its own timer.

use std::sync::atomic::Ordering;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::config::ScanConfig;

use super::detector::{ConflictDetector, DEFAULT_METHODS};
use super::types::{ConflictError, DetectionMethod, Result, ScanRecord};

/// Dispatches conflict scans and tracks scan history
pub struct ConflictScanner {
    detector: ConflictDetector,
    config: ScanConfig,
    last_scan_at: Mutex<Option<DateTime<Utc>>>,
}

impl ConflictScanner {
    pub fn new(detector: ConflictDetector, config: ScanConfig) -> Self {
        Self {
            detector,
            config,
            last_scan_at: Mutex::new(None),
        }
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    /// Time of the most recent scan this scanner ran
    pub fn last_scan_at(&self) -> Option<DateTime<Utc>> {
        self.last_scan_at.lock().ok().and_then(|guard| *guard)
    }

    /// Request cancellation of an in-flight scan; it stops at the next pair
    /// boundary and still records accurate counts
    pub fn cancel(&self) {
        self.detector.cancel_flag().store(true, Ordering::Relaxed);
    }

    /// Full pass at process start, when configured
    pub fn run_startup_scan(&self) -> Result<Option<ScanRecord>> {
        if !self.config.scan_at_startup {
            return Ok(None);
        }
        let record = self.detector.scan("startup", &DEFAULT_METHODS, None)?;
        self.mark_scanned(record.completed_at);
        Ok(Some(record))
    }

    /// Manually triggered full scan
    pub fn run_full_scan(&self, methods: Option<&[DetectionMethod]>) -> Result<ScanRecord> {
        let methods = methods.unwrap_or(&DEFAULT_METHODS);
        let record = self.detector.scan("full", methods, None)?;
        self.mark_scanned(record.completed_at);
        Ok(record)
    }

    /// Scan one memory against the rest; called after each commit
    pub fn run_incremental_scan(&self, memory_id: &str) -> Result<Option<ScanRecord>> {
        if !self.config.incremental_on_commit {
            return Ok(None);
        }
        let record = self.detector.scan_memory(memory_id, "incremental")?;
        self.mark_scanned(record.completed_at);
        if record.conflicts_new > 0 {
            tracing::info!(
                "incremental scan found {} new conflicts for {memory_id}",
                record.conflicts_new
            );
        }
        Ok(Some(record))
    }

    /// Scan an explicit memory-id set
    pub fn run_targeted_scan(
        &self,
        memory_ids: &[String],
        methods: Option<&[DetectionMethod]>,
    ) -> Result<ScanRecord> {
        if memory_ids.is_empty() {
            return Err(ConflictError::Scan(
                "targeted scan needs at least one memory id".to_string(),
            ));
        }
        let methods = methods.unwrap_or(&DEFAULT_METHODS);
        let record = self
            .detector
            .scan("targeted", methods, Some(memory_ids))?;
        self.mark_scanned(record.completed_at);
        Ok(record)
    }

    /// Run a full scan when the periodic interval has elapsed at `now`.
    /// Returns `None` when periodic scanning is off or not yet due.
    pub fn maybe_run_periodic(&self, now: DateTime<Utc>) -> Result<Option<ScanRecord>> {
        if !self.config.periodic_enabled {
            return Ok(None);
        }
        let interval = Duration::hours(self.config.periodic_interval_hours as i64);
        let due = match self.last_scan_at() {
            Some(last) => now - last >= interval,
            None => true,
        };
        if !due {
            return Ok(None);
        }
        let record = self.detector.scan("full", &DEFAULT_METHODS, None)?;
        self.mark_scanned(record.completed_at);
        Ok(Some(record))
    }

    /// Recent scan records, newest first
    pub fn get_scan_history(&self, limit: usize) -> Result<Vec<ScanRecord>> {
        self.detector.conflict_store().get_scan_history(limit)
    }

    fn mark_scanned(&self, at: DateTime<Utc>) {
        if let Ok(mut guard) = self.last_scan_at.lock() {
            *guard = Some(at);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictsConfig;
    use crate::conflicts::store::ConflictStore;
    use crate::store::Storage;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn scanner(config: ScanConfig) -> (ConflictScanner, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("t.db");
        let storage = Arc::new(Storage::new(Some(db.clone()), 16).unwrap());
        let conflict_store = Arc::new(ConflictStore::new(&db).unwrap());
        let detector = ConflictDetector::new(storage, conflict_store, &ConflictsConfig::default());
        (ConflictScanner::new(detector, config), dir)
    }

    #[test]
    fn test_startup_scan_respects_config() {
        let (off, _dir) = scanner(ScanConfig {
            scan_at_startup: false,
            ..Default::default()
        });
        assert!(off.run_startup_scan().unwrap().is_none());

        let (on, _dir) = scanner(ScanConfig {
            scan_at_startup: true,
            ..Default::default()
        });
        let record = on.run_startup_scan().unwrap().unwrap();
        assert_eq!(record.scan_type, "startup");
        assert!(on.last_scan_at().is_some());
    }

    #[test]
    fn test_periodic_due_logic() {
        let (scanner, _dir) = scanner(ScanConfig {
            periodic_enabled: true,
            periodic_interval_hours: 24,
            ..Default::default()
        });
        let now = Utc::now();

        // never scanned: due immediately
        assert!(scanner.maybe_run_periodic(now).unwrap().is_some());
        // just scanned: not due
        assert!(scanner.maybe_run_periodic(now).unwrap().is_none());
        // a day later: due again
        let later = now + Duration::hours(25);
        assert!(scanner.maybe_run_periodic(later).unwrap().is_some());
    }

    #[test]
    fn test_periodic_disabled() {
        let (scanner, _dir) = scanner(ScanConfig {
            periodic_enabled: false,
            ..Default::default()
        });
        assert!(scanner.maybe_run_periodic(Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_incremental_respects_config() {
        let (scanner, _dir) = scanner(ScanConfig {
            incremental_on_commit: false,
            ..Default::default()
        });
        assert!(scanner.run_incremental_scan("mem_x").unwrap().is_none());
    }

    #[test]
    fn test_targeted_scan_requires_ids() {
        let (scanner, _dir) = scanner(ScanConfig::default());
        assert!(scanner.run_targeted_scan(&[], None).is_err());
    }

    #[test]
    fn test_scan_history_recorded() {
        let (scanner, _dir) = scanner(ScanConfig::default());
        scanner.run_full_scan(None).unwrap();
        scanner.run_full_scan(None).unwrap();
        let history = scanner.get_scan_history(10).unwrap();
        assert_eq!(history.len(), 2);
    }
}
