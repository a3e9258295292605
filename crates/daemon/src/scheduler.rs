//! Background maintenance and health check loops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, error, info, warn};

use branchlore_core::telemetry;
use branchlore_core::{BranchError, BranchRepositoryManager};
use branchlore_web::exporter;

/// Aggregate counters across all runs.
#[derive(Default)]
pub struct SchedulerStats {
    pub maintenance_runs: AtomicU64,
    pub health_checks: AtomicU64,
    pub total_errors: AtomicU64,
    pub consecutive_errors: AtomicU64,
}

/// Branch and database figures gathered by one maintenance run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub branches: usize,
    /// Size in bytes of every branch database file, by branch.
    pub database_sizes: BTreeMap<String, u64>,
}

impl MaintenanceReport {
    pub fn total_bytes(&self) -> u64 {
        self.database_sizes.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub repository_exists: bool,
    pub revision: Option<String>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.repository_exists && self.revision.is_some()
    }
}

pub fn maintenance_report(
    manager: &BranchRepositoryManager,
) -> Result<MaintenanceReport, BranchError> {
    let branches = manager.list_branches()?.len();
    let storage = manager.storage();
    let databases = storage
        .branch_databases()
        .map_err(|e| BranchError::RepositoryIo(e.into()))?;
    let database_sizes = databases
        .into_iter()
        .map(|(branch, path)| {
            let size = storage.size(&path).unwrap_or(0);
            (branch, size)
        })
        .collect();
    Ok(MaintenanceReport {
        branches,
        database_sizes,
    })
}

/// Fails only when the manager is not ready; a missing revision is reported
/// as unhealthy.
pub fn health_report(manager: &BranchRepositoryManager) -> Result<HealthReport, BranchError> {
    let repository_exists = manager.paths().root().is_dir();
    let revision = match manager.current_revision() {
        Ok(revision) => Some(revision),
        Err(BranchError::NotInitialized) => return Err(BranchError::NotInitialized),
        Err(e) => {
            debug!(error = %e, "could not read current revision");
            None
        }
    };
    Ok(HealthReport {
        repository_exists,
        revision,
    })
}

#[derive(Clone, Copy, Debug)]
enum Job {
    Maintenance,
    Health,
}

/// Runs maintenance and health checks on their own intervals. A job that
/// fires while another is still running is skipped.
pub struct Scheduler {
    manager: Arc<BranchRepositoryManager>,
    maintenance_interval: Duration,
    health_interval: Duration,
    running: Arc<AtomicBool>,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(
        manager: Arc<BranchRepositoryManager>,
        maintenance_interval: Duration,
        health_interval: Duration,
    ) -> Self {
        Self {
            manager,
            maintenance_interval,
            health_interval,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Main scheduler loop. Returns once `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        info!(
            maintenance_interval_secs = self.maintenance_interval.as_secs(),
            health_interval_secs = self.health_interval.as_secs(),
            "scheduler started"
        );

        let mut maintenance = time::interval(self.maintenance_interval);
        let mut health = time::interval(self.health_interval);
        // Skip the immediate first ticks so the manager has time to initialize.
        maintenance.tick().await;
        health.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("scheduler stopping");
                    return;
                }
                _ = maintenance.tick() => self.maybe_run(Job::Maintenance).await,
                _ = health.tick() => self.maybe_run(Job::Health).await,
            }
        }
    }

    async fn maybe_run(&self, job: Job) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(?job, "skipping run: previous job still running");
            return;
        }
        self.run_job(job).await;
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run_job(&self, job: Job) {
        let manager = Arc::clone(&self.manager);
        let outcome = tokio::task::spawn_blocking(move || match job {
            Job::Maintenance => {
                let started = Instant::now();
                let outcome = maintenance_report(&manager).map(|report| {
                    telemetry::record_inventory(report.branches, &report.database_sizes);
                    info!(
                        branches = report.branches,
                        databases = report.database_sizes.len(),
                        total_bytes = report.total_bytes(),
                        "maintenance run"
                    );
                });
                telemetry::observe_duration(telemetry::MAINTENANCE_DURATION, started);
                exporter::run_upkeep();
                outcome
            }
            Job::Health => {
                let started = Instant::now();
                let outcome = health_report(&manager).map(|report| {
                    if report.healthy() {
                        debug!(revision = ?report.revision, "repository healthy");
                    } else {
                        warn!(
                            repository_exists = report.repository_exists,
                            revision = ?report.revision,
                            "repository unhealthy"
                        );
                    }
                });
                telemetry::observe_duration(telemetry::HEALTH_CHECK_DURATION, started);
                outcome
            }
        })
        .await;

        let counter = match job {
            Job::Maintenance => &self.stats.maintenance_runs,
            Job::Health => &self.stats.health_checks,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(Ok(())) => {
                self.stats.consecutive_errors.store(0, Ordering::SeqCst);
            }
            Ok(Err(BranchError::NotInitialized)) => {
                debug!(?job, "repository not initialized yet");
            }
            Ok(Err(e)) => self.record_error(job, &e.to_string()),
            Err(e) => self.record_error(job, &e.to_string()),
        }
    }

    fn record_error(&self, job: Job, message: &str) {
        let errors = self.stats.total_errors.fetch_add(1, Ordering::SeqCst) + 1;
        let consecutive = self.stats.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        error!(
            ?job,
            error = message,
            total_errors = errors,
            consecutive_errors = consecutive,
            "scheduled job failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchlore_core::config::RepositoryConfig;

    fn manager(root: &std::path::Path) -> Arc<BranchRepositoryManager> {
        Arc::new(BranchRepositoryManager::new(RepositoryConfig {
            root: root.join("repo"),
            ..RepositoryConfig::default()
        }))
    }

    #[test]
    fn test_reports_require_init() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        assert!(matches!(maintenance_report(&m), Err(BranchError::NotInitialized)));
        assert!(matches!(health_report(&m), Err(BranchError::NotInitialized)));
    }

    #[test]
    fn test_reports_on_ready_repository() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        m.init().unwrap();
        m.create_branch("feature").unwrap();
        let db = m.resolve_database_path("feature").unwrap();
        std::fs::write(&db, b"0123456789").unwrap();

        let report = maintenance_report(&m).unwrap();
        assert_eq!(
            report,
            MaintenanceReport {
                branches: 2,
                database_sizes: BTreeMap::from([("feature".to_string(), 10)]),
            }
        );
        assert_eq!(report.total_bytes(), 10);

        let health = health_report(&m).unwrap();
        assert!(health.healthy());
        assert_eq!(health.revision.unwrap().len(), 40);
    }

    #[tokio::test]
    async fn test_uninitialized_runs_are_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Scheduler::new(
            manager(dir.path()),
            Duration::from_secs(30),
            Duration::from_secs(60),
        );
        scheduler.maybe_run(Job::Maintenance).await;
        scheduler.maybe_run(Job::Health).await;

        let stats = scheduler.stats();
        assert_eq!(stats.maintenance_runs.load(Ordering::SeqCst), 1);
        assert_eq!(stats.health_checks.load(Ordering::SeqCst), 1);
        assert_eq!(stats.total_errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(Scheduler::new(
            manager(dir.path()),
            Duration::from_millis(10),
            Duration::from_millis(10),
        ));
        let shutdown = Arc::new(Notify::new());

        let task = {
            let scheduler = Arc::clone(&scheduler);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.notify_one();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(scheduler.stats().maintenance_runs.load(Ordering::SeqCst) >= 1);
    }
}
