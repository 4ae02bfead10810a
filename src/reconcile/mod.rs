use crate::config::NanoCdConfig;
use crate::metrics;
use crate::models::{
    CycleReport, NamespacePolicy, WorkloadOutcome, WorkloadRef, WorkloadStatus,
};
use crate::notifications::{NotificationSink, PatchNotification, notify_best_effort};
use crate::planner::PatchPlanner;
use crate::registry::TagProvider;
use crate::workload::{ApplyOutcome, WorkloadAccessor, WorkloadError};
use chrono::Utc;
use futures::{StreamExt, future, stream};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Drives one pass over every configured workload.
///
/// Each workload is read, planned, and patched on its own; a failure on one
/// is recorded in the report and never stops the others.
pub struct Reconciler {
    config: Arc<NanoCdConfig>,
    workloads: Arc<dyn WorkloadAccessor>,
    planner: PatchPlanner,
    notifier: Arc<dyn NotificationSink>,
    cycle_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        config: Arc<NanoCdConfig>,
        workloads: Arc<dyn WorkloadAccessor>,
        tags: Arc<dyn TagProvider>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        metrics::WORKLOADS_CONFIGURED.set(config.workload_targets().len() as i64);
        Self {
            config,
            workloads,
            planner: PatchPlanner::new(tags),
            notifier,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one cycle. Returns `None` when another cycle is still in progress.
    ///
    /// Once `shutdown` is cancelled no further workload is started; workloads
    /// already in flight run to completion and appear in the report.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> Option<CycleReport> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!("Previous cycle still running, skipping this one");
            metrics::CYCLES_SKIPPED.inc();
            return None;
        };

        let span = info_span!("cycle");
        let report = self.run_locked(shutdown).instrument(span).await;
        Some(report)
    }

    async fn run_locked(&self, shutdown: &CancellationToken) -> CycleReport {
        metrics::CYCLES_TOTAL.inc();
        let _timer = metrics::CYCLE_DURATION.start_timer();
        let started_at = Utc::now();

        let targets = self.config.workload_targets();
        debug!("Starting cycle over {} workloads", targets.len());

        let outcomes: Vec<WorkloadOutcome> = stream::iter(targets)
            .take_while(|_| future::ready(!shutdown.is_cancelled()))
            .map(|(workload, policy)| self.reconcile_workload(workload, policy))
            .boxed()
            .buffered(self.config.max_concurrent_workloads.max(1))
            .collect()
            .await;

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };

        if shutdown.is_cancelled() {
            info!(
                "Cycle interrupted by shutdown after {} workloads",
                report.outcomes.len()
            );
        }
        info!(
            "Cycle finished: {} applied, {} up to date, {} not found, {} failed",
            report.applied(),
            report.up_to_date(),
            report.not_found(),
            report.failed()
        );
        report
    }

    async fn reconcile_workload(
        &self,
        workload: WorkloadRef,
        policy: &NamespacePolicy,
    ) -> WorkloadOutcome {
        let span = info_span!(
            "workload",
            namespace = %workload.namespace,
            kind = %workload.kind,
            name = %workload.name
        );
        let status = self.reconcile_status(&workload, policy).instrument(span).await;
        WorkloadOutcome { workload, status }
    }

    async fn reconcile_status(
        &self,
        workload: &WorkloadRef,
        policy: &NamespacePolicy,
    ) -> WorkloadStatus {
        metrics::WORKLOADS_PROCESSED.inc();

        let containers = match self.workloads.read_containers(workload).await {
            Ok(containers) => containers,
            Err(WorkloadError::NotFound(_)) => {
                warn!("Workload {} not found, skipping", workload);
                metrics::WORKLOADS_NOT_FOUND.inc();
                return WorkloadStatus::NotFound;
            },
            Err(e) => {
                error!("Failed to read {}: {}", workload, e);
                metrics::WORKLOAD_READ_FAILURES.inc();
                return WorkloadStatus::ReadFailed {
                    reason: e.to_string(),
                };
            },
        };

        let patch = self.planner.plan(&containers, &policy.images).await;
        if patch.is_empty() {
            debug!("{} is up to date", workload);
            return WorkloadStatus::UpToDate;
        }

        info!("Applying {} to {}", patch, workload);
        match self.workloads.apply_image_patch(workload, &patch).await {
            Ok(ApplyOutcome::Applied) => {
                metrics::PATCHES_APPLIED.inc();
                info!("Updated {} with {}", workload, patch);
                if let Some(target) = policy.notification_target() {
                    let notification = PatchNotification::new(workload, &patch);
                    notify_best_effort(self.notifier.as_ref(), target, &notification).await;
                }
                WorkloadStatus::Applied { patch }
            },
            Ok(ApplyOutcome::NoOp) => {
                warn!(
                    "No container of {} matched {}, nothing was patched",
                    workload, patch
                );
                metrics::PATCHES_NOOP.inc();
                WorkloadStatus::NoOp { patch }
            },
            Err(WorkloadError::NotFound(_)) => {
                // Deleted between read and write
                warn!("Workload {} disappeared before it could be patched", workload);
                metrics::WORKLOADS_NOT_FOUND.inc();
                WorkloadStatus::NotFound
            },
            Err(e) => {
                error!("Failed to apply {} to {}: {}", patch, workload, e);
                metrics::PATCHES_FAILED.inc();
                WorkloadStatus::ApplyFailed {
                    patch,
                    reason: e.to_string(),
                }
            },
        }
    }
}
