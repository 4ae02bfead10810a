// Common test utilities for integration tests
//
// In-memory stand-ins for the registry, the cluster, and the notification
// webhook so reconciliation can be exercised without external services.

#![allow(dead_code)]

use async_trait::async_trait;
use nanocd::NanoCdConfig;
use nanocd::models::{ContainerImage, ResolvedPatch, WorkloadRef};
use nanocd::notifications::{NotificationSink, PatchNotification};
use nanocd::registry::{RegistryError, TagProvider};
use nanocd::workload::{ApplyOutcome, WorkloadAccessor, WorkloadError, build_image_patch};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Parses a YAML config, panicking on invalid input
pub fn config(yaml: &str) -> NanoCdConfig {
    NanoCdConfig::from_yaml_str(yaml).expect("test config should be valid")
}

/// Tag listings keyed by repository; unknown repositories are unavailable
#[derive(Default)]
pub struct FakeTagProvider {
    tags: HashMap<String, Vec<String>>,
    calls: AtomicUsize,
}

impl FakeTagProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, repository: &str, tags: &[&str]) -> Self {
        self.tags.insert(
            repository.to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TagProvider for FakeTagProvider {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tags
            .get(repository)
            .cloned()
            .ok_or_else(|| RegistryError::Unavailable {
                repository: repository.to_string(),
                reason: "401 Unauthorized".to_string(),
            })
    }
}

/// Workloads held in memory. Applied patches are recorded and also rewrite
/// the stored images, so a second cycle sees the updated state.
#[derive(Default)]
pub struct FakeWorkloads {
    workloads: Mutex<HashMap<WorkloadRef, Vec<ContainerImage>>>,
    read_failures: HashSet<WorkloadRef>,
    apply_failures: HashSet<WorkloadRef>,
    applied: Mutex<Vec<(WorkloadRef, ResolvedPatch)>>,
    reads: Mutex<Vec<WorkloadRef>>,
    read_delay: Option<Duration>,
}

impl FakeWorkloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workload(self, workload: WorkloadRef, containers: &[(&str, &str)]) -> Self {
        self.workloads.lock().unwrap().insert(
            workload,
            containers
                .iter()
                .map(|(name, image)| ContainerImage::new(*name, Some(image)))
                .collect(),
        );
        self
    }

    pub fn failing_read(mut self, workload: WorkloadRef) -> Self {
        self.read_failures.insert(workload);
        self
    }

    pub fn failing_apply(mut self, workload: WorkloadRef) -> Self {
        self.apply_failures.insert(workload);
        self
    }

    /// Delay every read, to keep a cycle busy
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Rename a container behind the reconciler's back
    pub fn rename_container(&self, workload: &WorkloadRef, from: &str, to: &str) {
        if let Some(containers) = self.workloads.lock().unwrap().get_mut(workload) {
            for container in containers.iter_mut().filter(|c| c.name == from) {
                container.name = to.to_string();
            }
        }
    }

    pub fn applied(&self) -> Vec<(WorkloadRef, ResolvedPatch)> {
        self.applied.lock().unwrap().clone()
    }

    pub fn reads(&self) -> Vec<WorkloadRef> {
        self.reads.lock().unwrap().clone()
    }

    pub fn image(&self, workload: &WorkloadRef, container: &str) -> Option<String> {
        self.workloads
            .lock()
            .unwrap()
            .get(workload)?
            .iter()
            .find(|c| c.name == container)?
            .image
            .clone()
    }
}

#[async_trait]
impl WorkloadAccessor for FakeWorkloads {
    async fn read_containers(
        &self,
        workload: &WorkloadRef,
    ) -> Result<Vec<ContainerImage>, WorkloadError> {
        self.reads.lock().unwrap().push(workload.clone());
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.read_failures.contains(workload) {
            return Err(WorkloadError::Transport("connection reset by peer".to_string()));
        }
        self.workloads
            .lock()
            .unwrap()
            .get(workload)
            .cloned()
            .ok_or_else(|| WorkloadError::NotFound(workload.clone()))
    }

    async fn apply_image_patch(
        &self,
        workload: &WorkloadRef,
        patch: &ResolvedPatch,
    ) -> Result<ApplyOutcome, WorkloadError> {
        if self.apply_failures.contains(workload) {
            return Err(WorkloadError::Transport("admission webhook denied the request".to_string()));
        }

        let mut workloads = self.workloads.lock().unwrap();
        let containers = workloads
            .get_mut(workload)
            .ok_or_else(|| WorkloadError::NotFound(workload.clone()))?;

        let json_patch = build_image_patch(workload.kind, containers, patch);
        if json_patch.0.is_empty() {
            return Ok(ApplyOutcome::NoOp);
        }
        for (name, image) in patch.iter() {
            if let Some(container) = containers.iter_mut().find(|c| c.name == name) {
                container.image = Some(image.to_string());
            }
        }

        self.applied
            .lock()
            .unwrap()
            .push((workload.clone(), patch.clone()));
        Ok(ApplyOutcome::Applied)
    }
}

/// Records every notification; can be told to fail
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<(String, PatchNotification)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, PatchNotification)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, target: &str, notification: &PatchNotification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), notification.clone()));
        if self.fail {
            anyhow::bail!("webhook returned 500");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Recording"
    }
}
