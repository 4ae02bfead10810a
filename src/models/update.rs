use super::policy::WorkloadKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one configured workload: a (namespace, kind, name) triple
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub namespace: String,
    pub kind: WorkloadKind,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(namespace: impl Into<String>, kind: WorkloadKind, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// A container as read from a live workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub name: String,
    pub image: Option<String>,
}

impl ContainerImage {
    pub fn new(name: impl Into<String>, image: Option<&str>) -> Self {
        Self {
            name: name.into(),
            image: image.map(String::from),
        }
    }
}

/// Container name -> new image reference for one workload.
///
/// Only tags change; an empty patch is never sent to the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPatch(BTreeMap<String, String>);

impl ResolvedPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, container: impl Into<String>, image: impl Into<String>) {
        self.0.insert(container.into(), image.into());
    }

    pub fn get(&self, container: &str) -> Option<&str> {
        self.0.get(container).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResolvedPatch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for ResolvedPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .iter()
            .map(|(container, image)| format!("{}={}", container, image))
            .collect();
        write!(f, "{{{}}}", entries.join(", "))
    }
}

/// Terminal state reached by one workload within a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum WorkloadStatus {
    /// Workload does not exist in the cluster
    NotFound,
    /// Reading the workload failed
    ReadFailed { reason: String },
    /// Every tracked container is already on its target version
    UpToDate,
    /// Patch was accepted by the cluster
    Applied { patch: ResolvedPatch },
    /// No live container matched the patch at apply time
    NoOp { patch: ResolvedPatch },
    /// Patch was rejected or could not be sent
    ApplyFailed { patch: ResolvedPatch, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadOutcome {
    pub workload: WorkloadRef,
    pub status: WorkloadStatus,
}

/// Summary of one reconciliation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<WorkloadOutcome>,
}

impl CycleReport {
    pub fn outcome_for(&self, workload: &WorkloadRef) -> Option<&WorkloadStatus> {
        self.outcomes
            .iter()
            .find(|o| &o.workload == workload)
            .map(|o| &o.status)
    }

    pub fn applied(&self) -> usize {
        self.count(|s| matches!(s, WorkloadStatus::Applied { .. }))
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|s| matches!(s, WorkloadStatus::UpToDate))
    }

    pub fn not_found(&self) -> usize {
        self.count(|s| matches!(s, WorkloadStatus::NotFound))
    }

    /// Read and apply failures combined
    pub fn failed(&self) -> usize {
        self.count(|s| {
            matches!(
                s,
                WorkloadStatus::ReadFailed { .. } | WorkloadStatus::ApplyFailed { .. }
            )
        })
    }

    fn count(&self, predicate: impl Fn(&WorkloadStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }
}
