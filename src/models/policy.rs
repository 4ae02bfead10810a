use crate::policy::VersionRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Workload kinds the reconciler can read and patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl WorkloadKind {
    /// All kinds, in the order a cycle visits them
    pub const ALL: [WorkloadKind; 3] = [
        WorkloadKind::Deployment,
        WorkloadKind::StatefulSet,
        WorkloadKind::DaemonSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
        }
    }

    /// JSON pointer of the pod template container list
    pub fn containers_path(&self) -> &'static str {
        // All three kinds share the same pod template layout
        "/spec/template/spec/containers"
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version policy for one image repository
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VersionPolicy {
    /// Literal tag prefix preceding the semantic version (e.g. `v`, `release-`)
    #[serde(default)]
    pub prefix: String,

    /// Range a candidate version must satisfy to become the target
    #[serde(alias = "versionRange")]
    pub version_match: VersionRange,
}

impl VersionPolicy {
    pub fn new(prefix: impl Into<String>, version_match: VersionRange) -> Self {
        Self {
            prefix: prefix.into(),
            version_match,
        }
    }
}

/// Per-namespace reconciliation policy
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NamespacePolicy {
    #[serde(default)]
    pub deployment: Option<Vec<String>>,

    #[serde(default)]
    pub stateful_set: Option<Vec<String>>,

    #[serde(default)]
    pub daemon_set: Option<Vec<String>>,

    /// Repository name (without tag) -> version policy
    #[serde(default)]
    pub images: BTreeMap<String, VersionPolicy>,

    /// Webhook notified after a patch is applied
    #[serde(default)]
    pub discord_webhook: Option<String>,
}

impl NamespacePolicy {
    /// Workload names configured for a kind, empty when the kind is absent
    pub fn names_for(&self, kind: WorkloadKind) -> &[String] {
        let names = match kind {
            WorkloadKind::Deployment => &self.deployment,
            WorkloadKind::StatefulSet => &self.stateful_set,
            WorkloadKind::DaemonSet => &self.daemon_set,
        };
        names.as_deref().unwrap_or_default()
    }

    /// Every (kind, name) selected by this policy, kinds in `WorkloadKind::ALL` order
    pub fn selected_workloads(&self) -> impl Iterator<Item = (WorkloadKind, &str)> + '_ {
        WorkloadKind::ALL.into_iter().flat_map(move |kind| {
            self.names_for(kind)
                .iter()
                .map(move |name| (kind, name.as_str()))
        })
    }

    pub fn notification_target(&self) -> Option<&str> {
        self.discord_webhook.as_deref().filter(|url| !url.is_empty())
    }
}
