use crate::models::{ContainerImage, ResolvedPatch, WorkloadKind, WorkloadRef};
use async_trait::async_trait;
use json_patch::{PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodSpec;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const FIELD_MANAGER: &str = "nanocd";

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("workload {0} not found")]
    NotFound(WorkloadRef),
    #[error("orchestrator request failed: {0}")]
    Transport(String),
    #[error("orchestrator request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl From<kube::Error> for WorkloadError {
    fn from(e: kube::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// What happened when a patch reached the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// No live container matched any patch key
    NoOp,
}

/// Read and patch access to workloads in the orchestrator
#[async_trait]
pub trait WorkloadAccessor: Send + Sync {
    async fn read_containers(
        &self,
        workload: &WorkloadRef,
    ) -> Result<Vec<ContainerImage>, WorkloadError>;

    /// Rewrite the image of the named containers, leaving everything else untouched
    async fn apply_image_patch(
        &self,
        workload: &WorkloadRef,
        patch: &ResolvedPatch,
    ) -> Result<ApplyOutcome, WorkloadError>;
}

/// Live container index and new image for every patched container, in
/// index order. Keys with no live container are skipped.
fn image_updates<'a>(
    kind: WorkloadKind,
    live: &[ContainerImage],
    patch: &'a ResolvedPatch,
) -> Vec<(usize, &'a str)> {
    let mut updates: Vec<(usize, &str)> = patch
        .iter()
        .filter_map(|(container, image)| {
            match live.iter().position(|c| c.name == container) {
                Some(index) => Some((index, image)),
                None => {
                    warn!(
                        "Container {} is no longer present in the live {}, skipping it",
                        container, kind
                    );
                    None
                },
            }
        })
        .collect();
    updates.sort_by_key(|(index, _)| *index);
    updates
}

/// Translate a resolved patch into RFC 6902 `replace` operations addressed by
/// container index in the given (live) container list
pub fn build_image_patch(
    kind: WorkloadKind,
    live: &[ContainerImage],
    patch: &ResolvedPatch,
) -> json_patch::Patch {
    let operations = image_updates(kind, live, patch)
        .into_iter()
        .map(|(index, image)| {
            let tokens: Vec<String> = kind
                .containers_path()
                .split('/')
                .filter(|t| !t.is_empty())
                .map(String::from)
                .chain([index.to_string(), "image".to_string()])
                .collect();
            PatchOperation::Replace(ReplaceOperation {
                path: PointerBuf::from_tokens(tokens),
                value: serde_json::Value::String(image.to_string()),
            })
        })
        .collect();
    json_patch::Patch(operations)
}

/// Workload kinds carrying a pod template
trait PodWorkload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn pod_spec(&self) -> Option<&PodSpec>;

    fn containers(&self) -> Vec<ContainerImage> {
        self.pod_spec()
            .map(|spec| {
                spec.containers
                    .iter()
                    .map(|c| ContainerImage::new(&c.name, c.image.as_deref()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl PodWorkload for Deployment {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

impl PodWorkload for StatefulSet {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

impl PodWorkload for DaemonSet {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

/// Workload accessor backed by the Kubernetes API
pub struct KubeWorkloadAccessor {
    client: Client,
    timeout: Duration,
}

impl KubeWorkloadAccessor {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn bounded<T, F>(&self, request: F) -> Result<T, WorkloadError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WorkloadError::Timeout(self.timeout)),
        }
    }

    async fn fetch<K: PodWorkload>(&self, workload: &WorkloadRef) -> Result<K, WorkloadError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &workload.namespace);
        self.bounded(api.get_opt(&workload.name))
            .await?
            .ok_or_else(|| WorkloadError::NotFound(workload.clone()))
    }

    async fn read<K: PodWorkload>(
        &self,
        workload: &WorkloadRef,
    ) -> Result<Vec<ContainerImage>, WorkloadError> {
        let object: K = self.fetch(workload).await?;
        let containers = object.containers();
        debug!("Read {} containers from {}", containers.len(), workload);
        Ok(containers)
    }

    async fn apply<K: PodWorkload>(
        &self,
        workload: &WorkloadRef,
        patch: &ResolvedPatch,
    ) -> Result<ApplyOutcome, WorkloadError> {
        // Resolve indices against the object as it is now, not as it was at read time
        let live: K = self.fetch(workload).await?;
        let json_patch = build_image_patch(workload.kind, &live.containers(), patch);
        if json_patch.0.is_empty() {
            return Ok(ApplyOutcome::NoOp);
        }
        let count = json_patch.0.len();

        debug!("Patching {} with {:?}", workload, json_patch);

        let api: Api<K> = Api::namespaced(self.client.clone(), &workload.namespace);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.bounded(api.patch(&workload.name, &params, &Patch::Json::<()>(json_patch)))
            .await?;

        info!("Patched {} containers of {}", count, workload);
        Ok(ApplyOutcome::Applied)
    }
}

#[async_trait]
impl WorkloadAccessor for KubeWorkloadAccessor {
    async fn read_containers(
        &self,
        workload: &WorkloadRef,
    ) -> Result<Vec<ContainerImage>, WorkloadError> {
        match workload.kind {
            WorkloadKind::Deployment => self.read::<Deployment>(workload).await,
            WorkloadKind::StatefulSet => self.read::<StatefulSet>(workload).await,
            WorkloadKind::DaemonSet => self.read::<DaemonSet>(workload).await,
        }
    }

    async fn apply_image_patch(
        &self,
        workload: &WorkloadRef,
        patch: &ResolvedPatch,
    ) -> Result<ApplyOutcome, WorkloadError> {
        match workload.kind {
            WorkloadKind::Deployment => self.apply::<Deployment>(workload, patch).await,
            WorkloadKind::StatefulSet => self.apply::<StatefulSet>(workload, patch).await,
            WorkloadKind::DaemonSet => self.apply::<DaemonSet>(workload, patch).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{Container, PodTemplateSpec};

    fn live(containers: &[(&str, &str)]) -> Vec<ContainerImage> {
        containers
            .iter()
            .map(|(name, image)| ContainerImage::new(*name, Some(image)))
            .collect()
    }

    fn paths(patch: &json_patch::Patch) -> Vec<String> {
        serde_json::to_value(patch)
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|op| op["path"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_build_image_patch_uses_live_indices() {
        let containers = live(&[
            ("sidecar", "envoy:v1.30.0"),
            ("api", "registry/api:v1.2.0"),
        ]);
        let patch: ResolvedPatch = [("api", "registry/api:v1.3.0")].into_iter().collect();

        let json_patch = build_image_patch(WorkloadKind::Deployment, &containers, &patch);
        assert_eq!(
            serde_json::to_value(&json_patch).unwrap(),
            serde_json::json!([{
                "op": "replace",
                "path": "/spec/template/spec/containers/1/image",
                "value": "registry/api:v1.3.0"
            }])
        );
    }

    #[test]
    fn test_build_image_patch_skips_renamed_containers() {
        let containers = live(&[("api-v2", "registry/api:v1.2.0")]);
        let patch: ResolvedPatch = [("api", "registry/api:v1.3.0")].into_iter().collect();

        let json_patch = build_image_patch(WorkloadKind::StatefulSet, &containers, &patch);
        assert!(json_patch.0.is_empty());
    }

    #[test]
    fn test_build_image_patch_multiple_containers() {
        let containers = live(&[
            ("web", "nginx:1.25.0"),
            ("api", "registry/api:v1.2.0"),
            ("worker", "registry/worker:v0.9.0"),
        ]);
        let patch: ResolvedPatch = [
            ("worker", "registry/worker:v0.9.4"),
            ("web", "nginx:1.25.3"),
        ]
        .into_iter()
        .collect();

        let json_patch = build_image_patch(WorkloadKind::DaemonSet, &containers, &patch);
        assert_eq!(
            paths(&json_patch),
            vec![
                "/spec/template/spec/containers/0/image",
                "/spec/template/spec/containers/2/image",
            ]
        );
    }

    #[test]
    fn test_build_image_patch_orders_by_numeric_index() {
        let mut names: Vec<String> = (0..12).map(|i| format!("c{:02}", i)).collect();
        // Container "a" sits at index 10, "b" at index 2
        names[10] = "a".to_string();
        names[2] = "b".to_string();
        let containers: Vec<ContainerImage> = names
            .iter()
            .map(|name| ContainerImage::new(name.as_str(), Some("registry/app:v1.0.0")))
            .collect();
        let patch: ResolvedPatch = [("a", "registry/app:v1.1.0"), ("b", "registry/app:v1.1.0")]
            .into_iter()
            .collect();

        let json_patch = build_image_patch(WorkloadKind::Deployment, &containers, &patch);
        assert_eq!(
            paths(&json_patch),
            vec![
                "/spec/template/spec/containers/2/image",
                "/spec/template/spec/containers/10/image",
            ]
        );
    }

    #[test]
    fn test_pod_workload_containers() {
        let deployment = Deployment {
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![
                            Container {
                                name: "api".to_string(),
                                image: Some("registry/api:v1.2.0".to_string()),
                                ..Default::default()
                            },
                            Container {
                                name: "debug".to_string(),
                                image: None,
                                ..Default::default()
                            },
                        ],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(
            deployment.containers(),
            vec![
                ContainerImage::new("api", Some("registry/api:v1.2.0")),
                ContainerImage::new("debug", None),
            ]
        );
        assert!(Deployment::default().containers().is_empty());
    }
}
