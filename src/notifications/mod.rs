use crate::metrics;
use crate::models::{ResolvedPatch, WorkloadKind, WorkloadRef};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

mod webhook;

pub use webhook::{WebhookConfig, WebhookNotifier};

/// Details of a patch that was accepted by the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchNotification {
    pub namespace: String,
    pub kind: WorkloadKind,
    pub name: String,
    pub patch: ResolvedPatch,
    pub timestamp: DateTime<Utc>,
}

impl PatchNotification {
    pub fn new(workload: &WorkloadRef, patch: &ResolvedPatch) -> Self {
        Self {
            namespace: workload.namespace.clone(),
            kind: workload.kind,
            name: workload.name.clone(),
            patch: patch.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Human readable summary, one line per container
    pub fn message(&self) -> String {
        let mut message = format!(
            "Updated {} {}/{}",
            self.kind, self.namespace, self.name
        );
        for (container, image) in self.patch.iter() {
            message.push_str(&format!("\n- {} -> {}", container, image));
        }
        message
    }
}

/// Trait for notification sinks
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification to the given target (a webhook URL)
    async fn notify(&self, target: &str, notification: &PatchNotification) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Sink that drops every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait::async_trait]
impl NotificationSink for NoopNotifier {
    async fn notify(&self, target: &str, notification: &PatchNotification) -> Result<()> {
        debug!(
            "Dropping notification for {}/{} to {}",
            notification.namespace, notification.name, target
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Noop"
    }
}

/// Send a notification without letting a failure escape.
///
/// Returns whether delivery succeeded so callers can log it; the outcome of
/// the patch itself is never affected.
pub async fn notify_best_effort(
    sink: &dyn NotificationSink,
    target: &str,
    notification: &PatchNotification,
) -> bool {
    match sink.notify(target, notification).await {
        Ok(()) => {
            info!(
                "Sent {} notification for {}/{}/{}",
                sink.name(),
                notification.namespace,
                notification.kind,
                notification.name
            );
            metrics::NOTIFICATIONS_SENT_TOTAL.inc();
            true
        },
        Err(e) => {
            error!(
                "Failed to send {} notification for {}/{}/{}: {:#}",
                sink.name(),
                notification.namespace,
                notification.kind,
                notification.name,
                e
            );
            metrics::NOTIFICATIONS_FAILED_TOTAL.inc();
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait::async_trait]
    impl NotificationSink for FailingSink {
        async fn notify(&self, _target: &str, _notification: &PatchNotification) -> Result<()> {
            Err(anyhow::anyhow!("connection refused"))
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    fn notification() -> PatchNotification {
        let workload = WorkloadRef::new("prod", WorkloadKind::Deployment, "api");
        let patch: ResolvedPatch = [
            ("api", "registry/api:v1.3.0"),
            ("sidecar", "registry/proxy:v2.0.1"),
        ]
        .into_iter()
        .collect();
        PatchNotification::new(&workload, &patch)
    }

    #[test]
    fn test_message_lists_every_container() {
        assert_eq!(
            notification().message(),
            "Updated Deployment prod/api\n- api -> registry/api:v1.3.0\n- sidecar -> registry/proxy:v2.0.1"
        );
    }

    #[test]
    fn test_notification_serialization() {
        let json = serde_json::to_value(notification()).unwrap();
        assert_eq!(json["namespace"], "prod");
        assert_eq!(json["kind"], "Deployment");
        assert_eq!(json["patch"]["api"], "registry/api:v1.3.0");
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failures() {
        let delivered =
            notify_best_effort(&FailingSink, "https://example.com/hook", &notification()).await;
        assert!(!delivered);

        let delivered =
            notify_best_effort(&NoopNotifier, "https://example.com/hook", &notification()).await;
        assert!(delivered);
    }
}
