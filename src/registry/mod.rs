use crate::metrics::{REGISTRY_ERRORS_TOTAL, REGISTRY_QUERY_DURATION};
use async_trait::async_trait;
use oci_distribution::client::ClientConfig;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client as OciClient, Reference};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry unavailable for {repository}: {reason}")]
    Unavailable { repository: String, reason: String },
}

impl RegistryError {
    fn unavailable(repository: &str, reason: impl ToString) -> Self {
        Self::Unavailable {
            repository: repository.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Source of the tags published for an image repository
#[async_trait]
pub trait TagProvider: Send + Sync {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError>;
}

/// Lists tags over the OCI distribution API.
///
/// Fetches `/v2/<repo>/tags/list` anonymously; the client exchanges a
/// `repository:<repo>:pull` bearer token first when the registry asks for one.
pub struct OciTagProvider {
    client: OciClient,
    timeout: Duration,
}

impl OciTagProvider {
    pub fn new(timeout: Duration) -> Self {
        Self::with_config(ClientConfig::default(), timeout)
    }

    pub fn with_config(config: ClientConfig, timeout: Duration) -> Self {
        Self {
            client: OciClient::new(config),
            timeout,
        }
    }

    async fn fetch_tags(&self, reference: &Reference) -> anyhow::Result<Vec<String>> {
        let response = self
            .client
            .list_tags(reference, &RegistryAuth::Anonymous, None, None)
            .await?;
        Ok(response.tags)
    }
}

#[async_trait]
impl TagProvider for OciTagProvider {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        let reference = to_reference(repository)?;
        debug!(
            "Listing tags for {} (registry: {})",
            reference.repository(),
            reference.registry()
        );

        let _timer = REGISTRY_QUERY_DURATION.start_timer();
        let result = match tokio::time::timeout(self.timeout, self.fetch_tags(&reference)).await {
            Ok(Ok(tags)) => Ok(tags),
            Ok(Err(e)) => Err(RegistryError::unavailable(repository, e)),
            Err(_) => Err(RegistryError::unavailable(
                repository,
                format!("request timed out after {}s", self.timeout.as_secs()),
            )),
        };

        match &result {
            Ok(tags) => debug!("Found {} tags for {}", tags.len(), repository),
            Err(e) => {
                warn!("{}", e);
                REGISTRY_ERRORS_TOTAL.inc();
            },
        }
        result
    }
}

/// Build an OCI reference for a bare repository name.
///
/// Docker Hub short names expand the usual way (`nginx` -> `docker.io/library/nginx`).
fn to_reference(repository: &str) -> Result<Reference, RegistryError> {
    Reference::try_from(repository)
        .map_err(|e| RegistryError::unavailable(repository, format!("invalid repository: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_distribution::client::ClientProtocol;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_to_reference_docker_hub_short_name() {
        let reference = to_reference("nginx").unwrap();
        assert_eq!(reference.registry(), "docker.io");
        assert_eq!(reference.repository(), "library/nginx");
    }

    #[test]
    fn test_to_reference_with_namespace() {
        let reference = to_reference("registry/api").unwrap();
        assert_eq!(reference.registry(), "docker.io");
        assert_eq!(reference.repository(), "registry/api");
    }

    #[test]
    fn test_to_reference_custom_registry() {
        let reference = to_reference("ghcr.io/acme/api").unwrap();
        assert_eq!(reference.registry(), "ghcr.io");
        assert_eq!(reference.repository(), "acme/api");
    }

    #[test]
    fn test_to_reference_invalid() {
        let result = to_reference("UPPER/Case");
        assert!(matches!(result, Err(RegistryError::Unavailable { .. })));
    }

    fn plain_http_provider() -> OciTagProvider {
        let config = ClientConfig {
            protocol: ClientProtocol::Http,
            ..Default::default()
        };
        OciTagProvider::with_config(config, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_list_tags_checks_registry_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/acme/api/tags/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "acme/api",
                "tags": ["v1.2.0", "v1.3.0", "latest"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let repository = format!("{}/acme/api", server.address());
        let tags = plain_http_provider().list_tags(&repository).await.unwrap();
        assert_eq!(tags, vec!["v1.2.0", "v1.3.0", "latest"]);
    }

    #[tokio::test]
    async fn test_list_tags_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/acme/api/tags/list"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let repository = format!("{}/acme/api", server.address());
        let result = plain_http_provider().list_tags(&repository).await;
        assert!(matches!(result, Err(RegistryError::Unavailable { .. })));
    }
}
