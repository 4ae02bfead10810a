use crate::metrics;
use crate::models::{ContainerImage, ImageReference, ResolvedPatch, VersionPolicy};
use crate::policy::{Resolution, ResolveError, VersionResolver};
use crate::registry::{RegistryError, TagProvider};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns the containers of one workload into the patch that moves each
/// tracked image to its newest permitted version.
#[derive(Clone)]
pub struct PatchPlanner {
    tags: Arc<dyn TagProvider>,
    resolver: VersionResolver,
}

impl PatchPlanner {
    pub fn new(tags: Arc<dyn TagProvider>) -> Self {
        Self {
            tags,
            resolver: VersionResolver,
        }
    }

    pub async fn plan(
        &self,
        containers: &[ContainerImage],
        policies: &BTreeMap<String, VersionPolicy>,
    ) -> ResolvedPatch {
        let mut patch = ResolvedPatch::new();
        // Two containers on the same repository share one tag listing
        let mut listings: HashMap<String, Result<Vec<String>, RegistryError>> = HashMap::new();

        for container in containers {
            let Some(image) = container.image.as_deref() else {
                debug!("Container {} has no image, skipping", container.name);
                continue;
            };

            let repository = ImageReference::parse(image).repository().to_string();
            let Some(policy) = policies.get(&repository) else {
                debug!(
                    "No policy for repository {} (container {})",
                    repository, container.name
                );
                continue;
            };

            metrics::IMAGES_CHECKED.inc();

            if !listings.contains_key(&repository) {
                let tags = self.tags.list_tags(&repository).await;
                listings.insert(repository.clone(), tags);
            }

            let resolution = match listings.get(&repository) {
                Some(Ok(tags)) => self.resolver.resolve(image, policy, tags),
                Some(Err(e)) => Resolution::Rejected(ResolveError::from(e.clone())),
                None => continue,
            };

            match resolution {
                Resolution::Target(target) => {
                    debug!("Container {}: {} -> {}", container.name, image, target);
                    patch.insert(container.name.clone(), target);
                },
                Resolution::NoChange => {
                    debug!("Container {} is up to date ({})", container.name, image);
                },
                Resolution::Rejected(reason) => {
                    warn!(
                        "Skipping container {} ({}): {}",
                        container.name, image, reason
                    );
                    metrics::RESOLUTIONS_REJECTED.inc();
                },
            }
        }

        patch
    }
}
