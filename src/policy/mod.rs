mod range;

pub use range::{RangeError, VersionRange};

use crate::models::{ImageReference, VersionPolicy};
use crate::registry::RegistryError;
use semver::Version;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a container could not be considered for an update
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("image '{0}' has no tag")]
    MissingTag(String),
    #[error("image '{0}' is pinned by digest")]
    DigestReference(String),
    #[error("tag '{tag}' does not start with prefix '{prefix}'")]
    PrefixMismatch { tag: String, prefix: String },
    #[error("tag '{tag}' does not carry a valid semantic version")]
    InvalidCurrentVersion { tag: String },
    #[error(transparent)]
    RegistryUnavailable(#[from] RegistryError),
}

/// Result of resolving one container image against its policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Full image reference to move to
    Target(String),
    NoChange,
    Rejected(ResolveError),
}

impl Resolution {
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Target(image) => Some(image),
            _ => None,
        }
    }
}

/// Extra facts gathered while resolving, for logging only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveDiagnostics {
    /// Candidates that carried the prefix and a valid version
    pub candidates_matched: usize,
    /// Highest candidate newer than the result but outside the range
    pub held_back: Option<Version>,
}

/// Picks the greatest candidate version that is newer than the current one
/// and satisfies the policy range.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionResolver;

impl VersionResolver {
    pub fn resolve<S: AsRef<str>>(
        &self,
        current_image: &str,
        policy: &VersionPolicy,
        candidates: &[S],
    ) -> Resolution {
        self.resolve_with_diagnostics(current_image, policy, candidates)
            .0
    }

    pub fn resolve_with_diagnostics<S: AsRef<str>>(
        &self,
        current_image: &str,
        policy: &VersionPolicy,
        candidates: &[S],
    ) -> (Resolution, ResolveDiagnostics) {
        let mut diagnostics = ResolveDiagnostics::default();

        let reference = ImageReference::parse(current_image);
        let current = match Self::current_version(&reference, policy) {
            Ok(version) => version,
            Err(e) => {
                debug!("Rejecting {}: {}", current_image, e);
                return (Resolution::Rejected(e), diagnostics);
            },
        };

        let mut best = current.clone();
        for tag in candidates {
            let tag = tag.as_ref();
            let Some(version) = Self::parse_candidate(tag, &policy.prefix) else {
                continue;
            };
            diagnostics.candidates_matched += 1;

            // Precedence ignores build metadata
            if version.cmp_precedence(&best) != Ordering::Greater {
                continue;
            }

            if policy.version_match.matches(&version) {
                debug!("Tag {} is better than current best {}", tag, best);
                best = version;
            } else {
                debug!(
                    "Tag {} is newer but outside range '{}'",
                    tag, policy.version_match
                );
                if diagnostics
                    .held_back
                    .as_ref()
                    .is_none_or(|held| version.cmp_precedence(held) == Ordering::Greater)
                {
                    diagnostics.held_back = Some(version);
                }
            }
        }

        // Only report versions the range kept us from reaching
        if diagnostics
            .held_back
            .as_ref()
            .is_some_and(|held| held.cmp_precedence(&best) != Ordering::Greater)
        {
            diagnostics.held_back = None;
        }

        if diagnostics.candidates_matched == 0 {
            warn!(
                "No tags for {} match prefix '{}' with a valid version",
                reference.repository(),
                policy.prefix
            );
        }

        if let Some(held) = &diagnostics.held_back {
            info!(
                "Newer version {}{} of {} is excluded by range '{}'",
                policy.prefix,
                held,
                reference.repository(),
                policy.version_match
            );
        }

        if best.cmp_precedence(&current) == Ordering::Equal {
            return (Resolution::NoChange, diagnostics);
        }

        let target = format!("{}:{}{}", reference.repository(), policy.prefix, best);
        info!(
            "Resolved {} -> {} (range '{}')",
            current_image, target, policy.version_match
        );
        (Resolution::Target(target), diagnostics)
    }

    fn current_version(
        reference: &ImageReference,
        policy: &VersionPolicy,
    ) -> Result<Version, ResolveError> {
        if reference.digest().is_some() {
            return Err(ResolveError::DigestReference(reference.to_string()));
        }

        let tag = reference
            .tag()
            .ok_or_else(|| ResolveError::MissingTag(reference.to_string()))?;

        let version = tag
            .strip_prefix(policy.prefix.as_str())
            .ok_or_else(|| ResolveError::PrefixMismatch {
                tag: tag.to_string(),
                prefix: policy.prefix.clone(),
            })?;

        Version::parse(version).map_err(|_| ResolveError::InvalidCurrentVersion {
            tag: tag.to_string(),
        })
    }

    fn parse_candidate(tag: &str, prefix: &str) -> Option<Version> {
        let version = tag.strip_prefix(prefix)?;
        Version::parse(version).ok()
    }
}
