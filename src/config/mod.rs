use crate::models::{ImageReference, NamespacePolicy, WorkloadKind, WorkloadRef};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const CONFIG_PATH_ENV: &str = "NANOCD_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top level configuration, immutable once loaded
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NanoCdConfig {
    /// Namespace name -> policy
    pub namespaces: BTreeMap<String, NamespacePolicy>,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,

    /// Upper bound for every registry and cluster request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Workloads processed at the same time within one cycle
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_workloads: usize,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotificationsConfig {
    #[serde(default = "default_notification_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_notification_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_notification_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

impl NanoCdConfig {
    /// Parse and validate a YAML document (placeholders already expanded)
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notifications.timeout_seconds)
    }

    /// Every configured workload with its namespace policy, in namespace name
    /// order, then kind order, then list order
    pub fn workload_targets(&self) -> Vec<(WorkloadRef, &NamespacePolicy)> {
        self.namespaces
            .iter()
            .flat_map(|(namespace, policy)| {
                policy
                    .selected_workloads()
                    .map(move |(kind, name)| (WorkloadRef::new(namespace, kind, name), policy))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_seconds == 0 {
            return Err(invalid("refreshIntervalSeconds must be at least 1"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(invalid("requestTimeoutSeconds must be at least 1"));
        }
        if self.max_concurrent_workloads == 0 {
            return Err(invalid("maxConcurrentWorkloads must be at least 1"));
        }
        if self.notifications.timeout_seconds == 0 {
            return Err(invalid("notifications.timeoutSeconds must be at least 1"));
        }

        for (namespace, policy) in &self.namespaces {
            validate_namespace(namespace, policy)?;
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn validate_namespace(namespace: &str, policy: &NamespacePolicy) -> Result<(), ConfigError> {
    if namespace.trim().is_empty() {
        return Err(invalid("namespace names must not be empty"));
    }

    let mut seen: HashMap<&str, WorkloadKind> = HashMap::new();
    for kind in WorkloadKind::ALL {
        let listed = match kind {
            WorkloadKind::Deployment => policy.deployment.as_ref(),
            WorkloadKind::StatefulSet => policy.stateful_set.as_ref(),
            WorkloadKind::DaemonSet => policy.daemon_set.as_ref(),
        };
        if listed.is_some_and(|names| names.is_empty()) {
            return Err(invalid(format!(
                "namespace '{}': {} list must not be empty",
                namespace, kind
            )));
        }

        for name in policy.names_for(kind) {
            if name.trim().is_empty() {
                return Err(invalid(format!(
                    "namespace '{}': empty {} name",
                    namespace, kind
                )));
            }
            if let Some(previous) = seen.insert(name.as_str(), kind) {
                return Err(invalid(if previous == kind {
                    format!(
                        "namespace '{}': {} '{}' is listed twice",
                        namespace, kind, name
                    )
                } else {
                    format!(
                        "namespace '{}': '{}' is listed as both {} and {}",
                        namespace, name, previous, kind
                    )
                }));
            }
        }
    }

    for repository in policy.images.keys() {
        let reference = ImageReference::parse(repository);
        if repository.trim().is_empty()
            || reference.tag().is_some()
            || reference.digest().is_some()
        {
            return Err(invalid(format!(
                "namespace '{}': image key '{}' must be a repository name without tag",
                namespace, repository
            )));
        }
    }

    if let Some(url) = policy.discord_webhook.as_deref().filter(|u| !u.is_empty()) {
        reqwest::Url::parse(url).map_err(|e| {
            invalid(format!(
                "namespace '{}': invalid discordWebhook URL: {}",
                namespace, e
            ))
        })?;
    }

    Ok(())
}

/// Resolve the config path: first CLI argument, then `NANOCD_CONFIG`, then `config.yaml`
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| env::var(CONFIG_PATH_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<NanoCdConfig, ConfigError> {
    let path = path.as_ref();
    info!("Loading config from file {}", path.display());

    let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let expanded = expand_env_vars(&yaml)?;
    let config = NanoCdConfig::from_yaml_str(&expanded)?;

    debug!(
        "Loaded {} namespaces, {} workloads",
        config.namespaces.len(),
        config.workload_targets().len()
    );
    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variable values
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)}")
        .map_err(|e| invalid(format!("invalid placeholder pattern: {}", e)))?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        return Err(invalid(format!(
            "missing environment variable(s): {}",
            missing.join(", ")
        )));
    }

    Ok(result.into_owned())
}
