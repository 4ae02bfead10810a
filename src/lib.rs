// Library exports for integration testing
//
// The binary in main.rs only wires these modules to the real cluster,
// registry, and webhook transports.

pub mod config;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod planner;
pub mod policy;
pub mod polling;
pub mod reconcile;
pub mod registry;
pub mod workload;

pub use config::{ConfigError, NanoCdConfig, load_config};
pub use models::{
    ContainerImage, CycleReport, ResolvedPatch, VersionPolicy, WorkloadKind, WorkloadRef,
    WorkloadStatus,
};
pub use policy::{Resolution, ResolveError, VersionRange, VersionResolver};
pub use reconcile::Reconciler;
