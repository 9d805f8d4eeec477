//! Quayside Core Library
//!
//! Splits a static build output into content-addressed bundles, derives a
//! stable deployment identity from them, and publishes the result behind a
//! single atomic pointer switch.

pub mod archive;
pub mod artifact;
pub mod build_step;
pub mod bundler;
pub mod cache_policy;
pub mod config;
pub mod deploy;
pub mod domain;
pub mod identity;
pub mod metrics;
pub mod obs;
pub mod publish;
pub mod retry;
pub mod site_lock;
pub mod substitution;
pub mod telemetry;

pub use domain::{
    ArchiveHandle, BuildOutput, Bundle, BundleEntry, ErrorKind, PublishState, QuaysideError,
    Result,
};

pub use artifact::{ArtifactUploader, DEFAULT_UPLOAD_CONCURRENCY};
pub use bundler::{plan_bundles, split, DEFAULT_BUNDLE_SIZE_LIMIT};
pub use cache_policy::{CacheControlPolicy, CacheControlRule, DEFAULT_CACHE_CONTROL};
pub use config::{CustomDomain, DeployConfig, UploadConfig, DEFAULT_CONFIG_FILE};
pub use deploy::{plan, Backends, DeployPlan, DeployReport, Deployer, PlannedBundle};
pub use identity::{resolve, DeploymentIdentity, SENTINEL};
pub use publish::{
    OrchestratorOptions, PublishOrchestrator, PublishOutcome, PublishRequest, StagingMarker,
};
pub use retry::RetryPolicy;
pub use site_lock::{SiteLease, SiteLocks};
pub use substitution::{compile, RuleSet, SubstitutionRule};

pub use quayside_state::{ContentDigest, PublishRecord};

pub use metrics::METRICS;
pub use obs::{
    emit_bundle_uploaded, emit_deploy_failed, emit_deploy_published, emit_deploy_started,
    emit_state_entered, DeploySpan,
};
pub use telemetry::init_tracing;

/// Quayside version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
