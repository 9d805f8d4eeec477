//! End-to-end deploy pipeline.
//!
//! Build (optional) → load output → split into bundles → upload → resolve
//! identity → publish. Uploads finish completely before the identity is
//! derived. Only one deploy per site runs at a time; see [`SiteLocks`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use quayside_state::{ArtifactStore, CacheInvalidator, DestinationStore, PublishPointer, PublishRecord};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::artifact::ArtifactUploader;
use crate::build_step::run_build;
use crate::bundler;
use crate::config::DeployConfig;
use crate::domain::{ArchiveHandle, BuildOutput, PublishState, QuaysideError, Result};
use crate::identity;
use crate::metrics::METRICS;
use crate::obs::{
    deploy_span, emit_bundles_planned, emit_deploy_failed, emit_deploy_published,
    emit_deploy_started,
};
use crate::publish::{OrchestratorOptions, PublishOrchestrator, PublishOutcome, PublishRequest};
use crate::site_lock::SiteLocks;
use crate::substitution::{self, RuleSet};

/// The four storage seams a deploy talks to.
#[derive(Clone)]
pub struct Backends {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub destination: Arc<dyn DestinationStore>,
    pub pointer: Arc<dyn PublishPointer>,
    pub invalidator: Arc<dyn CacheInvalidator>,
}

/// What downstream consumers get back from a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    pub site: String,
    pub public_url: Option<String>,
    pub deployment_id: String,
    /// Archive fingerprints in bundle order.
    pub fingerprints: Vec<String>,
    pub bundle_count: usize,
    pub state: PublishState,
    pub invalidation_id: String,
    pub reused_staging: bool,
    pub objects_staged: usize,
    pub files_substituted: usize,
    pub duration_ms: u64,
}

impl DeployReport {
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

/// One bundle as it would be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedBundle {
    pub index: usize,
    pub paths: Vec<String>,
    pub framed_size: u64,
    pub fingerprint: String,
}

/// Dry-run result: bundle membership and the identity a deploy would use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployPlan {
    pub site: String,
    pub deployment_id: String,
    pub files: usize,
    pub total_bytes: u64,
    pub bundles: Vec<PlannedBundle>,
}

/// Bundle and fingerprint the build output without touching any store.
pub fn plan(config: &DeployConfig) -> Result<DeployPlan> {
    config.validate()?;
    let output = BuildOutput::load(&config.build_dir)?;
    let bundles = bundler::split(&output, config.bundle_size_limit)?;

    let mut planned = Vec::with_capacity(bundles.len());
    let mut handles = Vec::with_capacity(bundles.len());
    for bundle in &bundles {
        let fingerprint = ArtifactUploader::fingerprint(bundle)?;
        planned.push(PlannedBundle {
            index: bundle.index,
            paths: bundle.paths().into_iter().map(str::to_string).collect(),
            framed_size: bundle.framed_size(),
            fingerprint: fingerprint.to_string(),
        });
        handles.push(ArchiveHandle {
            bundle_index: bundle.index,
            storage_key: String::new(),
            fingerprint,
        });
    }
    let identity = identity::resolve(&handles, config.dev_mode)?;

    Ok(DeployPlan {
        site: config.site.clone(),
        deployment_id: identity.to_string(),
        files: output.len(),
        total_bytes: output.total_bytes(),
        bundles: planned,
    })
}

fn build_workdir(build_dir: &Path) -> PathBuf {
    match build_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub struct Deployer {
    backends: Backends,
    locks: SiteLocks,
}

impl Deployer {
    pub fn new(backends: Backends, locks: SiteLocks) -> Self {
        Self { backends, locks }
    }

    fn orchestrator(&self, config: &DeployConfig) -> PublishOrchestrator {
        PublishOrchestrator::new(
            Arc::clone(&self.backends.artifacts),
            Arc::clone(&self.backends.destination),
            Arc::clone(&self.backends.pointer),
            Arc::clone(&self.backends.invalidator),
            OrchestratorOptions {
                retry: config.upload.retry_policy(),
                cleanup_stale: config.cleanup_stale,
            },
        )
    }

    /// Run the whole pipeline for one site.
    pub async fn deploy(&self, config: &DeployConfig) -> Result<DeployReport> {
        config.validate()?;
        let site = config.site.clone();
        let result = self
            .run_deploy(config)
            .instrument(deploy_span(&site))
            .await;
        METRICS.flush();
        result
    }

    async fn run_deploy(&self, config: &DeployConfig) -> Result<DeployReport> {
        let started = Instant::now();
        let site = config.site.as_str();
        let lease = self.locks.acquire(site)?;
        emit_deploy_started(site, config.dev_mode);

        if let Some(command) = &config.build_command {
            run_build(command, &build_workdir(&config.build_dir)).await?;
        }

        let output = BuildOutput::load(&config.build_dir)?;
        let cache_policy = config.cache_policy()?;
        let rules = RuleSet::new(&substitution::compile(&config.environment)?)?;

        let bundles = bundler::split(&output, config.bundle_size_limit)?;
        emit_bundles_planned(site, output.len(), bundles.len(), output.total_bytes());

        let uploader = ArtifactUploader::new(
            Arc::clone(&self.backends.artifacts),
            config.upload.retry_policy(),
            config.upload.concurrency,
        );
        let handles = match uploader.upload_all(&bundles).await {
            Ok(handles) => handles,
            Err(err) => {
                emit_deploy_failed(site, Some(PublishState::Staging), &err);
                return Err(QuaysideError::DeployFailed {
                    site: site.to_string(),
                    state: PublishState::Staging,
                    source: Box::new(err),
                });
            }
        };
        let identity = identity::resolve(&handles, config.dev_mode)?;
        let fingerprints = handles.iter().map(|h| h.fingerprint.to_string()).collect();

        let outcome = self
            .orchestrator(config)
            .publish(
                &lease,
                PublishRequest {
                    destination_prefix: config.publish_prefix().to_string(),
                    identity,
                    archives: handles,
                    rules,
                    cache_policy,
                },
            )
            .await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        emit_deploy_published(site, &outcome.record.deployment_id, duration_ms);
        Ok(report(config, outcome, fingerprints, bundles.len(), duration_ms))
    }

    /// Repoint the site at its previous deployment.
    pub async fn rollback(&self, config: &DeployConfig) -> Result<PublishOutcome> {
        let lease = self.locks.acquire(&config.site)?;
        self.orchestrator(config)
            .rollback(&lease)
            .instrument(deploy_span(&config.site))
            .await
    }

    /// The live record for the configured site.
    pub async fn status(&self, config: &DeployConfig) -> Result<Option<PublishRecord>> {
        self.orchestrator(config).current(&config.site).await
    }
}

fn report(
    config: &DeployConfig,
    outcome: PublishOutcome,
    fingerprints: Vec<String>,
    bundle_count: usize,
    duration_ms: u64,
) -> DeployReport {
    DeployReport {
        site: config.site.clone(),
        public_url: config.public_url(),
        deployment_id: outcome.record.deployment_id,
        fingerprints,
        bundle_count,
        state: outcome.state,
        invalidation_id: outcome.invalidation.id,
        reused_staging: outcome.reused_staging,
        objects_staged: outcome.objects_staged,
        files_substituted: outcome.files_substituted,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_workdir_defaults_to_current_dir() {
        assert_eq!(build_workdir(Path::new("dist")), PathBuf::from("."));
        assert_eq!(
            build_workdir(Path::new("/srv/site/dist")),
            PathBuf::from("/srv/site")
        );
    }

    #[test]
    fn plan_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<p>hi</p>").unwrap();
        std::fs::create_dir(dir.path().join("js")).unwrap();
        std::fs::write(dir.path().join("js/app.js"), "console.log(1)").unwrap();
        let config = DeployConfig {
            site: "www".into(),
            build_dir: dir.path().to_path_buf(),
            ..DeployConfig::default()
        };

        let a = plan(&config).unwrap();
        let b = plan(&config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.files, 2);
        assert_eq!(a.bundles.len(), 1);
        assert_eq!(a.bundles[0].paths, vec!["index.html", "js/app.js"]);
        assert!(a.deployment_id.starts_with("deploy-"));
    }
}
