//! Publish Orchestrator.
//!
//! Drives one deploy through `STAGING → UPLOADED → ACTIVATED → INVALIDATED`.
//! Content is staged under `<prefix>/<identity>/` and never written into the
//! live namespace of another identity. Readers switch over through a single
//! compare-and-swap on the publish pointer. Any failure once staging started
//! is reported as `DeployFailed` with the state it happened in.

mod marker;

pub use marker::{marker_key, namespace_prefix, StagingMarker, MARKER_DIR};

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use quayside_state::{
    ArtifactStore, CacheInvalidator, ContentDigest, DestinationStore, InvalidationReceipt,
    InvalidationRequest, PublishPointer, PublishRecord, StorageError, StorageResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive;
use crate::cache_policy::CacheControlPolicy;
use crate::domain::{ArchiveHandle, PublishState, QuaysideError, Result};
use crate::identity::{check_order, is_deployment_namespace, DeploymentIdentity};
use crate::metrics::METRICS;
use crate::obs::{emit_cleanup_failed, emit_deploy_failed, emit_state_entered};
use crate::retry::{retry_transient, RetryExhausted, RetryPolicy};
use crate::site_lock::SiteLease;
use crate::substitution::RuleSet;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Applied to artifact fetches and destination reads/writes. Pointer
    /// swaps and invalidations run once, under the same per-attempt deadline.
    pub retry: RetryPolicy,
    /// Remove namespaces other than the active and previous ones after a
    /// successful publish.
    pub cleanup_stale: bool,
}

/// Everything the orchestrator needs for one publish.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub destination_prefix: String,
    pub identity: DeploymentIdentity,
    pub archives: Vec<ArchiveHandle>,
    pub rules: RuleSet,
    pub cache_policy: CacheControlPolicy,
}

/// Result of a successful publish or rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub record: PublishRecord,
    pub state: PublishState,
    pub invalidation: InvalidationReceipt,
    /// Staging and substitution were skipped because the namespace was
    /// already complete.
    pub reused_staging: bool,
    pub objects_staged: usize,
    pub files_substituted: usize,
    pub namespaces_removed: usize,
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(QuaysideError::InvalidConfig(format!(
            "destination prefix '{}' must not contain '.' or '..' segments",
            prefix
        )));
    }
    Ok(())
}

/// Key prefix covering every namespace under `prefix`.
fn prefix_root(prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix)
    }
}

fn conflict(site: &str, reason: impl Into<String>) -> QuaysideError {
    QuaysideError::StateConflict {
        site: site.to_string(),
        reason: reason.into(),
    }
}

pub struct PublishOrchestrator {
    artifacts: Arc<dyn ArtifactStore>,
    destination: Arc<dyn DestinationStore>,
    pointer: Arc<dyn PublishPointer>,
    invalidator: Arc<dyn CacheInvalidator>,
    options: OrchestratorOptions,
}

impl PublishOrchestrator {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        destination: Arc<dyn DestinationStore>,
        pointer: Arc<dyn PublishPointer>,
        invalidator: Arc<dyn CacheInvalidator>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            artifacts,
            destination,
            pointer,
            invalidator,
            options,
        }
    }

    /// The live record for `site`, if any.
    pub async fn current(&self, site: &str) -> Result<Option<PublishRecord>> {
        retry_transient(&self.options.retry, "read publish pointer", || {
            self.pointer.current(site)
        })
        .await
        .map_err(|e| QuaysideError::Storage(e.error))
    }

    /// Publish `request` for the leased site.
    ///
    /// Input problems (bad prefix, unordered archives) are returned as-is
    /// before anything is written, as are conflicts with another site's
    /// namespace or with the live deployment. Replaying a publish with the
    /// same identity, archives and rules skips straight to activation.
    pub async fn publish(&self, lease: &SiteLease, request: PublishRequest) -> Result<PublishOutcome> {
        let site = lease.site();
        validate_prefix(&request.destination_prefix)?;
        check_order(&request.archives)?;
        if request.archives.is_empty() && !request.identity.is_sentinel() {
            return Err(QuaysideError::InvalidConfig(
                "nothing to publish: no archives".to_string(),
            ));
        }
        let digest = request.rules.digest()?;
        let fingerprints: Vec<ContentDigest> = request
            .archives
            .iter()
            .map(|h| h.fingerprint.clone())
            .collect();

        let deployment_id = request.identity.as_str();
        let prefix = request.destination_prefix.as_str();
        let live = self.current(site).await?;
        let existing = self.read_marker(&marker_key(prefix, deployment_id)).await?;

        if let Some(marker) = &existing {
            if !marker.owned_by(site) {
                return Err(conflict(
                    site,
                    format!(
                        "namespace {} under '{}' belongs to site '{}'",
                        deployment_id, prefix, marker.site
                    ),
                ));
            }
        }
        let is_live = live
            .as_ref()
            .map_or(false, |r| r.deployment_id == deployment_id && r.destination_prefix == prefix);
        let covered = existing
            .as_ref()
            .map_or(false, |m| m.covers(&fingerprints, &digest));
        if is_live && !covered && !request.identity.is_sentinel() {
            return Err(conflict(
                site,
                format!(
                    "{} is live with different substitution values; it cannot be restaged in place",
                    deployment_id
                ),
            ));
        }

        let mut state = PublishState::Staging;
        let context = PublishContext {
            fingerprints,
            rules_digest: digest,
            live,
            existing,
        };
        self.run_publish(site, &request, context, &mut state)
            .await
            .map_err(|err| self.fail(site, deployment_id, state, err))
    }

    /// Repoint `site` at the deployment that was live before the current one.
    ///
    /// The previous namespace must still carry its staging marker.
    pub async fn rollback(&self, lease: &SiteLease) -> Result<PublishOutcome> {
        let site = lease.site();
        let live = self
            .current(site)
            .await?
            .ok_or_else(|| conflict(site, "nothing is live"))?;
        let target = live
            .previous
            .clone()
            .ok_or_else(|| conflict(site, "no previous deployment recorded"))?;
        let marker = self
            .read_marker(&marker_key(&live.destination_prefix, &target))
            .await?
            .filter(|m| m.owned_by(site))
            .ok_or_else(|| {
                conflict(
                    site,
                    format!("previous deployment {} is no longer staged", target),
                )
            })?;

        let mut state = PublishState::Activated;
        let result = self
            .run_rollback(site, &live, target.clone(), marker, &mut state)
            .await;
        result.map_err(|err| self.fail(site, &target, state, err))
    }

    fn fail(
        &self,
        site: &str,
        deployment_id: &str,
        state: PublishState,
        err: QuaysideError,
    ) -> QuaysideError {
        if state.can_transition_to(PublishState::Failed) {
            emit_state_entered(site, deployment_id, PublishState::Failed);
        }
        emit_deploy_failed(site, Some(state), &err);
        QuaysideError::DeployFailed {
            site: site.to_string(),
            state,
            source: Box::new(err),
        }
    }

    async fn run_publish(
        &self,
        site: &str,
        request: &PublishRequest,
        context: PublishContext,
        state: &mut PublishState,
    ) -> Result<PublishOutcome> {
        let PublishContext {
            fingerprints,
            rules_digest,
            live,
            existing,
        } = context;
        let deployment_id = request.identity.as_str();
        let prefix = request.destination_prefix.as_str();
        let dev_mode = request.identity.is_sentinel();
        let namespace = namespace_prefix(prefix, deployment_id);
        let marker_key = marker_key(prefix, deployment_id);
        let rules = &request.rules;

        // STAGING
        emit_state_entered(site, deployment_id, *state);
        let reused = !dev_mode
            && existing
                .as_ref()
                .map_or(false, |m| m.covers(&fingerprints, &rules_digest));

        let staged = if reused {
            info!(site, deployment_id, "namespace already staged, skipping staging");
            None
        } else {
            if existing.is_some() {
                // Stale marker: drop it so a partial restage is never reused.
                self.staged_op(&marker_key, || self.destination.delete_prefix(&marker_key))
                    .await?;
            }
            if dev_mode {
                let removed = self
                    .staged_op(&namespace, || self.destination.delete_prefix(&namespace))
                    .await?;
                debug!(site, removed, "cleared development namespace");
            }
            Some(
                self.stage(&namespace, &request.archives, rules, &request.cache_policy)
                    .await?,
            )
        };

        // UPLOADED
        advance(site, deployment_id, state);
        let (objects_staged, files_substituted) = match (staged, &existing) {
            (Some(staged), _) => {
                let objects = staged.paths.len();
                let substituted = self
                    .substitute(&namespace, staged.pending, rules, &request.cache_policy)
                    .await?;
                let marker = StagingMarker {
                    site: site.to_string(),
                    deployment_id: deployment_id.to_string(),
                    fingerprints,
                    rules_digest,
                    objects,
                    staged_at: Utc::now(),
                };
                let body = serde_json::to_vec_pretty(&marker)?;
                let metadata = quayside_state::ObjectMetadata {
                    content_type: Some("application/json".to_string()),
                    cache_control: Some("no-store".to_string()),
                };
                self.staged_op(&marker_key, || {
                    self.destination.put_object(&marker_key, &body, &metadata)
                })
                .await?;
                (objects, substituted)
            }
            (None, Some(marker)) => (marker.objects, 0),
            (None, None) => (0, 0),
        };

        // ACTIVATED
        advance(site, deployment_id, state);
        let previous = match &live {
            Some(r) if r.destination_prefix != prefix => None,
            Some(r) if r.deployment_id == deployment_id => r.previous.clone(),
            Some(r) => Some(r.deployment_id.clone()),
            None => None,
        };
        let record = PublishRecord {
            site: site.to_string(),
            deployment_id: deployment_id.to_string(),
            destination_prefix: prefix.to_string(),
            previous,
            activated_at: Utc::now(),
        };
        let expected = live.as_ref().map(|r| r.deployment_id.as_str());
        let record = self.activate(site, expected, record).await?;

        // INVALIDATED
        advance(site, deployment_id, state);
        let invalidation = self.invalidate(site).await?;

        METRICS.inc_publishes();
        let namespaces_removed = if self.options.cleanup_stale {
            let mut keep = vec![record.deployment_id.as_str()];
            keep.extend(record.previous.as_deref());
            self.cleanup_stale(site, prefix, &keep).await
        } else {
            0
        };

        Ok(PublishOutcome {
            record,
            state: *state,
            invalidation,
            reused_staging: reused,
            objects_staged,
            files_substituted,
            namespaces_removed,
        })
    }

    async fn run_rollback(
        &self,
        site: &str,
        live: &PublishRecord,
        target: String,
        marker: StagingMarker,
        state: &mut PublishState,
    ) -> Result<PublishOutcome> {
        emit_state_entered(site, &target, *state);
        let record = PublishRecord {
            site: site.to_string(),
            deployment_id: target,
            destination_prefix: live.destination_prefix.clone(),
            previous: Some(live.deployment_id.clone()),
            activated_at: Utc::now(),
        };
        let record = self
            .activate(site, Some(live.deployment_id.as_str()), record)
            .await?;

        advance(site, &record.deployment_id, state);
        let invalidation = self.invalidate(site).await?;
        info!(
            site,
            from = %live.deployment_id,
            to = %record.deployment_id,
            "rolled back"
        );

        Ok(PublishOutcome {
            record,
            state: *state,
            invalidation,
            reused_staging: true,
            objects_staged: marker.objects,
            files_substituted: 0,
            namespaces_removed: 0,
        })
    }

    /// Fetch, verify and unpack every archive into `namespace`.
    ///
    /// Files a rule targets are held back for [`Self::substitute`] so they
    /// are only ever written with their tokens replaced.
    async fn stage(
        &self,
        namespace: &str,
        archives: &[ArchiveHandle],
        rules: &RuleSet,
        policy: &CacheControlPolicy,
    ) -> Result<StagedFiles> {
        let mut staged = StagedFiles::default();
        for handle in archives {
            let bytes = self
                .staged_op(&handle.storage_key, || self.artifacts.get(&handle.fingerprint))
                .await?;
            let actual = ContentDigest::from_bytes(&bytes);
            if actual != handle.fingerprint {
                return Err(QuaysideError::DigestMismatch {
                    key: handle.storage_key.clone(),
                    expected: handle.fingerprint.to_string(),
                    actual: actual.to_string(),
                });
            }
            for (path, content) in archive::unpack(&bytes)? {
                staged.paths.push(path.clone());
                if rules.matches(&path) {
                    staged.pending.push((path, content));
                    continue;
                }
                let key = format!("{}{}", namespace, path);
                let metadata = policy.metadata_for(&path);
                self.staged_op(&key, || {
                    self.destination.put_object(&key, &content, &metadata)
                })
                .await?;
            }
            debug!(bundle_index = handle.bundle_index, "bundle staged");
        }
        METRICS.add_objects_staged(staged.paths.len() as u64);
        Ok(staged)
    }

    /// Write the held-back files with every token replaced.
    async fn substitute(
        &self,
        namespace: &str,
        pending: Vec<(String, Vec<u8>)>,
        rules: &RuleSet,
        policy: &CacheControlPolicy,
    ) -> Result<usize> {
        let mut substituted = 0;
        for (path, content) in pending {
            let body = match rules.apply(&path, &content) {
                Some(rewritten) => {
                    substituted += 1;
                    METRICS.inc_files_substituted();
                    rewritten
                }
                None => content,
            };
            let key = format!("{}{}", namespace, path);
            let metadata = policy.metadata_for(&path);
            self.staged_op(&key, || self.destination.put_object(&key, &body, &metadata))
                .await?;
        }
        debug!(substituted, "placeholders substituted");
        Ok(substituted)
    }

    /// Run `op` once under the per-operation deadline.
    async fn once<T, F, Fut>(&self, operation: &str, op: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let policy = RetryPolicy {
            max_retries: 0,
            ..self.options.retry.clone()
        };
        retry_transient(&policy, operation, op)
            .await
            .map_err(|e| e.error)
    }

    async fn activate(
        &self,
        site: &str,
        expected: Option<&str>,
        record: PublishRecord,
    ) -> Result<PublishRecord> {
        self.once("swap publish pointer", || {
            self.pointer.compare_and_swap(site, expected, record.clone())
        })
        .await
        .map_err(|e| match e {
            StorageError::PointerConflict {
                expected, actual, ..
            } => conflict(
                site,
                format!(
                    "publish pointer moved (expected {:?}, found {:?})",
                    expected, actual
                ),
            ),
            other => QuaysideError::Storage(other),
        })
    }

    async fn invalidate(&self, site: &str) -> Result<InvalidationReceipt> {
        let request = InvalidationRequest::all_paths(Uuid::new_v4().to_string());
        let receipt = self
            .once("invalidate cache", || self.invalidator.invalidate(site, &request))
            .await?;
        debug!(site, invalidation_id = %receipt.id, "invalidation requested");
        Ok(receipt)
    }

    async fn read_marker(&self, key: &str) -> Result<Option<StagingMarker>> {
        match retry_transient(&self.options.retry, key, || self.destination.get_object(key)).await
        {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(marker) => Ok(Some(marker)),
                Err(e) => {
                    warn!(key, error = %e, "ignoring unreadable staging marker");
                    Ok(None)
                }
            },
            Err(RetryExhausted {
                error: StorageError::NotFound { .. },
                ..
            }) => Ok(None),
            Err(e) => Err(QuaysideError::StagingFailed {
                key: key.to_string(),
                attempts: e.attempts,
                reason: e.error.to_string(),
            }),
        }
    }

    async fn staged_op<T, F, Fut>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        retry_transient(&self.options.retry, key, op)
            .await
            .map_err(|e| QuaysideError::StagingFailed {
                key: key.to_string(),
                attempts: e.attempts,
                reason: e.error.to_string(),
            })
    }

    /// Delete this site's deployment namespaces under `prefix` not named in
    /// `keep`.
    ///
    /// A namespace is only removed when its staging marker names `site`;
    /// namespaces of other sites sharing the prefix, and unmarked ones, are
    /// left alone. Best effort: failures are logged and skipped. Returns the
    /// number of namespaces removed.
    pub async fn cleanup_stale(&self, site: &str, prefix: &str, keep: &[&str]) -> usize {
        let root = prefix_root(prefix);
        let keys = match self.destination.list(&root).await {
            Ok(keys) => keys,
            Err(e) => {
                emit_cleanup_failed(site, &root, &e);
                return 0;
            }
        };
        let candidates: BTreeSet<&str> = keys
            .iter()
            .filter_map(|k| k.strip_prefix(root.as_str()))
            .filter_map(|rest| rest.split_once('/').map(|(ns, _)| ns))
            .filter(|ns| is_deployment_namespace(ns) && !keep.contains(ns))
            .collect();

        let mut removed = 0;
        for ns in candidates {
            let key = marker_key(prefix, ns);
            match self.read_marker(&key).await {
                Ok(Some(marker)) if marker.site == site => {}
                Ok(_) => {
                    debug!(site, namespace = ns, "namespace not owned by site, kept");
                    continue;
                }
                Err(e) => {
                    emit_cleanup_failed(site, ns, &e);
                    continue;
                }
            }
            let result = async {
                self.destination.delete_prefix(&key).await?;
                self.destination
                    .delete_prefix(&namespace_prefix(prefix, ns))
                    .await
            }
            .await;
            match result {
                Ok(objects) => {
                    debug!(site, namespace = ns, objects, "stale namespace removed");
                    removed += 1;
                }
                Err(e) => emit_cleanup_failed(site, ns, &e),
            }
        }
        removed
    }
}

/// Step `state` to its successor and announce it.
fn advance(site: &str, deployment_id: &str, state: &mut PublishState) {
    if let Some(next) = state.next() {
        *state = next;
    }
    emit_state_entered(site, deployment_id, *state);
}

/// Reads made before the state machine starts.
struct PublishContext {
    fingerprints: Vec<ContentDigest>,
    rules_digest: String,
    live: Option<PublishRecord>,
    existing: Option<StagingMarker>,
}

/// Result of the staging step.
#[derive(Default)]
struct StagedFiles {
    /// Every path in the namespace, in archive order.
    paths: Vec<String>,
    /// Files a substitution rule targets, not yet written.
    pending: Vec<(String, Vec<u8>)>,
}
