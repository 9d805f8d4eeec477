//! Structured observability hooks for the deploy lifecycle.
//!
//! This module provides:
//! - Site-scoped tracing spans via the `DeploySpan` RAII guard
//! - Emission functions for key lifecycle events: start, bundle upload,
//!   state transitions, publish and failure
//!
//! Events are emitted at `info!` level (filter with `QUAYSIDE_LOG`).

use tracing::info;

use crate::domain::PublishState;

/// RAII guard that enters a site-scoped tracing span for the duration of a deploy.
///
/// # Example
///
/// ```ignore
/// let _span = DeploySpan::enter("marketing");
/// // All tracing calls are now associated with site = "marketing"
/// ```
pub struct DeploySpan {
    _span: tracing::span::EnteredSpan,
}

impl DeploySpan {
    /// Create and enter a span tagged with the site.
    pub fn enter(site: &str) -> Self {
        Self {
            _span: deploy_span(site).entered(),
        }
    }
}

/// Span for async deploy work; attach with `tracing::Instrument`.
pub fn deploy_span(site: &str) -> tracing::Span {
    tracing::info_span!("quayside.deploy", site = %site)
}

/// Emit event: deploy started.
pub fn emit_deploy_started(site: &str, dev_mode: bool) {
    info!(event = "deploy.started", site = %site, dev_mode = dev_mode);
}

/// Emit event: the build output was split.
pub fn emit_bundles_planned(site: &str, files: usize, bundles: usize, total_bytes: u64) {
    info!(
        event = "deploy.bundled",
        site = %site,
        files = files,
        bundles = bundles,
        total_bytes = total_bytes,
    );
}

/// Emit event: one bundle is in the artifact store.
pub fn emit_bundle_uploaded(bundle_index: usize, fingerprint: &str, reused: bool) {
    info!(
        event = "bundle.uploaded",
        bundle_index = bundle_index,
        fingerprint = %fingerprint,
        reused = reused,
    );
}

/// Emit event: the publish pipeline entered a state.
pub fn emit_state_entered(site: &str, deployment_id: &str, state: PublishState) {
    info!(
        event = "publish.state_entered",
        site = %site,
        deployment_id = %deployment_id,
        state = %state,
    );
}

/// Emit event: deploy is live and caches are invalidated.
pub fn emit_deploy_published(site: &str, deployment_id: &str, duration_ms: u64) {
    info!(
        event = "deploy.published",
        site = %site,
        deployment_id = %deployment_id,
        duration_ms = duration_ms,
    );
}

/// Emit event: deploy failed (warning level).
pub fn emit_deploy_failed(site: &str, state: Option<PublishState>, error: &dyn std::fmt::Display) {
    let state = state.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
    tracing::warn!(event = "deploy.failed", site = %site, state = %state, error = %error);
}

/// Emit event: best-effort cleanup could not remove a namespace (warning level).
pub fn emit_cleanup_failed(site: &str, namespace: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "cleanup.failed",
        site = %site,
        namespace = %namespace,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_span_create() {
        // Just ensure DeploySpan::enter doesn't panic
        let _span = DeploySpan::enter("test-site");
        emit_state_entered("test-site", "deploy-live", PublishState::Staging);
    }
}
