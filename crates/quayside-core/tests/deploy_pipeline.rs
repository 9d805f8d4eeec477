use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quayside_core::domain::{ErrorKind, PublishState, QuaysideError};
use quayside_core::{
    plan, Backends, DeployConfig, Deployer, SiteLocks, UploadConfig, SENTINEL,
};
use quayside_state::fakes::{
    MemoryArtifactStore, MemoryDestinationStore, MemoryInvalidator, MemoryPublishPointer,
};
use quayside_state::{
    ArtifactStore, ContentDigest, DestinationStore, FsArtifactStore, FsDestinationStore,
    FsInvalidationLog, FsPublishPointer, PublishPointer, StorageError, StorageResult,
};

const KB: usize = 1024;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Artifact store that refuses every upload of one particular archive.
struct RefusingArtifactStore {
    inner: MemoryArtifactStore,
    refused: ContentDigest,
    refused_attempts: AtomicU32,
}

#[async_trait]
impl ArtifactStore for RefusingArtifactStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        if ContentDigest::from_bytes(data) == self.refused {
            self.refused_attempts.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Unavailable("connection reset".to_string()));
        }
        self.inner.put(data).await
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        self.inner.get(digest).await
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        self.inner.contains(digest).await
    }
}

struct Fakes {
    artifacts: Arc<dyn ArtifactStore>,
    destination: Arc<MemoryDestinationStore>,
    pointer: Arc<MemoryPublishPointer>,
    invalidator: Arc<MemoryInvalidator>,
}

impl Fakes {
    fn new() -> Self {
        Self::with_artifacts(Arc::new(MemoryArtifactStore::new()))
    }

    fn with_artifacts(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            artifacts,
            destination: Arc::new(MemoryDestinationStore::new()),
            pointer: Arc::new(MemoryPublishPointer::new()),
            invalidator: Arc::new(MemoryInvalidator::new()),
        }
    }

    fn backends(&self) -> Backends {
        Backends {
            artifacts: self.artifacts.clone(),
            destination: self.destination.clone(),
            pointer: self.pointer.clone(),
            invalidator: self.invalidator.clone(),
        }
    }

    fn deployer(&self) -> Deployer {
        Deployer::new(self.backends(), SiteLocks::new())
    }
}

fn write_file(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    std::fs::write(path, content).expect("write");
}

/// `a.js` 50 KiB, `b.js` 180 KiB, `index.html` about 1 KiB.
fn write_scaled_site(root: &Path, html: &str) {
    write_file(root, "a.js", &vec![b'a'; 50 * KB]);
    write_file(root, "b.js", &vec![b'b'; 180 * KB]);
    let mut page = html.to_string();
    while page.len() < 1000 {
        page.push(' ');
    }
    write_file(root, "index.html", page.as_bytes());
}

fn config_for(build_dir: &Path) -> DeployConfig {
    let mut environment = BTreeMap::new();
    environment.insert("API_URL".to_string(), "https://api.example.com".to_string());
    DeployConfig {
        site: "www".to_string(),
        build_dir: build_dir.to_path_buf(),
        bundle_size_limit: (200 * KB) as u64,
        destination_prefix: "sites/www".to_string(),
        environment,
        distribution_domain: Some("d111.cdn.example.net".to_string()),
        upload: UploadConfig {
            concurrency: 2,
            max_retries: 3,
            backoff_base_ms: 1,
            max_backoff_ms: 5,
            timeout_ms: 5_000,
        },
        ..DeployConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Bundling
// ---------------------------------------------------------------------------

#[test]
fn greedy_packing_splits_the_scaled_site_in_two() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_scaled_site(dir.path(), "<p>hi</p>");

    let plan = plan(&config_for(dir.path())).expect("plan");
    let members: Vec<Vec<String>> = plan.bundles.iter().map(|b| b.paths.clone()).collect();
    assert_eq!(
        members,
        vec![
            vec!["a.js".to_string()],
            vec!["b.js".to_string(), "index.html".to_string()],
        ]
    );
    assert!(plan.bundles.iter().all(|b| b.framed_size <= (200 * KB) as u64));
    assert_eq!(plan.files, 3);
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_publishes_and_reports() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_scaled_site(dir.path(), "<script>const api = '{{ API_URL }}';</script>");
    let fakes = Fakes::new();
    let config = config_for(dir.path());

    let report = fakes.deployer().deploy(&config).await.expect("deploy");

    assert_eq!(report.site, "www");
    assert_eq!(report.state, PublishState::Invalidated);
    assert_eq!(report.bundle_count, 2);
    assert_eq!(report.fingerprints.len(), 2);
    assert_eq!(report.public_url.as_deref(), Some("https://d111.cdn.example.net"));
    assert!(report.deployment_id.starts_with("deploy-"));
    assert_eq!(report.files_substituted, 1);
    assert_eq!(report.invalidation_id, "mem-1");

    let plan = plan(&config).expect("plan");
    assert_eq!(plan.deployment_id, report.deployment_id);
    let planned: Vec<String> = plan.bundles.iter().map(|b| b.fingerprint.clone()).collect();
    assert_eq!(planned, report.fingerprints);

    let page = fakes
        .destination
        .get_object(&format!("sites/www/{}/index.html", report.deployment_id))
        .await
        .expect("index.html");
    let page = String::from_utf8(page).expect("utf8");
    assert!(page.starts_with("<script>const api = 'https://api.example.com';</script>"));

    let live = fakes.pointer.current("www").await.expect("current").expect("live");
    assert_eq!(live.deployment_id, report.deployment_id);
}

#[tokio::test]
async fn redeploying_identical_output_is_a_no_op_replay() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_scaled_site(dir.path(), "<p>{{ API_URL }}</p>");
    let fakes = Fakes::new();
    let deployer = fakes.deployer();
    let config = config_for(dir.path());

    let first = deployer.deploy(&config).await.expect("first");
    let snapshot = fakes.destination.snapshot();
    let second = deployer.deploy(&config).await.expect("second");

    assert_eq!(first.deployment_id, second.deployment_id);
    assert_eq!(first.fingerprints, second.fingerprints);
    assert!(second.reused_staging);
    assert_eq!(fakes.destination.snapshot(), snapshot);
}

#[tokio::test]
async fn changing_one_file_changes_the_identity() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_scaled_site(dir.path(), "<p>one</p>");
    let fakes = Fakes::new();
    let deployer = fakes.deployer();
    let config = config_for(dir.path());

    let first = deployer.deploy(&config).await.expect("first");
    write_file(dir.path(), "a.js", b"changed");
    let second = deployer.deploy(&config).await.expect("second");

    assert_ne!(first.deployment_id, second.deployment_id);
    let live = fakes.pointer.current("www").await.expect("current").expect("live");
    assert_eq!(live.previous.as_deref(), Some(first.deployment_id.as_str()));
}

#[tokio::test]
async fn upload_failure_after_retries_keeps_previous_version_live() {
    let v1 = tempfile::tempdir().expect("tempdir");
    write_scaled_site(v1.path(), "<p>v1</p>");
    let v2 = tempfile::tempdir().expect("tempdir");
    write_scaled_site(v2.path(), "<p>v2</p>");

    let refused = plan(&config_for(v2.path())).expect("plan").bundles[1]
        .fingerprint
        .clone();
    let store = Arc::new(RefusingArtifactStore {
        inner: MemoryArtifactStore::new(),
        refused: ContentDigest::try_from(refused).expect("digest"),
        refused_attempts: AtomicU32::new(0),
    });
    let fakes = Fakes::with_artifacts(store.clone());
    let deployer = fakes.deployer();

    let published = deployer.deploy(&config_for(v1.path())).await.expect("v1");

    let err = deployer
        .deploy(&config_for(v2.path()))
        .await
        .expect_err("bundle 1 must fail");
    assert_eq!(err.kind(), ErrorKind::DeployFailed);
    assert_eq!(err.failed_state(), Some(PublishState::Staging));
    match &err {
        QuaysideError::DeployFailed { source, .. } => match source.as_ref() {
            QuaysideError::UploadFailed {
                bundle_index,
                attempts,
                ..
            } => {
                assert_eq!(*bundle_index, 1);
                assert_eq!(*attempts, 4);
            }
            other => panic!("expected UploadFailed, got {other:?}"),
        },
        other => panic!("expected DeployFailed, got {other:?}"),
    }
    // One initial attempt plus three retries.
    assert_eq!(store.refused_attempts.load(Ordering::SeqCst), 4);

    let live = fakes.pointer.current("www").await.expect("current").expect("live");
    assert_eq!(live.deployment_id, published.deployment_id);
    let page = fakes
        .destination
        .get_object(&format!("sites/www/{}/index.html", published.deployment_id))
        .await
        .expect("v1 still reachable");
    assert!(page.starts_with(b"<p>v1</p>"));
    assert_eq!(fakes.invalidator.requests().len(), 1);
}

#[tokio::test]
async fn dev_mode_reuses_the_sentinel_identity() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "index.html", b"<p>first</p>");
    let fakes = Fakes::new();
    let deployer = fakes.deployer();
    let config = DeployConfig {
        dev_mode: true,
        ..config_for(dir.path())
    };

    let first = deployer.deploy(&config).await.expect("first");
    write_file(dir.path(), "index.html", b"<p>second</p>");
    let second = deployer.deploy(&config).await.expect("second");

    assert_eq!(first.deployment_id, SENTINEL);
    assert_eq!(second.deployment_id, SENTINEL);
    let page = fakes
        .destination
        .get_object(&format!("sites/www/{}/index.html", SENTINEL))
        .await
        .expect("page");
    assert_eq!(page, b"<p>second</p>");
}

#[tokio::test]
async fn rollback_and_status_through_the_deployer() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "index.html", b"<p>one</p>");
    let fakes = Fakes::new();
    let deployer = fakes.deployer();
    let config = config_for(dir.path());

    assert!(deployer.status(&config).await.expect("status").is_none());
    let first = deployer.deploy(&config).await.expect("first");
    write_file(dir.path(), "index.html", b"<p>two</p>");
    let second = deployer.deploy(&config).await.expect("second");

    let outcome = deployer.rollback(&config).await.expect("rollback");
    assert_eq!(outcome.record.deployment_id, first.deployment_id);
    let live = deployer.status(&config).await.expect("status").expect("live");
    assert_eq!(live.deployment_id, first.deployment_id);
    assert_eq!(live.previous.as_deref(), Some(second.deployment_id.as_str()));
}

// ---------------------------------------------------------------------------
// Input errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_and_empty_build_output_are_input_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fakes = Fakes::new();
    let deployer = fakes.deployer();

    let err = deployer
        .deploy(&config_for(&dir.path().join("nope")))
        .await
        .expect_err("missing");
    assert!(matches!(err, QuaysideError::BuildOutputMissing { .. }));
    assert_eq!(err.kind(), ErrorKind::Input);

    let err = deployer
        .deploy(&config_for(dir.path()))
        .await
        .expect_err("empty");
    assert!(matches!(err, QuaysideError::BuildOutputEmpty { .. }));
    assert!(fakes.destination.snapshot().is_empty());
}

#[tokio::test]
async fn invalid_environment_name_is_rejected_before_upload() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "index.html", b"<p>x</p>");
    let fakes = Fakes::new();
    let mut config = config_for(dir.path());
    config
        .environment
        .insert("NOT-VALID".to_string(), "x".to_string());

    let err = fakes.deployer().deploy(&config).await.expect_err("env");
    assert!(matches!(err, QuaysideError::InvalidEnvName(_)));
    assert!(fakes.pointer.current("www").await.expect("current").is_none());
}

#[tokio::test]
async fn build_command_runs_before_bundling() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fakes = Fakes::new();
    let config = DeployConfig {
        build_command: Some("mkdir -p dist && printf '<p>built</p>' > dist/index.html".into()),
        ..config_for(&dir.path().join("dist"))
    };

    let report = fakes.deployer().deploy(&config).await.expect("deploy");
    assert_eq!(report.bundle_count, 1);

    let failing = DeployConfig {
        build_command: Some("exit 1".into()),
        ..config
    };
    let err = fakes.deployer().deploy(&failing).await.expect_err("build");
    assert!(matches!(err, QuaysideError::BuildFailed { .. }));
}

// ---------------------------------------------------------------------------
// Filesystem backends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_to_filesystem_backends() {
    let build = tempfile::tempdir().expect("build dir");
    write_file(build.path(), "index.html", b"<h1>{{ API_URL }}</h1>");
    write_file(build.path(), "assets/logo.svg", b"<svg/>");
    let state = tempfile::tempdir().expect("state dir");

    let destination = Arc::new(FsDestinationStore::new(state.path().join("site")).expect("dest"));
    let invalidations = Arc::new(FsInvalidationLog::new(state.path()).expect("log"));
    let backends = Backends {
        artifacts: Arc::new(FsArtifactStore::new(state.path().join("artifacts")).expect("cas")),
        destination: destination.clone(),
        pointer: Arc::new(FsPublishPointer::new(state.path()).expect("pointer")),
        invalidator: invalidations.clone(),
    };
    let deployer = Deployer::new(backends, SiteLocks::new());
    let config = config_for(build.path());

    let report = deployer.deploy(&config).await.expect("deploy");

    let index = destination
        .object_path(&format!("sites/www/{}/index.html", report.deployment_id))
        .expect("path");
    assert_eq!(
        std::fs::read_to_string(index).expect("read"),
        "<h1>https://api.example.com</h1>"
    );
    let logo = destination
        .head_object(&format!("sites/www/{}/assets/logo.svg", report.deployment_id))
        .await
        .expect("head")
        .expect("exists");
    assert_eq!(logo.content_type.as_deref(), Some("image/svg+xml"));

    let live = deployer.status(&config).await.expect("status").expect("live");
    assert_eq!(live.deployment_id, report.deployment_id);
    let entries = invalidations.entries().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, report.invalidation_id);
}
