//! Index build: dedup → fan-out → fetch/verify → unpack → link → assemble.
//!
//! Every unique artifact becomes one tokio task. A task that fails for any
//! reason yields a skipped outcome; the batch always runs to completion and
//! the index is the set of resolved resources.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use p2index_fetch::{
    RetryPolicy, Transport, UnpackerRegistry, artifact_extension, fetch_verified, link_name,
    link_or_copy,
};
use p2index_resource::ResourceGraph;
use p2index_shared::{ArtifactDescriptor, ArtifactKind, P2IndexError, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::assembler;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting build status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when one artifact reaches a terminal state.
    fn artifact_finished(&self, label: &str, resolved: bool, current: usize, total: usize);
    /// Called when the build completes.
    fn done(&self, report: &BuildReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn artifact_finished(&self, _label: &str, _resolved: bool, _current: usize, _total: usize) {}
    fn done(&self, _report: &BuildReport) {}
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// An artifact listed by the source but left out of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedArtifact {
    /// Source location, or `kind id:version` for products.
    pub label: String,
    pub reason: String,
}

/// Summary of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Descriptors delivered by the metadata reader.
    pub total: usize,
    /// Descriptors dropped before fetching as duplicates.
    pub duplicates: usize,
    pub resolved: usize,
    pub skipped: Vec<SkippedArtifact>,
    pub elapsed_ms: u64,
}

/// Terminal result of one artifact.
#[derive(Debug)]
pub enum Outcome {
    Resolved(ResourceGraph),
    Skipped(SkippedArtifact),
}

impl Outcome {
    fn from_result(label: String, result: Result<ResourceGraph>) -> Self {
        match result {
            Ok(graph) => Self::Resolved(graph),
            Err(e) => Self::Skipped(SkippedArtifact {
                label,
                reason: e.to_string(),
            }),
        }
    }
}

/// Resources plus the report describing how they were obtained.
#[derive(Debug)]
pub struct BuildOutput {
    pub resources: Vec<ResourceGraph>,
    pub report: BuildReport,
}

// ---------------------------------------------------------------------------
// Context / plan
// ---------------------------------------------------------------------------

/// Collaborators shared by every artifact task.
#[derive(Clone)]
pub struct BuildContext {
    pub transport: Arc<dyn Transport>,
    pub unpackers: Arc<UnpackerRegistry>,
    pub policy: RetryPolicy,
    /// Directory receiving the `<id>-<version>.<ext>` links.
    pub link_dir: PathBuf,
}

impl BuildContext {
    pub fn new(
        transport: Arc<dyn Transport>,
        unpackers: Arc<UnpackerRegistry>,
        policy: RetryPolicy,
        link_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            unpackers,
            policy,
            link_dir: link_dir.into(),
        }
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("unpackers", &self.unpackers)
            .field("policy", &self.policy)
            .field("link_dir", &self.link_dir)
            .finish_non_exhaustive()
    }
}

/// Descriptors split by how they are processed, duplicates removed.
#[derive(Debug, Default)]
pub struct BuildPlan {
    /// Assembled inline, never fetched.
    pub products: Vec<ArtifactDescriptor>,
    /// One fetch task each.
    pub remote: Vec<ArtifactDescriptor>,
    pub duplicates: usize,
}

/// Deduplicate descriptors, keeping the first occurrence.
///
/// Products are unique per id and version. Everything else is unique per
/// source location and, when a checksum is declared, per content identity,
/// so mirrors of the same bytes are fetched once.
pub fn plan(descriptors: Vec<ArtifactDescriptor>) -> BuildPlan {
    let mut locations = HashSet::new();
    let mut identities = HashSet::new();
    let mut plan = BuildPlan::default();

    for descriptor in descriptors {
        let unique = match (descriptor.kind, &descriptor.location) {
            (ArtifactKind::Product, _) => identities.insert(descriptor.identity()),
            (_, Some(location)) => {
                locations.insert(location.clone())
                    && (descriptor.checksum.is_none() || identities.insert(descriptor.identity()))
            }
            (_, None) => true,
        };

        if !unique {
            debug!(artifact = %descriptor.label(), "duplicate");
            plan.duplicates += 1;
        } else if descriptor.kind == ArtifactKind::Product {
            plan.products.push(descriptor);
        } else {
            plan.remote.push(descriptor);
        }
    }
    plan
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Build the resource set for one repository snapshot.
///
/// 1. Dedup: drop repeated locations and content identities
/// 2. Products: assemble from properties
/// 3. Artifacts: one task per unit, joined before returning
#[instrument(skip_all, fields(descriptors = descriptors.len()))]
pub async fn build_index(
    descriptors: Vec<ArtifactDescriptor>,
    ctx: &BuildContext,
    progress: &dyn ProgressReporter,
) -> BuildOutput {
    let start = Instant::now();
    let total = descriptors.len();

    // --- Phase 1: Dedup ---
    progress.phase("Planning");
    let BuildPlan {
        products,
        remote,
        duplicates,
    } = plan(descriptors);
    info!(
        total,
        duplicates,
        products = products.len(),
        artifacts = remote.len(),
        "starting index build"
    );

    let mut report = BuildReport {
        total,
        duplicates,
        ..BuildReport::default()
    };
    let mut resources = Vec::new();
    let units = products.len() + remote.len();
    let mut finished = 0;

    // --- Phase 2: Products ---
    progress.phase("Assembling products");
    for descriptor in products {
        let label = descriptor.label();
        let outcome = Outcome::from_result(label.clone(), assembler::assemble(&descriptor, None));
        finished += 1;
        settle(&label, outcome, &mut resources, &mut report, progress, finished, units);
    }

    // --- Phase 3: Artifacts ---
    progress.phase("Fetching artifacts");
    let tasks: Vec<_> = remote
        .into_iter()
        .map(|descriptor| {
            let label = descriptor.label();
            (label, tokio::spawn(resolve_artifact(ctx.clone(), descriptor)))
        })
        .collect();

    for (label, task) in tasks {
        let result = task
            .await
            .unwrap_or_else(|e| Err(P2IndexError::Assembly(format!("artifact task failed: {e}"))));
        let outcome = Outcome::from_result(label.clone(), result);
        finished += 1;
        settle(&label, outcome, &mut resources, &mut report, progress, finished, units);
    }

    report.resolved = resources.len();
    report.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        resolved = report.resolved,
        skipped = report.skipped.len(),
        duplicates = report.duplicates,
        elapsed_ms = report.elapsed_ms,
        "index build complete"
    );
    progress.done(&report);

    BuildOutput { resources, report }
}

fn settle(
    label: &str,
    outcome: Outcome,
    resources: &mut Vec<ResourceGraph>,
    report: &mut BuildReport,
    progress: &dyn ProgressReporter,
    current: usize,
    total: usize,
) {
    let resolved = match outcome {
        Outcome::Resolved(graph) => {
            resources.push(graph);
            true
        }
        Outcome::Skipped(skipped) => {
            warn!(artifact = %skipped.label, reason = %skipped.reason, "artifact skipped");
            report.skipped.push(skipped);
            false
        }
    };
    progress.artifact_finished(label, resolved, current, total);
}

/// Fetch, verify, unpack, link and assemble one downloadable artifact.
pub async fn resolve_artifact(ctx: BuildContext, descriptor: ArtifactDescriptor) -> Result<ResourceGraph> {
    let local = materialize(&ctx, &descriptor).await?;

    tokio::task::spawn_blocking(move || assembler::assemble(&descriptor, Some(&local.file)))
        .await
        .map_err(|e| P2IndexError::Assembly(format!("assembly task failed: {e}")))?
}

/// A downloaded artifact on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    /// The verified, unpacked file.
    pub file: PathBuf,
    /// `<id>-<version>.<ext>` in the link directory, pointing at `file`.
    pub link: PathBuf,
}

/// Fetch and verify `descriptor`, unpack it and (re)create its link.
pub async fn materialize(ctx: &BuildContext, descriptor: &ArtifactDescriptor) -> Result<LocalArtifact> {
    let url = descriptor.location.clone().ok_or_else(|| {
        P2IndexError::validation(format!("{} has no download location", descriptor.label()))
    })?;
    let download = fetch_verified(ctx.transport.as_ref(), descriptor, &ctx.policy).await?;

    let unpackers = Arc::clone(&ctx.unpackers);
    let link = ctx.link_dir.join(link_name(
        &descriptor.id,
        &descriptor.version,
        &artifact_extension(&url),
    ));
    tokio::task::spawn_blocking(move || {
        let unpacked = unpackers.unpack(&url, &download)?;
        link_or_copy(&unpacked.path, &link)?;
        debug!(link = %link.display(), "linked");
        Ok(LocalArtifact {
            file: unpacked.path,
            link,
        })
    })
    .await
    .map_err(|e| P2IndexError::Assembly(format!("unpack task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use p2index_fetch::{Download, DownloadState};
    use p2index_metadata::{ProductRequirement, encode_product_requirements};
    use p2index_resource::namespace;
    use p2index_shared::{PRODUCT_REQUIRES_PROPERTY, Version};
    use url::Url;

    use super::*;

    type Response = std::result::Result<&'static str, &'static str>;

    /// Serves scripted responses per URL; `Ok(body)` writes a fresh file.
    struct FakeTransport {
        dir: PathBuf,
        script: Mutex<HashMap<String, VecDeque<Response>>>,
        calls: Mutex<HashMap<String, u32>>,
        written: Mutex<HashMap<String, PathBuf>>,
        counter: AtomicU32,
    }

    impl FakeTransport {
        fn new(dir: &Path) -> Self {
            Self {
                dir: dir.to_path_buf(),
                script: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
                written: Mutex::new(HashMap::new()),
                counter: AtomicU32::new(0),
            }
        }

        fn serve(self, url: &str, responses: Vec<Response>) -> Self {
            self.script
                .lock()
                .unwrap()
                .insert(url.to_string(), responses.into());
            self
        }

        fn calls(&self, url: &str) -> u32 {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn fetch(&self, url: &Url) -> Result<Download> {
            *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
            let next = self
                .script
                .lock()
                .unwrap()
                .get_mut(url.as_str())
                .and_then(VecDeque::pop_front);
            match next {
                Some(Ok(body)) => {
                    let n = self.counter.fetch_add(1, Ordering::SeqCst);
                    let path = self.dir.join(format!("download-{n}"));
                    std::fs::write(&path, body).unwrap();
                    self.written
                        .lock()
                        .unwrap()
                        .insert(url.to_string(), path.clone());
                    Ok(Download {
                        path,
                        state: DownloadState::Updated,
                    })
                }
                Some(Err(msg)) => Err(P2IndexError::Network(msg.into())),
                None => Err(P2IndexError::Network(format!("{url}: 404 Not Found"))),
            }
        }
    }

    fn bundle(id: &str, location: &str) -> ArtifactDescriptor {
        ArtifactDescriptor::remote(
            ArtifactKind::Bundle,
            id,
            Version::new(1, 0, 0),
            Url::parse(location).unwrap(),
        )
    }

    fn context(transport: Arc<FakeTransport>, link_dir: &Path) -> BuildContext {
        BuildContext::new(
            transport,
            Arc::new(UnpackerRegistry::default()),
            RetryPolicy {
                retries: 2,
                initial_delay: Duration::from_millis(1000),
                max_delay: Duration::from_secs(600),
            },
            link_dir,
        )
    }

    /// MD5 of the body `a`.
    const A_MD5: &str = "0cc175b9c0f1b6a831c399e269772661";
    const A: &str = "https://example.com/plugins/a.jar";
    const B: &str = "https://example.com/plugins/b.jar";
    const MIRROR: &str = "https://mirror.example.com/plugins/a.jar";

    #[test]
    fn plan_drops_repeated_locations_and_identities() {
        let product = ArtifactDescriptor::product("p", Version::new(1, 0, 0), BTreeMap::new());
        let plan = plan(vec![
            bundle("a", A).with_checksum(A_MD5),
            bundle("a", A),
            bundle("a", MIRROR).with_checksum(A_MD5.to_uppercase()),
            bundle("b", B),
            product.clone(),
            product,
        ]);

        assert_eq!(plan.duplicates, 3);
        assert_eq!(plan.products.len(), 1);
        let kept: Vec<_> = plan.remote.iter().map(|d| d.label()).collect();
        assert_eq!(kept, vec![A.to_string(), B.to_string()]);
    }

    #[tokio::test]
    async fn builds_unique_resources_and_links() {
        let cache = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            FakeTransport::new(cache.path())
                .serve(A, vec![Ok("a")])
                .serve(MIRROR, vec![Ok("a")])
                .serve(B, vec![Ok("b")]),
        );
        let descriptors = vec![
            bundle("a", A).with_checksum(A_MD5),
            bundle("a", MIRROR).with_checksum(A_MD5),
            bundle("b", B),
        ];

        let output = build_index(descriptors, &context(transport.clone(), work.path()), &SilentProgress).await;

        assert_eq!(output.report.total, 3);
        assert_eq!(output.report.duplicates, 1);
        assert_eq!(output.report.resolved, 2);
        assert!(output.report.skipped.is_empty());
        assert_eq!(transport.calls(MIRROR), 0);

        let ids: HashSet<_> = output.resources.iter().filter_map(|r| r.id()).collect();
        assert_eq!(ids, HashSet::from(["a", "b"]));
        let link = work.path().join("a-1.0.0.jar");
        assert_eq!(std::fs::read(link).unwrap(), b"a");
    }

    #[tokio::test]
    async fn checksum_mismatch_is_skipped_and_removed() {
        let cache = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            FakeTransport::new(cache.path())
                .serve(A, vec![Ok("tampered")])
                .serve(B, vec![Ok("b")]),
        );
        let descriptors = vec![bundle("a", A).with_checksum(A_MD5), bundle("b", B)];

        let output = build_index(descriptors, &context(transport.clone(), work.path()), &SilentProgress).await;

        assert_eq!(output.report.resolved, 1);
        assert_eq!(output.resources[0].id(), Some("b"));
        assert_eq!(output.report.skipped.len(), 1);
        assert_eq!(output.report.skipped[0].label, A);
        assert!(output.report.skipped[0].reason.contains("integrity"));
        assert_eq!(transport.calls(A), 1);

        let written = transport.written.lock().unwrap().get(A).cloned().unwrap();
        assert!(!written.exists());
        assert!(!work.path().join("a-1.0.0.jar").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn third_attempt_success_is_included() {
        let cache = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            FakeTransport::new(cache.path()).serve(A, vec![Err("reset"), Err("reset"), Ok("a")]),
        );

        let output = build_index(vec![bundle("a", A)], &context(transport.clone(), work.path()), &SilentProgress).await;

        assert_eq!(transport.calls(A), 3);
        assert_eq!(output.report.resolved, 1);
        assert_eq!(output.resources[0].id(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_artifact_is_excluded() {
        let cache = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            FakeTransport::new(cache.path())
                .serve(A, vec![Err("down"), Err("down"), Err("down"), Ok("late")])
                .serve(B, vec![Ok("b")]),
        );

        let output = build_index(
            vec![bundle("a", A), bundle("b", B)],
            &context(transport.clone(), work.path()),
            &SilentProgress,
        )
        .await;

        assert_eq!(transport.calls(A), 3);
        assert_eq!(output.report.resolved, 1);
        assert_eq!(output.report.skipped[0].label, A);
        assert!(output.report.skipped[0].reason.contains("network"));
    }

    #[tokio::test]
    async fn products_are_assembled_without_fetching() {
        let cache = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new(cache.path()));
        let mut props = BTreeMap::new();
        props.insert("org.eclipse.equinox.p2.name".to_string(), "Example".to_string());
        let product = ArtifactDescriptor::product("org.example.ide", Version::new(1, 0, 0), props);

        let output = build_index(vec![product], &context(transport.clone(), work.path()), &SilentProgress).await;

        assert_eq!(output.report.resolved, 1);
        assert_eq!(output.resources[0].kind(), Some(ArtifactKind::Product));
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn product_with_runaway_filter_is_skipped() {
        let cache = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new(cache.path()));

        let mut runaway = ProductRequirement::new(namespace::P2_IU, "org.example.gtk", "0.0.0");
        runaway.filter = Some(format!("{}(a=b){}", "(!".repeat(200_000), ")".repeat(200_000)));
        let mut props = BTreeMap::new();
        props.insert(
            PRODUCT_REQUIRES_PROPERTY.to_string(),
            encode_product_requirements(&[runaway]),
        );
        let bad = ArtifactDescriptor::product("org.example.bad", Version::new(1, 0, 0), props);
        let good = ArtifactDescriptor::product("org.example.ide", Version::new(1, 0, 0), BTreeMap::new());

        let output = build_index(vec![bad, good], &context(transport, work.path()), &SilentProgress).await;

        assert_eq!(output.report.resolved, 1);
        assert_eq!(output.resources[0].id(), Some("org.example.ide"));
        assert_eq!(output.report.skipped.len(), 1);
        assert_eq!(output.report.skipped[0].label, "product org.example.bad:1.0.0");
        assert!(output.report.skipped[0].reason.contains("nested too deeply"));
    }

    #[tokio::test]
    async fn progress_sees_every_unit() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<(String, bool, usize, usize)>>);

        impl ProgressReporter for Recorder {
            fn phase(&self, _name: &str) {}
            fn artifact_finished(&self, label: &str, resolved: bool, current: usize, total: usize) {
                self.0.lock().unwrap().push((label.to_string(), resolved, current, total));
            }
            fn done(&self, _report: &BuildReport) {}
        }

        let cache = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new(cache.path()).serve(A, vec![Ok("a")]));
        let product = ArtifactDescriptor::product("p", Version::new(1, 0, 0), BTreeMap::new());
        let recorder = Recorder::default();

        build_index(vec![bundle("a", A), product], &context(transport, work.path()), &recorder).await;

        let events = recorder.0.into_inner().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ("product p:1.0.0".to_string(), true, 1, 2));
        assert_eq!(events[1], (A.to_string(), true, 2, 2));
    }
}
