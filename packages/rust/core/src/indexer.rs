//! Repository index lifecycle and query façade.
//!
//! An [`Indexer`] owns one working directory: the persisted index, the
//! canonical artifact links and the in-memory [`ResourceRepository`] all
//! queries run against.
//!
//! **Lifecycle:**
//! - `open`: reuse the persisted index when its tag matches the source, else build
//! - `refresh`: the same check again
//! - `reread`: delete the persisted index, then build
//!
//! Callers serialize lifecycle calls per working directory; queries may run
//! concurrently with each other.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use p2index_fetch::{RetryPolicy, Transport, UnpackerRegistry, artifact_extension, link_name};
use p2index_metadata::{MetadataReader, MetadataSource};
use p2index_resource::{Provider, Requirement, ResourceGraph, ResourceRepository};
use p2index_shared::{ArtifactDescriptor, ArtifactKind, P2IndexError, Result, Version};
use p2index_storage::{IndexStore, source_tag};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use url::Url;

use crate::pipeline::{
    BuildContext, BuildOutput, BuildReport, ProgressReporter, build_index, materialize,
};

/// Notified when a download started by [`Indexer::get`] settles.
pub trait DownloadListener: Send + Sync {
    fn success(&self, link: &Path);
    fn failure(&self, link: &Path, reason: &str);
}

/// Everything an [`Indexer`] talks to besides its working directory.
#[derive(Clone)]
pub struct Collaborators {
    pub reader: Arc<dyn MetadataReader>,
    pub transport: Arc<dyn Transport>,
    pub unpackers: Arc<UnpackerRegistry>,
    pub policy: RetryPolicy,
}

/// One on-demand download, shared by every caller asking for the same link.
type SharedDownload = Arc<OnceCell<std::result::Result<PathBuf, String>>>;
type InFlight = Arc<Mutex<HashMap<PathBuf, SharedDownload>>>;

pub struct Indexer {
    source: MetadataSource,
    tag: String,
    store: IndexStore,
    reader: Arc<dyn MetadataReader>,
    ctx: BuildContext,
    repository: RwLock<Arc<ResourceRepository>>,
    last_report: Mutex<Option<BuildReport>>,
    in_flight: InFlight,
}

impl Indexer {
    /// Open (or build) the index of `source` inside `work_dir`.
    ///
    /// An unusable working directory, an unreadable persisted index or an
    /// unreadable listing fail here; individual artifacts never do.
    #[instrument(skip_all, fields(source = %source))]
    pub async fn open(
        source: MetadataSource,
        work_dir: impl Into<PathBuf>,
        collaborators: Collaborators,
        progress: &dyn ProgressReporter,
    ) -> Result<Self> {
        let store = IndexStore::open(work_dir)?;
        let tag = source_tag(source.url().as_str());
        let ctx = BuildContext::new(
            collaborators.transport,
            collaborators.unpackers,
            collaborators.policy,
            store.dir(),
        );

        let indexer = Self {
            source,
            tag,
            store,
            reader: collaborators.reader,
            ctx,
            repository: RwLock::new(Arc::new(ResourceRepository::new(Vec::new()))),
            last_report: Mutex::new(None),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        };
        indexer.load_or_build(progress).await?;
        Ok(indexer)
    }

    pub fn source(&self) -> &MetadataSource {
        &self.source
    }

    /// Hash of the source location the index is tagged with.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn work_dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn index_path(&self) -> PathBuf {
        self.store.path()
    }

    /// Report of the most recent build by this indexer, if it built.
    pub fn last_report(&self) -> Option<BuildReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the current resource set.
    pub fn repository(&self) -> Arc<ResourceRepository> {
        Arc::clone(&self.repository.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Re-check the persisted index. Returns the build report when a build
    /// was needed.
    #[instrument(skip_all, fields(source = %self.source))]
    pub async fn refresh(&self, progress: &dyn ProgressReporter) -> Result<Option<BuildReport>> {
        self.load_or_build(progress).await
    }

    /// Discard the persisted index and build from scratch.
    #[instrument(skip_all, fields(source = %self.source))]
    pub async fn reread(&self, progress: &dyn ProgressReporter) -> Result<BuildReport> {
        self.store.delete()?;
        self.rebuild(progress).await
    }

    async fn load_or_build(&self, progress: &dyn ProgressReporter) -> Result<Option<BuildReport>> {
        if let Some(index) = self.store.load(&self.tag)? {
            info!(
                resources = index.resources.len(),
                built_at = %index.built_at,
                "reusing persisted index"
            );
            self.install(index.resources);
            return Ok(None);
        }
        self.rebuild(progress).await.map(Some)
    }

    async fn rebuild(&self, progress: &dyn ProgressReporter) -> Result<BuildReport> {
        progress.phase("Reading metadata");
        let descriptors = self.reader.read(&self.source).await?;

        let BuildOutput { resources, report } = build_index(descriptors, &self.ctx, progress).await;

        progress.phase("Saving index");
        let saved = self.store.save(&self.tag, resources)?;
        self.install(saved.resources);
        *self.last_report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        Ok(report)
    }

    fn install(&self, resources: Vec<ResourceGraph>) {
        let repository = Arc::new(ResourceRepository::new(resources));
        *self.repository.write().unwrap_or_else(PoisonError::into_inner) = repository;
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Unit ids matching a glob (`*`, `?`), or every id.
    pub fn list(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        self.repository().list(pattern)
    }

    /// Known versions of `id`, ascending.
    pub fn versions(&self, id: &str) -> BTreeSet<Version> {
        self.repository().versions(id)
    }

    pub fn resource(&self, id: &str, version: &Version) -> Option<Arc<ResourceGraph>> {
        self.repository().get(id, version)
    }

    pub fn find_providers(
        &self,
        requirements: &[Requirement],
    ) -> Result<HashMap<Requirement, Vec<Provider>>> {
        self.repository().find_providers(requirements)
    }

    /// Local link for `id` at `version`, downloading it if needed.
    ///
    /// Without listeners the download is awaited. With listeners the link
    /// path is returned at once and the listeners hear about the outcome
    /// later. Concurrent calls for the same unit share one download.
    /// `Ok(None)` when the unit is unknown or has no content (products).
    #[instrument(skip_all, fields(%id, %version))]
    pub async fn get(
        &self,
        id: &str,
        version: &Version,
        listeners: Vec<Arc<dyn DownloadListener>>,
    ) -> Result<Option<PathBuf>> {
        let Some(resource) = self.resource(id, version) else {
            debug!("unknown unit");
            return Ok(None);
        };
        let Some(content) = resource.content() else {
            debug!("unit has no content");
            return Ok(None);
        };
        let url = Url::parse(&content.url)
            .map_err(|e| P2IndexError::parse(format!("content url '{}': {e}", content.url)))?;
        let link = self
            .ctx
            .link_dir
            .join(link_name(id, version, &artifact_extension(&url)));
        let kind = resource.kind().unwrap_or(ArtifactKind::Bundle);
        let descriptor = ArtifactDescriptor::remote(kind, id, version.clone(), url);

        let download = shared_download(
            Arc::clone(&self.in_flight),
            self.ctx.clone(),
            descriptor,
            link.clone(),
        );

        if listeners.is_empty() {
            return download.await.map(Some);
        }

        let notify_link = link.clone();
        tokio::spawn(async move {
            match download.await {
                Ok(path) => listeners.iter().for_each(|l| l.success(&path)),
                Err(e) => {
                    let reason = e.to_string();
                    listeners.iter().for_each(|l| l.failure(&notify_link, &reason));
                }
            }
        });
        Ok(Some(link))
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("source", &self.source)
            .field("tag", &self.tag)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Join the in-flight download for `link`, or start it.
fn shared_download(
    in_flight: InFlight,
    ctx: BuildContext,
    descriptor: ArtifactDescriptor,
    link: PathBuf,
) -> impl Future<Output = Result<PathBuf>> + Send + 'static {
    let entry = InFlightEntry::join(in_flight, link);

    async move {
        let label = descriptor.label();
        let result = entry
            .cell
            .get_or_init(|| async move {
                materialize(&ctx, &descriptor)
                    .await
                    .map(|local| local.link)
                    .map_err(|e| e.to_string())
            })
            .await
            .clone();
        drop(entry);

        result.map_err(|message| P2IndexError::Download { url: label, message })
    }
}

/// One caller's hold on an in-flight download.
///
/// The map entry goes away once the download has settled, or when the last
/// caller gives up on it before then.
struct InFlightEntry {
    in_flight: InFlight,
    link: PathBuf,
    cell: SharedDownload,
}

impl InFlightEntry {
    fn join(in_flight: InFlight, link: PathBuf) -> Self {
        let cell = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(link.clone())
            .or_default()
            .clone();
        Self {
            in_flight,
            link,
            cell,
        }
    }
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = map.get(&self.link) else {
            return;
        };
        // The map holds one reference and this entry another.
        let last_holder = Arc::strong_count(&self.cell) <= 2;
        if Arc::ptr_eq(current, &self.cell) && (self.cell.initialized() || last_holder) {
            map.remove(&self.link);
        }
    }
}
