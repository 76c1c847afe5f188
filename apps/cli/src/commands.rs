//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use p2index_core::{BuildReport, Collaborators, Indexer, ProgressReporter};
use p2index_fetch::{HttpTransport, RetryPolicy, UnpackerRegistry};
use p2index_metadata::{ListingReader, MetadataSource};
use p2index_resource::Requirement;
use p2index_shared::{AppConfig, FetchConfig, Version, expand_home, init_config, load_config};
use p2index_storage::{IndexStore, source_tag};
use tracing::info;

/// Characters of the source tag used to name an unregistered source's directory.
const TAG_DIR_LEN: usize = 16;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// p2index: capability indexes for P2/OSGi repositories.
#[derive(Parser)]
#[command(
    name = "p2index",
    version,
    about = "Build and query capability indexes of P2/OSGi repositories.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Repository: a registered name, a URL, or a path to a .target file.
    #[arg(short, long, global = true, env = "P2INDEX_SOURCE")]
    pub source: Option<String>,

    /// Working directory of the index (defaults to <work_dir>/<repository>).
    #[arg(long, global = true)]
    pub work_dir: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Open a repository index, building it if needed.
    Index {
        /// Repository: a registered name, a URL, or a path to a .target file.
        #[arg(value_name = "SOURCE")]
        location: String,

        /// Print the build report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the index only if the persisted one does not match.
    Refresh,

    /// Discard the persisted index and rebuild.
    Reread,

    /// List unit ids, optionally filtered by a glob pattern.
    List {
        /// Glob with `*` and `?`.
        pattern: Option<String>,
    },

    /// List the known versions of a unit.
    Versions {
        /// Unit id.
        id: String,
    },

    /// Download a unit and print its local path.
    Get {
        /// Unit id.
        id: String,
        /// Exact version.
        version: String,
    },

    /// Find the resources providing a capability.
    Providers {
        /// Capability namespace (e.g. osgi.identity).
        namespace: String,
        /// LDAP filter over the capability attributes.
        filter: Option<String>,
    },

    /// List features.
    Features,

    /// List products.
    Products {
        /// Also print each product's requirements.
        #[arg(long)]
        requirements: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "p2index=info",
        1 => "p2index=debug",
        _ => "p2index=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let Cli {
        source,
        work_dir,
        command,
        ..
    } = cli;
    let source = source.as_deref();
    let work_dir = work_dir.as_deref();

    match command {
        Command::Index { location, json } => cmd_index(&location, work_dir, json).await,
        Command::Refresh => {
            let (config, target) = resolve(source, work_dir)?;
            cmd_refresh(&target, &config).await
        }
        Command::Reread => {
            let (config, target) = resolve(source, work_dir)?;
            cmd_reread(&target, &config).await
        }
        Command::List { pattern } => {
            let (config, target) = resolve(source, work_dir)?;
            let indexer = target.open(&config).await?;
            for id in indexer.list(pattern.as_deref())? {
                println!("{id}");
            }
            Ok(())
        }
        Command::Versions { id } => {
            let (config, target) = resolve(source, work_dir)?;
            let indexer = target.open(&config).await?;
            for version in indexer.versions(&id) {
                println!("{version}");
            }
            Ok(())
        }
        Command::Get { id, version } => {
            let (config, target) = resolve(source, work_dir)?;
            cmd_get(&target, &config, &id, &version).await
        }
        Command::Providers { namespace, filter } => {
            let (config, target) = resolve(source, work_dir)?;
            cmd_providers(&target, &config, &namespace, filter.as_deref()).await
        }
        Command::Features => {
            let (config, target) = resolve(source, work_dir)?;
            cmd_features(&target, &config).await
        }
        Command::Products { requirements } => {
            let (config, target) = resolve(source, work_dir)?;
            cmd_products(&target, &config, requirements).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// Load the config and resolve the global `--source`.
fn resolve(source: Option<&str>, work_dir: Option<&Path>) -> Result<(AppConfig, Target)> {
    let source =
        source.ok_or_else(|| eyre!("no repository given: pass --source or set P2INDEX_SOURCE"))?;
    let config = load_config()?;
    let target = Target::resolve(source, work_dir, &config)?;
    Ok((config, target))
}

// ---------------------------------------------------------------------------
// Repository resolution
// ---------------------------------------------------------------------------

/// A source location plus the directory its index lives in.
struct Target {
    source: MetadataSource,
    work_dir: PathBuf,
}

impl Target {
    /// Resolve a registered repository name, URL or path.
    fn resolve(source: &str, work_dir: Option<&Path>, config: &AppConfig) -> Result<Self> {
        let registered = config.repositories.iter().find(|r| r.name == source);
        let location = registered.map_or(source, |r| r.url.as_str());
        let source = MetadataSource::from_location(location)?;

        let work_dir = match work_dir {
            Some(dir) => dir.to_path_buf(),
            None => {
                let name = registered.map_or_else(|| work_dir_name(&source), |r| r.name.clone());
                expand_home(&config.defaults.work_dir)?.join(name)
            }
        };
        Ok(Self { source, work_dir })
    }

    /// Open the index behind a spinner.
    async fn open(&self, config: &AppConfig) -> Result<Indexer> {
        let collaborators = collaborators(config)?;
        let progress = CliProgress::new();
        let opened =
            Indexer::open(self.source.clone(), &self.work_dir, collaborators, &progress).await;
        progress.clear();
        Ok(opened?)
    }
}

/// Directory name for a source that is not registered in the config.
fn work_dir_name(source: &MetadataSource) -> String {
    let tag = source_tag(source.url().as_str());
    tag[..TAG_DIR_LEN].to_string()
}

fn collaborators(config: &AppConfig) -> Result<Collaborators> {
    let fetch = FetchConfig::from(config);
    let cache_dir = expand_home(&config.defaults.cache_dir)?;
    Ok(Collaborators {
        reader: Arc::new(ListingReader::with_timeout(fetch.timeout)?),
        transport: Arc::new(HttpTransport::new(cache_dir, &fetch)?),
        unpackers: Arc::new(UnpackerRegistry::default()),
        policy: RetryPolicy::from(&fetch),
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_index(location: &str, work_dir: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config()?;
    let target = Target::resolve(location, work_dir, &config)?;
    info!(source = %target.source, work_dir = %target.work_dir.display(), "opening index");

    let indexer = target.open(&config).await?;
    match indexer.last_report() {
        Some(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
        Some(report) => print_report(&indexer, &report),
        None => print_reused(&indexer),
    }
    Ok(())
}

async fn cmd_refresh(target: &Target, config: &AppConfig) -> Result<()> {
    let indexer = target.open(config).await?;
    match indexer.last_report() {
        Some(report) => print_report(&indexer, &report),
        None => print_reused(&indexer),
    }
    Ok(())
}

async fn cmd_reread(target: &Target, config: &AppConfig) -> Result<()> {
    // Dropping the file first keeps `open` from loading it only to rebuild.
    IndexStore::open(&target.work_dir)?.delete()?;
    let indexer = target.open(config).await?;
    let report = indexer
        .last_report()
        .ok_or_else(|| eyre!("index was not rebuilt"))?;
    print_report(&indexer, &report);
    Ok(())
}

async fn cmd_get(target: &Target, config: &AppConfig, id: &str, version: &str) -> Result<()> {
    let version = Version::parse(version)?;
    let indexer = target.open(config).await?;
    match indexer.get(id, &version, Vec::new()).await? {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => Err(eyre!("{id} {version} is not in the index or has no content")),
    }
}

async fn cmd_providers(
    target: &Target,
    config: &AppConfig,
    namespace: &str,
    filter: Option<&str>,
) -> Result<()> {
    let requirement = match filter {
        Some(filter) => Requirement::filtered(namespace, filter),
        None => Requirement::new(namespace),
    };
    let indexer = target.open(config).await?;
    let found = indexer.find_providers(std::slice::from_ref(&requirement))?;

    for provider in found.get(&requirement).into_iter().flatten() {
        let id = provider.resource.id().unwrap_or("?");
        let version = provider
            .resource
            .version()
            .map_or_else(|| "?".to_string(), ToString::to_string);
        println!("{id} {version}");
    }
    Ok(())
}

async fn cmd_features(target: &Target, config: &AppConfig) -> Result<()> {
    let indexer = target.open(config).await?;
    for feature in indexer.features() {
        match &feature.label {
            Some(label) => println!("{} {}  {label}", feature.id, feature.version),
            None => println!("{} {}", feature.id, feature.version),
        }
    }
    Ok(())
}

async fn cmd_products(target: &Target, config: &AppConfig, requirements: bool) -> Result<()> {
    let indexer = target.open(config).await?;
    for product in indexer.products() {
        match &product.name {
            Some(name) => println!("{} {}  {name}", product.id, product.version),
            None => println!("{} {}", product.id, product.version),
        }
        if !requirements {
            continue;
        }
        for req in &product.requirements {
            let optional = if req.optional { " (optional)" } else { "" };
            let filter = req.filter.as_deref().unwrap_or("");
            println!("    {} {} {}{optional} {filter}", req.namespace, req.name, req.range);
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_report(indexer: &Indexer, report: &BuildReport) {
    println!();
    println!("  Index built");
    println!("  Source:     {}", indexer.source());
    println!("  Path:       {}", indexer.index_path().display());
    println!("  Listed:     {}", report.total);
    println!("  Duplicates: {}", report.duplicates);
    println!("  Resolved:   {}", report.resolved);
    println!("  Skipped:    {}", report.skipped.len());
    for skipped in &report.skipped {
        println!("    - {}: {}", skipped.label, skipped.reason);
    }
    println!("  Time:       {:.1}s", report.elapsed_ms as f64 / 1000.0);
    println!();
}

fn print_reused(indexer: &Indexer) {
    println!();
    println!("  Index up to date");
    println!("  Source:    {}", indexer.source());
    println!("  Path:      {}", indexer.index_path().display());
    println!("  Resources: {}", indexer.repository().len());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn clear(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn artifact_finished(&self, label: &str, resolved: bool, current: usize, total: usize) {
        let mark = if resolved { "ok" } else { "skipped" };
        self.spinner
            .set_message(format!("Fetching [{current}/{total}] {mark} {label}"));
    }

    fn done(&self, _report: &BuildReport) {
        self.spinner.finish_and_clear();
    }
}
