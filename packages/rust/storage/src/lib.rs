//! Persisted index file for one repository.
//!
//! The [`IndexStore`] owns `index.json.gz` inside a working directory: the
//! whole resource set, gzip-compressed JSON, tagged with a hash of the source
//! location it was built from.
//!
//! **Rules:**
//! - a file is reused only when its format version and tag both match
//! - writes go to a temporary file that is renamed over the old index
//! - a file that cannot be decoded is an error, not a silent rebuild

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use p2index_resource::ResourceGraph;
use p2index_shared::{P2IndexError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// File name of the persisted index inside the working directory.
pub const INDEX_FILE: &str = "index.json.gz";

/// Bumped whenever the persisted layout changes; older files are rebuilt.
pub const FORMAT_VERSION: u32 = 1;

/// Identity hash of a source location.
pub fn source_tag(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// A decoded index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedIndex {
    pub format_version: u32,
    pub tag: String,
    pub built_at: DateTime<Utc>,
    pub resources: Vec<ResourceGraph>,
}

/// Header-first view so that a layout change never fails resource decoding.
#[derive(Deserialize)]
struct Envelope {
    format_version: u32,
    tag: String,
    built_at: DateTime<Utc>,
    #[serde(default)]
    resources: serde_json::Value,
}

/// Handle on a working directory's index file.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    /// Create the working directory if needed. Failure here is a
    /// configuration error: nothing else can work without it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            P2IndexError::config(format!("cannot create working directory {}: {e}", dir.display()))
        })?;
        if !dir.is_dir() {
            return Err(P2IndexError::config(format!(
                "working directory {} is not a directory",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Load the index if it was built from the source identified by `tag`.
    ///
    /// `Ok(None)` means "rebuild": no file, a foreign tag, or an older layout.
    pub fn load(&self, tag: &str) -> Result<Option<PersistedIndex>> {
        let path = self.path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no persisted index");
                return Ok(None);
            }
            Err(e) => return Err(P2IndexError::io(path, e)),
        };

        let envelope: Envelope = serde_json::from_reader(GzDecoder::new(BufReader::new(file)))
            .map_err(|e| P2IndexError::Storage(format!("unreadable index {}: {e}", path.display())))?;

        if envelope.format_version != FORMAT_VERSION {
            info!(
                found = envelope.format_version,
                expected = FORMAT_VERSION,
                "persisted index has an old layout"
            );
            return Ok(None);
        }
        if envelope.tag != tag {
            info!(found = %envelope.tag, expected = %tag, "persisted index belongs to another source");
            return Ok(None);
        }

        let resources: Vec<ResourceGraph> = serde_json::from_value(envelope.resources)
            .map_err(|e| P2IndexError::Storage(format!("corrupt index {}: {e}", path.display())))?;
        debug!(resources = resources.len(), "loaded persisted index");

        Ok(Some(PersistedIndex {
            format_version: envelope.format_version,
            tag: envelope.tag,
            built_at: envelope.built_at,
            resources,
        }))
    }

    /// Replace the index file with `resources`, tagged with `tag`.
    pub fn save(&self, tag: &str, resources: Vec<ResourceGraph>) -> Result<PersistedIndex> {
        let index = PersistedIndex {
            format_version: FORMAT_VERSION,
            tag: tag.to_string(),
            built_at: Utc::now(),
            resources,
        };

        let path = self.path();
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| P2IndexError::io(&self.dir, e))?;
        {
            let mut encoder = GzEncoder::new(BufWriter::new(tmp.as_file()), Compression::default());
            serde_json::to_writer(&mut encoder, &index)
                .map_err(|e| P2IndexError::Storage(format!("encoding index: {e}")))?;
            let mut writer = encoder.finish().map_err(|e| P2IndexError::io(tmp.path(), e))?;
            writer.flush().map_err(|e| P2IndexError::io(tmp.path(), e))?;
        }
        tmp.persist(&path)
            .map_err(|e| P2IndexError::io(&path, e.error))?;

        info!(path = %path.display(), resources = index.resources.len(), "index saved");
        Ok(index)
    }

    /// Remove the index file. Returns whether one existed.
    pub fn delete(&self) -> Result<bool> {
        let path = self.path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "index deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(P2IndexError::io(path, e)),
        }
    }
}
