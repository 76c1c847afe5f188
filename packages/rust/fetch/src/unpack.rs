//! Turning a raw download into the canonical local file.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use flate2::read::GzDecoder;
use p2index_shared::{P2IndexError, Result};
use tracing::debug;
use url::Url;

use crate::transport::{Download, DownloadState};

/// Converts a download into the file the index should describe.
pub trait Unpacker: Send + Sync {
    /// Whether this unpacker handles content fetched from `url`.
    fn accepts(&self, url: &Url) -> bool;

    fn unpack(&self, url: &Url, download: &Download) -> Result<Download>;
}

/// Uses the download as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughUnpacker;

impl Unpacker for PassthroughUnpacker {
    fn accepts(&self, _url: &Url) -> bool {
        true
    }

    fn unpack(&self, _url: &Url, download: &Download) -> Result<Download> {
        Ok(download.clone())
    }
}

/// Inflates `.gz` downloads next to the cached file.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipUnpacker;

impl GzipUnpacker {
    const SUFFIX: &'static str = "unpacked";
}

impl Unpacker for GzipUnpacker {
    fn accepts(&self, url: &Url) -> bool {
        url.path().ends_with(".gz")
    }

    fn unpack(&self, url: &Url, download: &Download) -> Result<Download> {
        let target = download.path.with_extension(Self::SUFFIX);
        if download.state == DownloadState::Unmodified && target.exists() {
            return Ok(Download {
                path: target,
                state: DownloadState::Unmodified,
            });
        }

        let source = File::open(&download.path).map_err(|e| P2IndexError::io(&download.path, e))?;
        let partial: PathBuf = target.with_extension("part");
        let out = File::create(&partial).map_err(|e| P2IndexError::io(&partial, e))?;

        let mut decoder = GzDecoder::new(BufReader::new(source));
        let mut writer = BufWriter::new(out);
        let copied = io::copy(&mut decoder, &mut writer).and_then(|_| writer.flush());
        drop(writer);
        if let Err(e) = copied {
            let _ = std::fs::remove_file(&partial);
            return Err(P2IndexError::parse(format!("{url}: not valid gzip: {e}")));
        }
        std::fs::rename(&partial, &target).map_err(|e| P2IndexError::io(&target, e))?;

        debug!(%url, path = %target.display(), "inflated");
        Ok(Download {
            path: target,
            state: DownloadState::Updated,
        })
    }
}

/// Ordered unpackers; the first that accepts a URL wins.
pub struct UnpackerRegistry {
    unpackers: Vec<Box<dyn Unpacker>>,
}

impl UnpackerRegistry {
    pub fn new() -> Self {
        Self {
            unpackers: Vec::new(),
        }
    }

    pub fn register(&mut self, unpacker: impl Unpacker + 'static) -> &mut Self {
        self.unpackers.push(Box::new(unpacker));
        self
    }

    /// Unpack with the first accepting unpacker, or pass through.
    pub fn unpack(&self, url: &Url, download: &Download) -> Result<Download> {
        match self.unpackers.iter().find(|u| u.accepts(url)) {
            Some(unpacker) => unpacker.unpack(url, download),
            None => PassthroughUnpacker.unpack(url, download),
        }
    }
}

impl Default for UnpackerRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(GzipUnpacker);
        registry
    }
}

impl std::fmt::Debug for UnpackerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnpackerRegistry")
            .field("unpackers", &self.unpackers.len())
            .finish()
    }
}
