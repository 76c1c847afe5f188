//! Integrity checks on freshly downloaded content.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};
use p2index_shared::{P2IndexError, Result};
use tracing::warn;

/// MD5 of a file, lowercase hex.
pub fn md5_hex(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| P2IndexError::io(path, e))?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(P2IndexError::io(path, e)),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Whether a declared digest agrees with the computed one.
///
/// Leading whitespace in `declared` is ignored and characters compare
/// case-insensitively over the length of `actual`.
pub fn checksum_matches(declared: &str, actual: &str) -> bool {
    let mut declared = declared.trim_start().chars();
    actual
        .chars()
        .all(|a| declared.next().is_some_and(|d| d.eq_ignore_ascii_case(&a)))
}

/// Check `path` against the declared checksum, or the declared size when no
/// checksum is given. A mismatch deletes the file.
pub fn verify_download(path: &Path, checksum: Option<&str>, size: Option<u64>) -> Result<()> {
    let failure = if let Some(declared) = checksum {
        let actual = md5_hex(path)?;
        (!checksum_matches(declared, &actual)).then(|| {
            format!(
                "invalid content checksum {actual} for {}; expected {}",
                path.display(),
                declared.trim()
            )
        })
    } else if let Some(expected) = size {
        let actual = std::fs::metadata(path)
            .map_err(|e| P2IndexError::io(path, e))?
            .len();
        (actual != expected).then(|| {
            format!(
                "invalid content size {actual} for {}; expected {expected}",
                path.display()
            )
        })
    } else {
        None
    };

    let Some(message) = failure else {
        return Ok(());
    };
    warn!(path = %path.display(), "{message}");
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(P2IndexError::io(path, e)),
    }
    Err(P2IndexError::Integrity(message))
}
