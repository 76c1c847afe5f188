//! Canonical per-unit links inside a working directory.

use std::io;
use std::path::Path;

use p2index_shared::{P2IndexError, Result, Version};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "jar";

/// `<id>-<version>.<ext>`.
pub fn link_name(id: &str, version: &Version, extension: &str) -> String {
    format!("{id}-{version}.{extension}")
}

/// Extension of the artifact at `url`, ignoring a trailing `.gz`.
pub fn artifact_extension(url: &Url) -> String {
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    let name = name.strip_suffix(".gz").unwrap_or(name);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// Point `link` at `target`, replacing whatever was there. Falls back to a
/// copy where symbolic links are unavailable.
///
/// The new link is made under a staging name and renamed over `link`, so
/// readers see either the old link or the new one.
pub fn link_or_copy(target: &Path, link: &Path) -> Result<()> {
    let name = link
        .file_name()
        .ok_or_else(|| P2IndexError::validation(format!("bad link path {}", link.display())))?;
    let staging = link.with_file_name(format!(
        ".{}.{}.tmp",
        name.to_string_lossy(),
        Uuid::now_v7()
    ));

    if let Err(e) = symlink(target, &staging) {
        debug!(link = %link.display(), error = %e, "symlink failed, copying");
        std::fs::copy(target, &staging).map_err(|e| P2IndexError::io(&staging, e))?;
    }
    std::fs::rename(&staging, link).map_err(|e| {
        let _ = std::fs::remove_file(&staging);
        P2IndexError::io(link, e)
    })
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "no symlinks"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_extensions() {
        let v = Version::parse("1.2.3.v2025").unwrap();
        assert_eq!(link_name("org.example.a", &v, "jar"), "org.example.a-1.2.3.v2025.jar");

        let ext = |s: &str| artifact_extension(&Url::parse(s).unwrap());
        assert_eq!(ext("https://e.com/plugins/a_1.0.jar"), "jar");
        assert_eq!(ext("https://e.com/plugins/a_1.0.jar.gz"), "jar");
        assert_eq!(ext("https://e.com/binary/a_1.0.ZIP"), "zip");
        assert_eq!(ext("https://e.com/download?id=5"), "jar");
    }

    #[test]
    fn relinking_replaces_previous_link() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::write(&first, b"1").unwrap();
        std::fs::write(&second, b"2").unwrap();
        let link = dir.path().join("a-1.0.0.jar");

        link_or_copy(&first, &link).unwrap();
        assert_eq!(std::fs::read(&link).unwrap(), b"1");
        link_or_copy(&second, &link).unwrap();
        assert_eq!(std::fs::read(&link).unwrap(), b"2");
    }

    #[test]
    fn link_stays_readable_while_relinking() {
        let dir = tempfile::tempdir().unwrap();
        let targets: Vec<_> = (0..2)
            .map(|i| {
                let path = dir.path().join(format!("target-{i}"));
                std::fs::write(&path, b"payload").unwrap();
                path
            })
            .collect();
        let link = dir.path().join("a-1.0.0.jar");
        link_or_copy(&targets[0], &link).unwrap();

        std::thread::scope(|scope| {
            for target in &targets {
                let link = &link;
                scope.spawn(move || {
                    for _ in 0..200 {
                        link_or_copy(target, link).unwrap();
                    }
                });
            }
            for _ in 0..400 {
                assert_eq!(std::fs::read(&link).unwrap(), b"payload");
            }
        });

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }
}
