//! Artifact downloads for p2index.
//!
//! - [`Transport`] / [`HttpTransport`]: raw downloads through a TTL cache
//! - [`fetch_verified`]: retry state machine with checksum/size verification
//! - [`UnpackerRegistry`]: raw download → canonical file
//! - [`link_or_copy`]: canonical `<id>-<version>.<ext>` links

pub mod link;
pub mod retry;
pub mod transport;
pub mod unpack;
pub mod verify;

pub use link::{artifact_extension, link_name, link_or_copy};
pub use retry::{FetchState, RetryPolicy, fetch_verified};
pub use transport::{Download, DownloadState, HttpTransport, Transport};
pub use unpack::{GzipUnpacker, PassthroughUnpacker, Unpacker, UnpackerRegistry};
pub use verify::{checksum_matches, md5_hex, verify_download};
