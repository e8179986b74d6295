//! Log position tracking with rotation and truncation detection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info};

/// How many leading bytes of the log are remembered to recognize the file
/// across passes.
const HEAD_PROBE_LEN: usize = 64;

/// Identity fingerprint of a log file, used to detect rotation.
///
/// Device and inode alone are not enough: an unlink-and-recreate rotation can
/// hand the replacement file the old inode number. The creation time tells
/// the two apart where the filesystem reports one; it is stable under
/// appends, unlike mtime or ctime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Device the file lives on.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
    /// Birth time, where the filesystem provides one.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl FileIdentity {
    fn of(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            created: meta.created().ok().map(DateTime::<Utc>::from),
        }
    }
}

/// Durable read position within the log.
///
/// `offset` is monotonically non-decreasing as long as `identity` is stable;
/// an identity change resets it to zero. `head` remembers the file's leading
/// bytes so a replacement file that recycles the old identity is still
/// recognized as new content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCursor {
    /// Byte offset last fully consumed.
    #[serde(default)]
    pub offset: u64,

    /// Identity of the file the offset refers to. `None` until the first
    /// successful pass.
    #[serde(default)]
    pub identity: Option<FileIdentity>,

    /// Leading bytes of the file the offset refers to.
    #[serde(default)]
    pub head: Vec<u8>,
}

/// The log source could not be opened or read.
///
/// Expected to self-heal on a later scheduled run; the pass is skipped
/// without mutating any state.
#[derive(Debug)]
pub struct SourceUnavailable(pub io::Error);

impl std::fmt::Display for SourceUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "log source unavailable: {}", self.0)
    }
}

impl std::error::Error for SourceUnavailable {}

/// Read everything the cursor has not yet consumed.
///
/// Returns the newly available bytes and the advanced cursor. If the file
/// identity changed since the cursor was written (rotation), the file is
/// shorter than the recorded offset (in-place truncation), or the leading
/// bytes no longer match the remembered head (replacement under a recycled
/// identity), the whole current file is treated as new. Data left unread in
/// a rotated-away file is considered lost; re-processing after a spurious
/// reset is harmless because rule creation is idempotent per IP.
pub fn advance(path: &Path, cursor: &LogCursor) -> Result<(Vec<u8>, LogCursor), SourceUnavailable> {
    let mut file = File::open(path).map_err(SourceUnavailable)?;
    let meta = file.metadata().map_err(SourceUnavailable)?;
    let identity = FileIdentity::of(&meta);

    let start = resolve_start(path, &mut file, &meta, cursor, &identity).map_err(SourceUnavailable)?;

    let head = read_head(&mut file).map_err(SourceUnavailable)?;

    file.seek(SeekFrom::Start(start)).map_err(SourceUnavailable)?;
    let mut bytes = Vec::with_capacity(meta.len().saturating_sub(start) as usize);
    file.read_to_end(&mut bytes).map_err(SourceUnavailable)?;

    let advanced = LogCursor {
        offset: start + bytes.len() as u64,
        identity: Some(identity),
        head,
    };

    debug!(
        path = %path.display(),
        from = start,
        to = advanced.offset,
        "log cursor advanced"
    );

    Ok((bytes, advanced))
}

/// Decide where reading begins: the saved offset if the cursor still refers
/// to this file, else zero.
fn resolve_start(
    path: &Path,
    file: &mut File,
    meta: &std::fs::Metadata,
    cursor: &LogCursor,
    identity: &FileIdentity,
) -> io::Result<u64> {
    let prev = match cursor.identity {
        Some(prev) => prev,
        None => return Ok(0),
    };

    if prev != *identity {
        info!(path = %path.display(), "log rotation detected, reading from start");
        return Ok(0);
    }

    if meta.len() < cursor.offset {
        info!(
            path = %path.display(),
            offset = cursor.offset,
            len = meta.len(),
            "log truncated, resetting offset"
        );
        return Ok(0);
    }

    if !cursor.head.is_empty() {
        let mut current = vec![0u8; cursor.head.len()];
        file.seek(SeekFrom::Start(0))?;
        match file.read_exact(&mut current) {
            Ok(()) if current == cursor.head => {}
            Ok(()) => {
                info!(
                    path = %path.display(),
                    "log replaced under a recycled identity, reading from start"
                );
                return Ok(0);
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!(path = %path.display(), "log shrank below its remembered head, reading from start");
                return Ok(0);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(cursor.offset)
}

/// Capture the file's leading bytes.
fn read_head(file: &mut File) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(HEAD_PROBE_LEN);
    file.seek(SeekFrom::Start(0))?;
    file.take(HEAD_PROBE_LEN as u64).read_to_end(&mut head)?;
    Ok(head)
}
