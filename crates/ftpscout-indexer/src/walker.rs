//! Recursive FTP tree walk
//!
//! Depth-first traversal of a server's directory tree. Each directory is
//! LISTed once; subdirectories are walked before their entry is reported, so
//! a directory's size can be the recursive sum of the files below it (the
//! size LIST reports for a directory is meaningless and discarded).
//! Symbolic links are skipped entirely, which is also what breaks cycles.
//!
//! The walk is lazy: entries are handed to the sink as each LIST completes
//! and nothing above the current path is buffered, so memory stays
//! proportional to tree depth and a runaway server is cut off early.

use thiserror::Error;
use tracing::trace;

use crate::ftp::{FtpError, FtpSession};
use crate::listing::{FallbackDecoder, ListingError, RemoteEntry};

/// Deeper trees than this are assumed to be loops or deliberate tarpits.
pub const MAX_DEPTH: usize = 500;

#[derive(Error, Debug)]
pub enum WalkError {
    /// The tree tripped a depth or file-count guard; abandon the server.
    #[error("suspicious FTP tree: {0}")]
    SuspiciousFtp(String),

    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error(transparent)]
    Transport(#[from] FtpError),
}

/// Where LIST lines come from. The walk only needs this one operation, and
/// the seam lets tests feed scripted trees without a server.
pub trait ListSource {
    fn list(&mut self, raw_path: &[u8]) -> Result<Vec<Vec<u8>>, FtpError>;
}

impl ListSource for FtpSession {
    fn list(&mut self, raw_path: &[u8]) -> Result<Vec<Vec<u8>>, FtpError> {
        FtpSession::list(self, raw_path)
    }
}

/// Depth-first walker over one FTP server.
pub struct Walker<'a, S: ListSource> {
    source: &'a mut S,
    decoder: FallbackDecoder,
    max_depth: usize,
}

impl<'a, S: ListSource> Walker<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self {
            source,
            decoder: FallbackDecoder::new(),
            max_depth: MAX_DEPTH,
        }
    }

    /// Walk the whole tree from `/`, feeding every non-link entry to `sink`
    /// as `(parent_path, entry)`. The parent path is in catalog form: empty
    /// string for the root, `/sub/dir` below it. Returns the sum of plain
    /// file sizes over the whole tree.
    pub fn walk<F>(mut self, sink: &mut F) -> Result<u64, WalkError>
    where
        F: FnMut(&str, RemoteEntry) -> Result<(), WalkError>,
    {
        self.walk_dir(b"/", 0, sink)
    }

    fn walk_dir<F>(
        &mut self,
        raw_path: &[u8],
        depth: usize,
        sink: &mut F,
    ) -> Result<u64, WalkError>
    where
        F: FnMut(&str, RemoteEntry) -> Result<(), WalkError>,
    {
        if depth > self.max_depth {
            return Err(WalkError::SuspiciousFtp(format!(
                "directory depth exceeds {}",
                self.max_depth
            )));
        }

        // LIST against the raw server path; decoding it and re-encoding for
        // the wire would be ambiguous for legacy-encoded names.
        let lines = self.source.list(raw_path)?;
        trace!(
            path = %String::from_utf8_lossy(raw_path),
            entries = lines.len(),
            depth,
            "directory listed"
        );

        let mut entries = Vec::with_capacity(lines.len());
        for line in &lines {
            entries.push(RemoteEntry::parse(line, &mut self.decoder)?);
        }

        // FTP root is "/" but the catalog's root path is "".
        let parent = if raw_path == b"/" {
            String::new()
        } else {
            self.decoder.decode(raw_path)?
        };

        let mut total = 0u64;
        for mut entry in entries {
            if entry.is_link {
                continue;
            }
            if entry.is_directory {
                let mut child = if raw_path == b"/" {
                    Vec::with_capacity(1 + entry.raw_name.len())
                } else {
                    raw_path.to_vec()
                };
                child.push(b'/');
                child.extend_from_slice(&entry.raw_name);

                let subtree = self.walk_dir(&child, depth + 1, sink)?;
                entry.size = subtree;
                total += subtree;
                sink(&parent, entry)?;
            } else {
                total += entry.size;
                sink(&parent, entry)?;
            }
        }
        Ok(total)
    }
}
