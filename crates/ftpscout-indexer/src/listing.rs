//! Unix LIST output parsing
//!
//! FTP has no standard listing format; in practice anonymous servers speak
//! the unix `ls -l` dialect, sometimes without the group column. Lines are
//! parsed as raw bytes because file names arrive in whatever encoding the
//! server happens to use; the [`FallbackDecoder`] tries UTF-8 first and
//! falls back to latin-9, keeping its state for the rest of the walk so a
//! legacy server is not re-probed on every name.

use std::sync::LazyLock;

use encoding_rs::{ISO_8859_15, UTF_8};
use regex::bytes::Regex;
use thiserror::Error;

/// `<mode> <links> <user> [<group>] <size> <month> <day> <time-or-year> <name>`
///
/// Exactly one separator before the name, so leading and embedded spaces in
/// file names survive. The group column is optional; some servers omit it.
static LIST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x-u)
        ^([a-z-]{10})                       # mode
        \s+[0-9]+                           # link count
        \s+(\S+)                            # user
        (?:\s+(\S+))??                      # group (may be absent)
        \s+([0-9]+)                         # size in bytes
        \s+([A-Za-z]+\ +[0-9]{1,2}\s+[0-9:]+)  # month day time-or-year
        \s(.+)$                             # name, spaces preserved
        ",
    )
    .expect("LIST grammar regex is valid")
});

#[derive(Error, Debug)]
pub enum ListingError {
    /// The line does not follow the unix LIST grammar. Fatal for the walk.
    #[error("unrecognized LIST line: {0:?}")]
    BadLine(String),

    /// Every known encoding failed on a file name. Fatal for the walk.
    #[error("file name undecodable with any known encoding")]
    EncodingExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Utf8,
    Latin9,
    Exhausted,
}

/// Stateful name decoder with an ordered preference list.
///
/// One instance lives for a whole walk: once a decode failure demotes it to
/// latin-9, every later name is decoded as latin-9 too.
#[derive(Debug)]
pub struct FallbackDecoder {
    state: DecoderState,
}

impl Default for FallbackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Utf8,
        }
    }

    /// Decode `bytes`, advancing to the next encoding on failure. Returns
    /// [`ListingError::EncodingExhausted`] once every encoding was rejected.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<String, ListingError> {
        loop {
            let encoding = match self.state {
                DecoderState::Utf8 => UTF_8,
                DecoderState::Latin9 => ISO_8859_15,
                DecoderState::Exhausted => return Err(ListingError::EncodingExhausted),
            };
            match encoding.decode_without_bom_handling_and_without_replacement(bytes) {
                Some(decoded) => return Ok(decoded.into_owned()),
                None => {
                    self.state = match self.state {
                        DecoderState::Utf8 => DecoderState::Latin9,
                        _ => DecoderState::Exhausted,
                    };
                },
            }
        }
    }
}

/// One parsed LIST entry. Transient: consumed by the walker and the
/// reconciler, never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Name bytes exactly as the server sent them; recursion issues LIST
    /// against these to avoid re-encoding round trips.
    pub raw_name: Vec<u8>,

    /// Decoded name, the form stored in the catalog.
    pub name: String,

    pub is_directory: bool,
    pub is_link: bool,

    /// Size reported by LIST. For directories the walker replaces this with
    /// the recursive sum of descendant file sizes.
    pub size: u64,
}

impl RemoteEntry {
    /// Parse one raw LIST line.
    ///
    /// `decoder` is the walk-scoped [`FallbackDecoder`]; a line that does
    /// not match the grammar is a fatal parse error.
    pub fn parse(line: &[u8], decoder: &mut FallbackDecoder) -> Result<Self, ListingError> {
        let captures = LIST_LINE
            .captures(line)
            .ok_or_else(|| ListingError::BadLine(String::from_utf8_lossy(line).into_owned()))?;

        let mode = &captures[1];
        let raw_name = captures
            .get(6)
            .map(|m| m.as_bytes().to_vec())
            .unwrap_or_default();

        let size: u64 = std::str::from_utf8(&captures[4])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ListingError::BadLine(String::from_utf8_lossy(line).into_owned()))?;

        let name = decoder.decode(&raw_name)?;

        Ok(Self {
            name,
            is_directory: mode[0] == b'd',
            is_link: mode[0] == b'l',
            size,
            raw_name,
        })
    }
}
