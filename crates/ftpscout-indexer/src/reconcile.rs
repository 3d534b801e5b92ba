//! Snapshot/catalog reconciliation
//!
//! Consumes a walk and diffs it against what the catalog currently holds for
//! the server, producing bulk-ready insert and delete lists. An entry that
//! changed is deleted and re-inserted rather than updated, so both sides of
//! the diff can be applied in bulk. Walking an unchanged server twice yields
//! an empty diff and leaves row identities alone.

use std::collections::HashMap;

use crate::catalog::{FileEntry, NewFileEntry};
use crate::listing::RemoteEntry;
use crate::walker::{ListSource, WalkError, Walker};

/// More entries than this on one server is assumed to be garbage or an
/// attack, not a mirror.
pub const MAX_FILES: u64 = 1_000_000;

/// Result of reconciling one walk against the persisted catalog.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Entries to bulk-insert.
    pub to_insert: Vec<NewFileEntry>,

    /// Ids of persisted entries to delete first.
    pub to_delete: Vec<i64>,

    /// Entries yielded by the walk (files and directories, links excluded).
    pub nb_files: u64,

    /// Sum of plain file sizes; becomes the server's `size`.
    pub total_size: u64,
}

/// Drive `walker` to completion, diffing every yielded entry against
/// `existing` (the catalog's full-path map for this server). Whatever is
/// left in the map afterwards no longer exists on the server and is staged
/// for deletion.
pub fn reconcile<S: ListSource>(
    walker: Walker<'_, S>,
    mut existing: HashMap<String, FileEntry>,
    max_files: u64,
) -> Result<ReconcileOutcome, WalkError> {
    let mut to_insert = Vec::new();
    let mut to_delete = Vec::new();
    let mut nb_files = 0u64;

    let total_size = walker.walk(&mut |path, entry| {
        nb_files += 1;
        if nb_files > max_files {
            return Err(WalkError::SuspiciousFtp(format!(
                "more than {max_files} entries"
            )));
        }

        let fullpath = format!("{}/{}", path, entry.name);
        match existing.remove(&fullpath) {
            None => to_insert.push(new_entry(path, &entry)),
            Some(known) => {
                if known.is_directory != entry.is_directory
                    || known.size != entry.size
                    || known.name != entry.name
                {
                    to_delete.push(known.id);
                    to_insert.push(new_entry(path, &entry));
                }
            },
        }
        Ok(())
    })?;

    // Entries the walk never visited are gone from the server.
    to_delete.extend(existing.into_values().map(|f| f.id));

    Ok(ReconcileOutcome {
        to_insert,
        to_delete,
        nb_files,
        total_size,
    })
}

fn new_entry(path: &str, entry: &RemoteEntry) -> NewFileEntry {
    NewFileEntry {
        path: path.to_string(),
        name: entry.name.clone(),
        is_directory: entry.is_directory,
        size: entry.size,
    }
}
