use std::io;
use std::path::{Path, PathBuf};

use paxd_core::{PackageManifest, FIRSTRUN_MARKER, UPDATERUN_MARKER};

use crate::staging::StagingJournal;
use crate::types::MarkerState;

/// Marker due after this install event, with the state it moves the record to.
pub(crate) fn pending_marker(
    manifest: &PackageManifest,
    is_update: bool,
) -> Option<(&'static str, MarkerState)> {
    match (is_update, manifest.install.firstrun, manifest.install.updaterun) {
        (false, true, _) => Some((FIRSTRUN_MARKER, MarkerState::FirstrunDone)),
        (true, _, true) => Some((UPDATERUN_MARKER, MarkerState::UpdaterunDone)),
        _ => None,
    }
}

/// Creates an empty marker file in the install root, journaled so a failed
/// attempt removes it again.
pub(crate) fn write_marker(
    journal: &mut StagingJournal,
    install_root: &Path,
    marker: &str,
) -> io::Result<PathBuf> {
    let path = install_root.join(marker);
    journal.create_empty(&path)?;
    Ok(path)
}
