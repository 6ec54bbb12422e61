//! Extract stages: unpack a fetched archive into a target directory.
//!
//! Supports gzip-compressed and plain tarballs. Extraction failures are
//! never retried here; a corrupt archive has to be re-fetched.

use super::OperationOutcome;
use crate::errors::{ExtractionError, ForgeflowError};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::Path;
use tracing::debug;

pub(crate) fn run_extract(archive: &Path, dest: &Path) -> Result<OperationOutcome, ForgeflowError> {
    let file = File::open(archive)
        .map_err(|e| ExtractionError::new(archive, format!("cannot open archive: {e}")))?;

    std::fs::create_dir_all(dest)?;

    let name = archive.to_string_lossy();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        unpack(tar::Archive::new(GzDecoder::new(file)), archive, dest)?;
    } else if name.ends_with(".tar") {
        unpack(tar::Archive::new(file), archive, dest)?;
    } else {
        return Err(ExtractionError::new(
            archive,
            "unsupported archive format (expected .tar.gz, .tgz, or .tar)",
        )
        .into());
    }

    debug!(archive = %archive.display(), dest = %dest.display(), "archive extracted");
    Ok(OperationOutcome::logged(format!(
        "extracted {} -> {}",
        archive.display(),
        dest.display()
    )))
}

fn unpack<R: std::io::Read>(
    mut archive: tar::Archive<R>,
    path: &Path,
    dest: &Path,
) -> Result<(), ExtractionError> {
    archive
        .unpack(dest)
        .map_err(|e| ExtractionError::new(path, format!("corrupt or unreadable archive: {e}")))
}
