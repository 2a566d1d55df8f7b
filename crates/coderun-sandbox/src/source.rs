//! Temporary source files

use crate::error::{Error, Result};
use std::io::Write;
use tempfile::TempPath;

/// Write `code` to a uniquely named temporary file
///
/// The file is deleted when the returned path is closed or dropped.
pub(crate) fn write_source(code: &str, suffix: &str) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("coderun-")
        .suffix(suffix)
        .tempfile()
        .map_err(|e| Error::Resource(format!("could not create source file: {}", e)))?;
    file.write_all(code.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| Error::Resource(format!("could not write source file: {}", e)))?;
    Ok(file.into_temp_path())
}
