use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;

use crate::error::{HostError, Result};

/// Read the entry script as raw bytes
pub fn load_source(path: &Path) -> Result<Vec<u8>> {
    let source = fs::read(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => HostError::SourceNotFound {
            path: path.to_path_buf(),
        },
        _ => HostError::SourceRead {
            path: path.to_path_buf(),
            source,
        },
    })?;
    debug!(target: "host", "loaded {} ({} bytes)", path.display(), source.len());
    Ok(source)
}
