//! Connection-file serialisation.
//!
//! The frontend collaborator discovers a kernel's ports and signing key by
//! reading `<runtime_dir>/kernel-<id>.json`. The file must exist before the
//! kernel reports `Running`; [`KernelManager`][crate::manager::KernelManager]
//! enforces that ordering. The format itself is owned by the collaborator —
//! [`ConnectionInfo`] mirrors it.
//!
//! Files carry the signing key, so on unix the runtime directory is created
//! `0o700` and the file `0o600`.

use std::fs;
use std::path::{Path, PathBuf};

use alcove_types::{AlcoveError, ConnectionInfo};
use tracing::{debug, warn};
use uuid::Uuid;

/// Path of the connection file for `kernel_id` under `runtime_dir`.
pub fn path_for(runtime_dir: &Path, kernel_id: Uuid) -> PathBuf {
    runtime_dir.join(format!("kernel-{kernel_id}.json"))
}

/// Write `info` for `kernel_id`, creating the runtime directory if needed.
/// Returns the path written.
pub fn write(
    runtime_dir: &Path,
    kernel_id: Uuid,
    info: &ConnectionInfo,
) -> Result<PathBuf, AlcoveError> {
    let path = path_for(runtime_dir, kernel_id);
    let file_error = |reason: String| AlcoveError::ConnectionFile {
        path: path.display().to_string(),
        reason,
    };

    fs::create_dir_all(runtime_dir)
        .map_err(|e| file_error(format!("could not create runtime dir: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(runtime_dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| file_error(format!("could not restrict runtime dir: {e}")))?;
    }

    let raw = serde_json::to_string_pretty(info)
        .map_err(|e| AlcoveError::Serialization(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| file_error(e.to_string()))?;
    }
    #[cfg(not(unix))]
    fs::write(&path, raw).map_err(|e| file_error(e.to_string()))?;

    debug!(path = %path.display(), "connection file written");
    Ok(path)
}

/// Best-effort removal; a file that is already gone is fine.
pub fn remove(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove connection file");
    }
}
