//! Atomic file replacement for everything another process may read while we
//! write it (playlists, media-server config, credentials, markers).

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Sibling temp path in the same directory, so the final rename never
/// crosses a filesystem boundary.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

/// Write `data` to a temp file, fsync it, then rename it over `target`.
pub async fn write_atomic(target: &Path, data: &[u8]) -> std::io::Result<()> {
    replace(target, data, false).await
}

/// Like [`write_atomic`] but the file is only readable by the owner.
pub async fn write_atomic_private(target: &Path, data: &[u8]) -> std::io::Result<()> {
    replace(target, data, true).await
}

async fn replace(target: &Path, data: &[u8], private: bool) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_path_for(target);
    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        if private {
            restrict_permissions(&tmp).await?;
        }
        fs::rename(&tmp, target).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    } else {
        debug!(path = %target.display(), bytes = data.len(), "replaced file atomically");
    }
    result
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
