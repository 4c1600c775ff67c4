//! Moving a matched artifact into its message folder
//!
//! The artifact is copied into a hidden temporary file inside the folder,
//! renamed to its final (collision-free) name and only then removed from the
//! download directory. A reader of the message folder never sees a partial
//! file, and a failure at any step leaves the source untouched.

use crate::error::{AcquisitionError, Error, Result};
use crate::utils::get_unique_path;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lock-retry settings for filesystem operations on the artifact
#[derive(Clone, Copy, Debug)]
pub(crate) struct LockPolicy {
    pub retries: u32,
    pub delay: Duration,
}

enum IoFailure {
    Locked(u32),
    Other(std::io::Error),
}

/// Move `source` into `folder`, keeping its file name (suffixed on collision)
pub(crate) async fn relocate(source: &Path, folder: &Path, policy: LockPolicy) -> Result<PathBuf> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Other(format!("artifact has no file name: {}", source.display())))?;

    let dest = get_unique_path(&folder.join(name))?;
    let temp = get_unique_path(&folder.join(format!(".{name}.partial")))?;

    let failed = |reason: String| AcquisitionError::RelocationFailed {
        source_path: source.to_path_buf(),
        dest_path: dest.clone(),
        reason,
    };

    if let Err(failure) = with_lock_retries(policy, || tokio::fs::copy(source, &temp)).await {
        remove_quietly(&temp).await;
        return Err(match failure {
            IoFailure::Locked(attempts) => AcquisitionError::FileLocked {
                path: source.to_path_buf(),
                attempts,
            }
            .into(),
            IoFailure::Other(e) => failed(format!("copy failed: {e}")).into(),
        });
    }

    if let Err(e) = tokio::fs::rename(&temp, &dest).await {
        remove_quietly(&temp).await;
        return Err(failed(format!("rename failed: {e}")).into());
    }

    if let Err(failure) = with_lock_retries(policy, || tokio::fs::remove_file(source)).await {
        // Keep exactly one copy: undo the move and let the caller retry it
        remove_quietly(&dest).await;
        return Err(match failure {
            IoFailure::Locked(attempts) => AcquisitionError::FileLocked {
                path: source.to_path_buf(),
                attempts,
            }
            .into(),
            IoFailure::Other(e) => failed(format!("removing source failed: {e}")).into(),
        });
    }

    tracing::debug!(source = %source.display(), dest = %dest.display(), "relocated artifact");
    Ok(dest)
}

/// Run `op`, retrying while it fails with a lock/sharing error
async fn with_lock_retries<T, F, Fut>(
    policy: LockPolicy,
    mut op: F,
) -> std::result::Result<T, IoFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_lock_error(&e) => {
                if attempts > policy.retries {
                    return Err(IoFailure::Locked(attempts));
                }
                tracing::debug!(error = %e, attempt = attempts, "artifact locked, waiting");
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(IoFailure::Other(e)),
        }
    }
}

fn is_lock_error(e: &std::io::Error) -> bool {
    if matches!(
        e.kind(),
        std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::WouldBlock
    ) {
        return true;
    }
    #[cfg(windows)]
    {
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        matches!(e.raw_os_error(), Some(32 | 33))
    }
    #[cfg(not(windows))]
    {
        // EBUSY, ETXTBSY
        matches!(e.raw_os_error(), Some(16 | 26))
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %e, path = %path.display(), "could not remove file");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use walkdir::WalkDir;

    const POLICY: LockPolicy = LockPolicy {
        retries: 3,
        delay: Duration::from_millis(1),
    };

    #[tokio::test]
    async fn moves_file_and_removes_source() {
        let dir = TempDir::new().unwrap();
        let downloads = dir.path().join("downloads");
        let folder = dir.path().join("0001_msg");
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::create_dir_all(&folder).unwrap();
        let source = downloads.join("a.zip");
        std::fs::write(&source, "payload").unwrap();

        let dest = relocate(&source, &folder, POLICY).await.unwrap();

        assert_eq!(dest, folder.join("a.zip"));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "payload");
        assert!(!source.exists());
        let leftovers: Vec<_> = WalkDir::new(&folder)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn collision_gets_numeric_suffix() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("f");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("a.zip"), "first").unwrap();
        let source = dir.path().join("a.zip");
        std::fs::write(&source, "second").unwrap();

        let dest = relocate(&source, &folder, POLICY).await.unwrap();
        assert_eq!(dest, folder.join("a (1).zip"));
        assert_eq!(std::fs::read_to_string(folder.join("a.zip")).unwrap(), "first");
    }

    #[tokio::test]
    async fn missing_source_is_a_relocation_failure() {
        let dir = TempDir::new().unwrap();
        let err = relocate(&dir.path().join("gone.zip"), dir.path(), POLICY)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Acquisition(AcquisitionError::RelocationFailed { .. })
        ));
        assert!(!dir.path().join(".gone.zip.partial").exists());
    }

    #[tokio::test]
    async fn lock_errors_are_retried_until_released() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_lock_retries(POLICY, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "in use"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert!(matches!(result, Ok(7)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_lock_gives_up_after_retries() {
        let result: std::result::Result<(), _> = with_lock_retries(POLICY, || async {
            Err(std::io::Error::new(std::io::ErrorKind::WouldBlock, "in use"))
        })
        .await;
        assert!(matches!(result, Err(IoFailure::Locked(4))));
    }
}
