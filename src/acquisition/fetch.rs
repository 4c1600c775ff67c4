//! Direct HTTP fetch for inline media with a plain source URL
//!
//! The body is streamed into `<name><provisional suffix>` inside the download
//! directory and renamed on completion, so the file goes through the same
//! watch-and-match path as a native download.

use crate::error::{AcquisitionError, Error, Result};
use crate::utils::get_unique_path;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Whether `url` can be fetched directly
pub(crate) fn is_fetchable(url: &str) -> bool {
    url::Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// Download `url` into `dir/name`
pub(crate) async fn fetch_into(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
    name: &str,
    provisional_suffix: &str,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let mut response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AcquisitionError::Fetch {
            url: url.to_string(),
            reason: format!("HTTP {status}"),
        }
        .into());
    }

    let provisional = get_unique_path(&dir.join(format!("{name}{provisional_suffix}")))?;
    let mut file = tokio::fs::File::create(&provisional).await?;

    let outcome: Result<()> = async {
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = response.chunk() => chunk?,
            };
            match chunk {
                Some(bytes) => file.write_all(&bytes).await?,
                None => break,
            }
        }
        file.flush().await?;
        Ok(())
    }
    .await;
    drop(file);

    if let Err(e) = outcome {
        if let Err(rm) = tokio::fs::remove_file(&provisional).await {
            tracing::warn!(
                error = %rm,
                path = %provisional.display(),
                "could not remove partial fetch"
            );
        }
        return Err(e);
    }

    let dest = get_unique_path(&dir.join(name))?;
    tokio::fs::rename(&provisional, &dest).await?;
    tracing::debug!(url, dest = %dest.display(), "fetched media");
    Ok(dest)
}
