//! Polling the native downloader's directory for a matching artifact

use crate::error::{AcquisitionError, Error, Result};
use crate::name_matcher::{NameMatch, NameMatcher, names_match};
use crate::retry::sleep_or_cancel;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Artifacts already accepted by some task
#[derive(Debug, Default)]
pub(crate) struct Claims {
    paths: Mutex<HashSet<PathBuf>>,
}

impl Claims {
    /// Claim `path`; `false` if another task holds it
    pub(crate) fn claim(&self, path: &Path) -> bool {
        self.lock().insert(path.to_path_buf())
    }

    pub(crate) fn release(&self, path: &Path) {
        self.lock().remove(path);
    }

    pub(crate) fn is_claimed(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One observation made while watching
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct WatchTick {
    /// Time since watching started
    pub elapsed: Duration,
    /// Size of a provisional artifact belonging to the expected name, if any
    pub provisional_bytes: Option<u64>,
}

/// Names of visible regular files in `dir`
pub(crate) async fn snapshot(dir: &Path) -> Result<HashSet<String>> {
    Ok(list_files(dir)
        .await?
        .into_iter()
        .map(|(name, _)| name)
        .collect())
}

/// Visible regular files in `dir` with their sizes, sorted by name
async fn list_files(dir: &Path) -> Result<Vec<(String, u64)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        // The entry may vanish between listing and stat (renames in progress)
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if meta.is_file() {
            files.push((name, meta.len()));
        }
    }
    files.sort();
    Ok(files)
}

/// Directory watcher for one expected name
pub(crate) struct Watcher<'a> {
    pub dir: &'a Path,
    pub matcher: &'a NameMatcher,
    pub claims: &'a Claims,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
}

impl Watcher<'_> {
    /// Poll until a finished artifact matching `expected` appears and claim it
    ///
    /// Files named in `baseline` (present before the trigger) and files claimed
    /// by other tasks are ignored. `on_tick` runs after every poll without a match.
    pub(crate) async fn wait_for(
        &self,
        expected: &str,
        baseline: &HashSet<String>,
        mut on_tick: impl FnMut(WatchTick),
    ) -> Result<PathBuf> {
        let started = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut files = list_files(self.dir).await?;
            // Exact names first, so "Report.pdf" wins over "Report (1).pdf"
            files.sort_by_key(|(name, _)| !name.eq_ignore_ascii_case(expected));

            let mut provisional_bytes = None;
            for (name, len) in files {
                if baseline.contains(&name) {
                    continue;
                }
                match self.matcher.match_name(&name, expected) {
                    NameMatch::Final => {
                        let path = self.dir.join(&name);
                        if self.claims.claim(&path) {
                            tracing::debug!(file = %name, expected, "matched artifact");
                            return Ok(path);
                        }
                    }
                    NameMatch::Provisional => {
                        let ours = self
                            .matcher
                            .strip_provisional(&name)
                            .is_some_and(|stripped| names_match(stripped, expected));
                        if ours {
                            provisional_bytes = Some(provisional_bytes.unwrap_or(0).max(len));
                        }
                    }
                    NameMatch::Mismatch => {}
                }
            }

            let elapsed = started.elapsed();
            on_tick(WatchTick {
                elapsed,
                provisional_bytes,
            });

            if elapsed >= self.timeout {
                return Err(AcquisitionError::MatchTimeout {
                    name: expected.to_string(),
                    waited_secs: elapsed.as_secs(),
                }
                .into());
            }

            sleep_or_cancel(self.poll_interval, self.cancel).await?;
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn watcher<'a>(
        dir: &'a Path,
        matcher: &'a NameMatcher,
        claims: &'a Claims,
        cancel: &'a CancellationToken,
    ) -> Watcher<'a> {
        Watcher {
            dir,
            matcher,
            claims,
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(300),
            cancel,
        }
    }

    #[tokio::test]
    async fn ignores_baseline_and_finds_new_fuzzy_match() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("archive_part1.rar"), "old").unwrap();
        let baseline = snapshot(dir.path()).await.unwrap();

        let path = dir.path().to_path_buf();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            std::fs::write(path.join("archive_part1 (1).rar"), "new").unwrap();
        });

        let (matcher, claims, cancel) = (
            NameMatcher::default(),
            Claims::default(),
            CancellationToken::new(),
        );
        let found = watcher(dir.path(), &matcher, &claims, &cancel)
            .wait_for("Big\u{2026}File_part1.rar", &baseline, |_| {})
            .await
            .unwrap();
        assert_eq!(found, dir.path().join("archive_part1 (1).rar"));
        assert!(claims.is_claimed(&found));
    }

    #[tokio::test]
    async fn reports_provisional_progress_then_matches() {
        let dir = TempDir::new().unwrap();
        let baseline = snapshot(dir.path()).await.unwrap();
        let path = dir.path().to_path_buf();
        tokio::spawn(async move {
            std::fs::write(path.join("data.zip.crdownload"), vec![0u8; 10]).unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
            std::fs::rename(path.join("data.zip.crdownload"), path.join("data.zip")).unwrap();
        });

        let (matcher, claims, cancel) = (
            NameMatcher::default(),
            Claims::default(),
            CancellationToken::new(),
        );
        let mut ticks = Vec::new();
        let found = watcher(dir.path(), &matcher, &claims, &cancel)
            .wait_for("data.zip", &baseline, |t| ticks.push(t))
            .await
            .unwrap();

        assert_eq!(found.file_name().unwrap(), "data.zip");
        assert!(ticks.iter().any(|t| t.provisional_bytes == Some(10)));
    }

    #[tokio::test]
    async fn claimed_artifacts_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.zip"), "x").unwrap();
        let (matcher, claims, cancel) = (
            NameMatcher::default(),
            Claims::default(),
            CancellationToken::new(),
        );
        claims.claim(&dir.path().join("a.zip"));

        let err = watcher(dir.path(), &matcher, &claims, &cancel)
            .wait_for("a.zip", &HashSet::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Acquisition(AcquisitionError::MatchTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_watching() {
        let dir = TempDir::new().unwrap();
        let (matcher, claims, cancel) = (
            NameMatcher::default(),
            Claims::default(),
            CancellationToken::new(),
        );
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = watcher(dir.path(), &matcher, &claims, &cancel)
            .wait_for("never.zip", &HashSet::new(), |_| {})
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn hidden_files_are_invisible() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".a.zip.partial"), "x").unwrap();
        std::fs::write(dir.path().join("b.zip"), "x").unwrap();
        let names = snapshot(dir.path()).await.unwrap();
        assert_eq!(names.len(), 1);
        assert!(names.contains("b.zip"));
    }
}
