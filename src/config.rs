//! Configuration types for feed-harvest

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// CSS-like selectors used to read the rendered feed
///
/// The core never assumes a markup vocabulary; everything it looks for on the
/// rendering surface is named here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// One element per rendered message bubble (default: ".message")
    #[serde(default = "default_message_selector")]
    pub message: String,

    /// Text-bearing content inside a message (default: ".text-content")
    #[serde(default = "default_text_selector")]
    pub text: String,

    /// Document attachment container (default: ".document")
    #[serde(default = "default_document_selector")]
    pub document: String,

    /// File name element, sibling inside the document container
    #[serde(default = "default_document_name_selector")]
    pub document_name: String,

    /// File size element, sibling inside the document container
    #[serde(default = "default_document_size_selector")]
    pub document_size: String,

    /// File type element, sibling inside the document container
    #[serde(default = "default_document_type_selector")]
    pub document_type: String,

    /// Control that starts the native download; the container itself is
    /// clicked when nothing matches
    #[serde(default = "default_document_download_selector")]
    pub document_download: String,

    /// Inline media element (default: "img.media-photo")
    #[serde(default = "default_media_selector")]
    pub media: String,

    /// Link anchors (default: "a[href]")
    #[serde(default = "default_link_selector")]
    pub link: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            message: default_message_selector(),
            text: default_text_selector(),
            document: default_document_selector(),
            document_name: default_document_name_selector(),
            document_size: default_document_size_selector(),
            document_type: default_document_type_selector(),
            document_download: default_document_download_selector(),
            media: default_media_selector(),
            link: default_link_selector(),
        }
    }
}

/// Direction in which older content is revealed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    /// Older messages are above (chat-style feeds, default)
    #[default]
    Up,
    /// Older messages are below (timeline-style feeds)
    Down,
}

/// Viewport pagination settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrollConfig {
    /// Which way to scroll to reveal more content
    #[serde(default)]
    pub direction: ScrollDirection,

    /// Delay after each scroll step before re-querying (default: 400 ms)
    #[serde(default = "default_settle_interval", with = "duration_ms_serde")]
    pub settle_interval: Duration,

    /// Consecutive no-progress cycles before probing for the end (default: 3)
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            direction: ScrollDirection::default(),
            settle_interval: default_settle_interval(),
            stall_threshold: default_stall_threshold(),
        }
    }
}

/// Text and link extraction settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Boilerplate words removed from body lines (whole words, case-sensitive)
    #[serde(default = "default_boilerplate_words")]
    pub boilerplate_words: Vec<String>,

    /// URL schemes that point back into the client itself and are never archived
    #[serde(default = "default_internal_schemes")]
    pub internal_schemes: Vec<String>,

    /// Base URL used to resolve relative hrefs (relative links are dropped if None)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Extension for synthesized media names when the source URL has none
    #[serde(default = "default_media_extension")]
    pub default_media_extension: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            boilerplate_words: default_boilerplate_words(),
            internal_schemes: default_internal_schemes(),
            base_url: None,
            default_media_extension: default_media_extension(),
        }
    }
}

/// Retry configuration for failed download tasks
///
/// Backoff is linear: the n-th retry waits `n * base_delay`, capped at `max_delay`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay multiplied by the retry count (default: 2 seconds)
    #[serde(default = "default_base_delay", with = "duration_ms_serde")]
    pub base_delay: Duration,

    /// Upper bound for a single backoff wait (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

/// File acquisition settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Directory the native downloader writes into (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent downloads (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// How often the download directory is polled (default: 500 ms)
    #[serde(default = "default_poll_interval", with = "duration_ms_serde")]
    pub poll_interval: Duration,

    /// Ceiling for a single watch phase (default: 30 minutes)
    #[serde(default = "default_watch_timeout", with = "duration_ms_serde")]
    pub watch_timeout: Duration,

    /// Attempts made against a locked artifact before giving up (default: 5)
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,

    /// Delay between attempts against a locked artifact (default: 200 ms)
    #[serde(default = "default_lock_retry_delay", with = "duration_ms_serde")]
    pub lock_retry_delay: Duration,

    /// Suffixes the native downloader uses for in-progress files
    #[serde(default = "default_provisional_suffixes")]
    pub provisional_suffixes: Vec<String>,

    /// Timeout for inline media HTTP fetches (default: 60 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_ms_serde")]
    pub fetch_timeout: Duration,

    /// Retry policy for failed tasks
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            poll_interval: default_poll_interval(),
            watch_timeout: default_watch_timeout(),
            lock_retries: default_lock_retries(),
            lock_retry_delay: default_lock_retry_delay(),
            provisional_suffixes: default_provisional_suffixes(),
            fetch_timeout: default_fetch_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Output archive layout settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for message folders (default: "./harvest")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum length of the sanitized title part of a folder name (default: 80)
    #[serde(default = "default_max_folder_name_len")]
    pub max_folder_name_len: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_folder_name_len: default_max_folder_name_len(),
        }
    }
}

/// Duplicate suppression settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Number of message ids remembered (default: 10 000)
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: default_dedup_capacity(),
        }
    }
}

/// Main configuration for a harvesting [`Pipeline`](crate::Pipeline)
///
/// Fields are organized into logical sub-configs:
/// - [`selectors`](SelectorConfig): how the feed is read
/// - [`scroll`](ScrollConfig): pagination pacing and exhaustion
/// - [`extraction`](ExtractionConfig): text cleaning and link filtering
/// - [`acquisition`](AcquisitionConfig): concurrency, polling, retries
/// - [`output`](OutputConfig): archive location and folder naming
/// - [`dedup`](DedupConfig): duplicate suppression
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Feed selectors
    #[serde(default)]
    pub selectors: SelectorConfig,

    /// Scroll driver settings
    #[serde(default)]
    pub scroll: ScrollConfig,

    /// Extraction settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Acquisition settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Output layout settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Dedup settings
    #[serde(default)]
    pub dedup: DedupConfig,
}

impl Config {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.acquisition.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "acquisition.max_concurrent_downloads",
                "must be at least 1",
            ));
        }
        if self.acquisition.poll_interval.is_zero() {
            return Err(Error::config(
                "acquisition.poll_interval",
                "must be greater than zero",
            ));
        }
        if self.acquisition.watch_timeout < self.acquisition.poll_interval {
            return Err(Error::config(
                "acquisition.watch_timeout",
                "must not be shorter than the poll interval",
            ));
        }
        if self.acquisition.provisional_suffixes.iter().any(|s| s.is_empty()) {
            return Err(Error::config(
                "acquisition.provisional_suffixes",
                "suffixes must not be empty",
            ));
        }
        if self.scroll.stall_threshold == 0 {
            return Err(Error::config("scroll.stall_threshold", "must be at least 1"));
        }
        if self.dedup.capacity == 0 {
            return Err(Error::config("dedup.capacity", "must be at least 1"));
        }
        if self.output.max_folder_name_len < 8 {
            return Err(Error::config(
                "output.max_folder_name_len",
                "must be at least 8 characters",
            ));
        }
        if let Some(base) = &self.extraction.base_url {
            url::Url::parse(base).map_err(|e| {
                Error::config("extraction.base_url", format!("invalid URL '{base}': {e}"))
            })?;
        }
        let selectors = [
            ("selectors.message", &self.selectors.message),
            ("selectors.text", &self.selectors.text),
            ("selectors.document", &self.selectors.document),
            ("selectors.media", &self.selectors.media),
            ("selectors.link", &self.selectors.link),
        ];
        for (key, value) in selectors {
            if value.trim().is_empty() {
                return Err(Error::config(key, "selector must not be empty"));
            }
        }
        Ok(())
    }

    /// Native downloader directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.acquisition.download_dir
    }

    /// Archive root
    pub fn output_dir(&self) -> &PathBuf {
        &self.output.output_dir
    }
}

fn default_message_selector() -> String {
    ".message".to_string()
}

fn default_text_selector() -> String {
    ".text-content".to_string()
}

fn default_document_selector() -> String {
    ".document".to_string()
}

fn default_document_name_selector() -> String {
    ".document-name".to_string()
}

fn default_document_size_selector() -> String {
    ".document-size".to_string()
}

fn default_document_type_selector() -> String {
    ".document-type".to_string()
}

fn default_document_download_selector() -> String {
    ".document-download".to_string()
}

fn default_media_selector() -> String {
    "img.media-photo".to_string()
}

fn default_link_selector() -> String {
    "a[href]".to_string()
}

fn default_settle_interval() -> Duration {
    Duration::from_millis(400)
}

fn default_stall_threshold() -> u32 {
    3
}

fn default_boilerplate_words() -> Vec<String> {
    [
        "NEW", "OVERVIEW", "Tutorial", "FREE", "DOWNLOAD", "Download", "UPDATED", "LINK",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_internal_schemes() -> Vec<String> {
    vec!["tg".to_string(), "about".to_string(), "blob".to_string()]
}

fn default_media_extension() -> String {
    "jpg".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_watch_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_lock_retries() -> u32 {
    5
}

fn default_lock_retry_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_provisional_suffixes() -> Vec<String> {
    [".crdownload", ".part", ".download", ".tmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./harvest")
}

fn default_max_folder_name_len() -> usize {
    80
}

fn default_dedup_capacity() -> usize {
    10_000
}

// Duration serialization helper (integer milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
