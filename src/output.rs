//! On-disk layout of harvested messages
//!
//! ```text
//! <output_dir>/
//!   0001_First message title/
//!     description.txt
//!     links.txt          (only when the message has links)
//!     <acquired attachments>
//!   0002_Another title/
//! ```

use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::types::MessageUnit;
use crate::utils::{get_unique_dir_path, sanitize_component};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// File holding title and body
pub const DESCRIPTION_FILE: &str = "description.txt";
/// File holding one link per line
pub const LINKS_FILE: &str = "links.txt";

/// Creates one folder per message unit
#[derive(Debug)]
pub struct OutputLayout {
    root: PathBuf,
    max_name_len: usize,
    sequence: AtomicU64,
}

impl OutputLayout {
    /// Layout rooted at `config.output_dir`
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            root: config.output_dir.clone(),
            max_name_len: config.max_folder_name_len,
            sequence: AtomicU64::new(0),
        }
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder name for the `sequence`-th unit titled `title`
    pub fn folder_name(&self, sequence: u64, title: &str) -> String {
        format!("{sequence:04}_{}", sanitize_component(title, self.max_name_len))
    }

    /// Create the unit's folder and write its metadata files
    ///
    /// Folder names are unique within the output root; a collision gets a
    /// ` (n)` suffix.
    pub async fn create_unit_folder(&self, unit: &MessageUnit) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let wanted = self.root.join(self.folder_name(sequence, &unit.title));

        let folder = loop {
            let candidate = get_unique_dir_path(&wanted)?;
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => break candidate,
                // Lost a race with another writer; pick the next free name
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        };

        let mut description = unit.text();
        description.push('\n');
        tokio::fs::write(folder.join(DESCRIPTION_FILE), description).await?;

        if !unit.links.is_empty() {
            let mut links = unit.links.join("\n");
            links.push('\n');
            tokio::fs::write(folder.join(LINKS_FILE), links).await?;
        }

        tracing::debug!(
            message_id = %unit.id,
            folder = %folder.display(),
            "created message folder"
        );
        Ok(folder)
    }
}
