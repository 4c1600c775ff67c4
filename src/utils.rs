//! Utility functions for file operations and path manipulation

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Get a path that does not exist yet, appending ` (1)`, ` (2)`, ... on collision
///
/// `report.pdf` becomes `report (1).pdf`; see [`get_unique_dir_path`] for folders.
///
/// # Examples
///
/// ```
/// use feed_harvest::utils::get_unique_path;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/feed-harvest-doc-example/movie.mkv");
/// let unique = get_unique_path(path).unwrap();
/// // If movie.mkv exists, returns movie (1).mkv; if that exists too, movie (2).mkv, etc.
/// assert!(unique.starts_with("/tmp/feed-harvest-doc-example"));
/// ```
pub fn get_unique_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("cannot extract file stem of {}", path.display())))?;

    let extension = path.extension().and_then(|e| e.to_str());

    let parent = path.parent().ok_or_else(|| {
        Error::Other(format!(
            "cannot extract parent directory of {}",
            path.display()
        ))
    })?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let new_name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let new_path = parent.join(new_name);
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(Error::Other(format!(
        "could not find unique name for {} after {} attempts",
        path.display(),
        MAX_RENAME_ATTEMPTS
    )))
}

/// Like [`get_unique_path`] but never splits an extension off the name
///
/// Folder names built from titles often contain dots (`Release 1.2`).
pub fn get_unique_dir_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("cannot extract name of {}", path.display())))?;
    let parent = path.parent().ok_or_else(|| {
        Error::Other(format!(
            "cannot extract parent directory of {}",
            path.display()
        ))
    })?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let new_path = parent.join(format!("{} ({})", name, i));
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(Error::Other(format!(
        "could not find unique name for {} after {} attempts",
        path.display(),
        MAX_RENAME_ATTEMPTS
    )))
}

/// Make `input` safe as a single path component
///
/// Forbidden characters become `_`, runs of `_` collapse, leading/trailing
/// dots, spaces and underscores are trimmed, the result is capped at `max_len`
/// characters and Windows reserved names get a trailing `_`.
pub fn sanitize_component(input: &str, max_len: usize) -> String {
    let replaced: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();

    let mut compacted = String::with_capacity(replaced.len());
    let mut prev_underscore = false;
    for c in replaced.chars() {
        if c == '_' {
            if !prev_underscore {
                compacted.push(c);
            }
            prev_underscore = true;
        } else {
            compacted.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = compacted.trim_matches(&['_', ' ', '.'][..]);
    let mut name: String = trimmed.chars().take(max_len).collect();
    name = name.trim_end_matches(&['_', ' ', '.'][..]).to_string();
    if name.is_empty() {
        name = "untitled".to_string();
    }
    if is_reserved_windows_name(&name) {
        name.push('_');
    }
    name
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// Parse a rendered size like `"12.5 MB"`, `"900 KB"` or `"1,2 ГБ"` into bytes
///
/// Returns `None` for anything that is not a number followed by a known unit
/// (pixel dimensions such as `"1280x720"` included).
#[must_use]
pub fn parse_display_size(display: &str) -> Option<u64> {
    let trimmed = display.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    if number.is_empty() {
        return None;
    }
    let value: f64 = number.replace(',', ".").parse().ok()?;
    let multiplier: f64 = match unit.trim().to_lowercase().as_str() {
        "" | "b" | "bytes" | "б" => 1.0,
        "kb" | "kib" | "k" | "кб" => 1024.0,
        "mb" | "mib" | "m" | "мб" => 1024.0 * 1024.0,
        "gb" | "gib" | "g" | "гб" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}
