//! Matching downloaded filenames against expected attachment names
//!
//! The native downloader and the feed UI each abbreviate or localize names on
//! their own, so an on-disk artifact rarely carries exactly the name that was
//! rendered. Rules, applied in order:
//!
//! 1. a candidate with an in-progress suffix is a provisional match (progress only)
//! 2. extensions must agree, case-insensitively
//! 3. when both names encode a `partN` number, differing numbers never match and
//!    equal numbers always do
//! 4. base names equal case-insensitively, or the candidate fits around the
//!    truncation marker of the expected name
//! 5. fallback: either normalized base name contains the other

use regex::Regex;
use std::sync::LazyLock;

/// Markers the feed UI inserts when it shortens a name
const TRUNCATION_MARKERS: &[&str] = &["\u{2026}", "..."];

static PART_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)part\s*0*(\d+)").expect("part number pattern is valid")
});

/// Outcome of comparing one candidate against one expected name
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameMatch {
    /// Finished artifact that corresponds to the expected name
    Final,
    /// In-progress artifact; usable for progress display only
    Provisional,
    /// Unrelated file
    Mismatch,
}

/// Filename matcher configured with the downloader's in-progress suffixes
#[derive(Clone, Debug)]
pub struct NameMatcher {
    provisional_suffixes: Vec<String>,
}

impl NameMatcher {
    /// Create a matcher recognizing the given in-progress suffixes (e.g. ".crdownload")
    pub fn new(provisional_suffixes: Vec<String>) -> Self {
        let provisional_suffixes = provisional_suffixes
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            provisional_suffixes,
        }
    }

    /// Whether `candidate` matches `expected`, counting provisional matches
    #[must_use]
    pub fn matches(&self, candidate: &str, expected: &str) -> bool {
        self.match_name(candidate, expected) != NameMatch::Mismatch
    }

    /// Classify `candidate` against `expected`
    #[must_use]
    pub fn match_name(&self, candidate: &str, expected: &str) -> NameMatch {
        if self.strip_provisional(candidate).is_some() {
            return NameMatch::Provisional;
        }
        if names_match(candidate, expected) {
            NameMatch::Final
        } else {
            NameMatch::Mismatch
        }
    }

    /// The name a provisional artifact will have once finished, if `name` is provisional
    pub fn strip_provisional<'a>(&self, name: &'a str) -> Option<&'a str> {
        self.provisional_suffixes.iter().find_map(|suffix| {
            let cut = name.len().checked_sub(suffix.len())?;
            if cut == 0 || !name.is_char_boundary(cut) {
                return None;
            }
            name[cut..]
                .eq_ignore_ascii_case(suffix)
                .then(|| &name[..cut])
        })
    }

    /// Whether `name` carries an in-progress suffix
    pub fn is_provisional(&self, name: &str) -> bool {
        self.strip_provisional(name).is_some()
    }
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self::new(
            crate::config::AcquisitionConfig::default().provisional_suffixes,
        )
    }
}

/// Rules 2 to 5 for two finished names
#[must_use]
pub fn names_match(candidate: &str, expected: &str) -> bool {
    let (cand_base, cand_ext) = split_extension(candidate);
    let (exp_base, exp_ext) = split_extension(expected);

    if !cand_ext.eq_ignore_ascii_case(exp_ext) {
        return false;
    }

    if let (Some(a), Some(b)) = (part_number(cand_base), part_number(exp_base)) {
        return a == b;
    }

    let cand_lower = cand_base.to_lowercase();
    let exp_lower = exp_base.to_lowercase();

    if cand_lower == exp_lower {
        return true;
    }

    if let Some((prefix, suffix)) = split_truncated(&exp_lower) {
        let fits = if suffix.is_empty() {
            !prefix.is_empty() && cand_lower.starts_with(prefix)
        } else {
            cand_lower.starts_with(prefix) && cand_lower.ends_with(suffix)
        };
        if fits {
            return true;
        }
    }

    let cand_norm = normalize(&cand_lower);
    let exp_norm = normalize(&exp_lower);
    if cand_norm.is_empty() || exp_norm.is_empty() {
        return false;
    }
    cand_norm.contains(&exp_norm) || exp_norm.contains(&cand_norm)
}

/// Split `name` into base name and extension (without the dot)
fn split_extension(name: &str) -> (&str, &str) {
    match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => (base, ext),
        _ => (name, ""),
    }
}

/// `partN` number encoded in a base name
fn part_number(base: &str) -> Option<u32> {
    PART_NUMBER
        .captures_iter(base)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Prefix and suffix around the first truncation marker
fn split_truncated(base: &str) -> Option<(&str, &str)> {
    TRUNCATION_MARKERS
        .iter()
        .filter_map(|marker| base.find(marker).map(|idx| (idx, marker.len())))
        .min_by_key(|(idx, _)| *idx)
        .map(|(idx, len)| (&base[..idx], &base[idx + len..]))
}

fn normalize(base: &str) -> String {
    let mut s = base.to_string();
    for marker in TRUNCATION_MARKERS {
        s = s.replace(marker, "");
    }
    s.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .collect()
}
