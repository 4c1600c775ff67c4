//! Line splitting and body-line cleaning

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>]+").expect("url pattern is valid")
});

#[allow(clippy::expect_used)]
static BARE_URL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://|www\.)\S+$").expect("bare url pattern is valid")
});

#[allow(clippy::expect_used)]
static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#[\p{L}\p{N}_]+").expect("hashtag pattern is valid"));

#[allow(clippy::expect_used)]
static HASHTAG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:#[\p{L}\p{N}_]+[\s,;]*)+$").expect("hashtag line pattern is valid")
});

// v1.2, ver. 3, version 2.0, UE5.1, 1.2.3
#[allow(clippy::expect_used)]
static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:v|ver\.?\s?|version\s|ue)\d+(?:\.\d+)*\b|\b\d+\.\d+\.\d+(?:\.\d+)?\b")
        .expect("version pattern is valid")
});

const DASHES: &[char] = &['-', '\u{2010}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2015}'];

/// Cleans body lines with a configurable boilerplate denylist
#[derive(Clone, Debug)]
pub struct TextCleaner {
    boilerplate: Option<Regex>,
}

impl TextCleaner {
    /// Build a cleaner removing `words` (whole words, case-sensitive)
    pub fn new(words: &[String]) -> Self {
        let alternatives: Vec<String> = words
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .map(regex::escape)
            .collect();
        let boilerplate = if alternatives.is_empty() {
            None
        } else {
            Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|"))).ok()
        };
        Self { boilerplate }
    }

    /// Split raw texts into a title and cleaned body lines
    ///
    /// The title is the first meaningful line with whitespace collapsed. Body
    /// lines that clean down to nothing are dropped.
    pub fn title_and_body(&self, texts: &[String]) -> (Option<String>, Vec<String>) {
        let mut lines = meaningful_lines(texts).into_iter();
        let title = lines.next().map(|l| collapse_whitespace(&l));
        let body = lines.filter_map(|l| self.clean_line(&l)).collect();
        (title, body)
    }

    /// Clean one body line; `None` when nothing is left
    pub fn clean_line(&self, line: &str) -> Option<String> {
        let mut s = URL.replace_all(line, " ").into_owned();
        s = HASHTAG.replace_all(&s, " ").into_owned();
        s = VERSION.replace_all(&s, " ").into_owned();
        if let Some(boilerplate) = &self.boilerplate {
            s = boilerplate.replace_all(&s, " ").into_owned();
        }
        let collapsed = collapse_whitespace(&s);
        let trimmed = collapsed
            .trim_matches(|c: char| DASHES.contains(&c) || c.is_whitespace())
            .to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Non-empty lines that are neither a bare URL nor only hashtags
pub fn meaningful_lines(texts: &[String]) -> Vec<String> {
    texts
        .iter()
        .flat_map(|t| t.lines())
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !BARE_URL_LINE.is_match(l))
        .filter(|l| !HASHTAG_LINE.is_match(l))
        .map(str::to_string)
        .collect()
}

/// URLs written out in the text
pub fn urls_in(texts: &[String]) -> Vec<String> {
    texts
        .iter()
        .flat_map(|t| URL.find_iter(t))
        .map(|m| {
            let url = m.as_str().trim_end_matches(['.', ',', ')', ';', '!', '?']);
            if url.len() >= 4 && url[..4].eq_ignore_ascii_case("www.") {
                format!("https://{url}")
            } else {
                url.to_string()
            }
        })
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
