//! Unified diff hunk parser and display line numbering.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::types::{DiffHunk, DiffLine, DiffLineKind};

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex")
});

/// Parse unified diff text into hunks.
///
/// File headers before the first hunk are ignored. A `@@` line that does not
/// match the header pattern closes the current hunk and the lines after it are
/// dropped until the next valid header.
pub fn parse_diff(text: &str) -> Vec<DiffHunk> {
    let mut hunks = Vec::new();
    let mut current: Option<DiffHunk> = None;

    for line in text.lines() {
        if line.starts_with("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            current = parse_header(line);
            continue;
        }
        if let Some(hunk) = current.as_mut() {
            hunk.lines.push(classify(line));
        }
    }

    if let Some(hunk) = current {
        hunks.push(hunk);
    }
    hunks
}

fn parse_header(line: &str) -> Option<DiffHunk> {
    let caps = HUNK_HEADER.captures(line)?;
    let number = |idx: usize| -> Option<u32> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(1),
        }
    };
    Some(DiffHunk {
        header: line.to_string(),
        old_start: number(1)?,
        old_count: number(2)?,
        new_start: number(3)?,
        new_count: number(4)?,
        lines: Vec::new(),
    })
}

fn classify(line: &str) -> DiffLine {
    let kind = match line.as_bytes().first() {
        Some(b'+') => DiffLineKind::Added,
        Some(b'-') => DiffLineKind::Removed,
        Some(b' ') => DiffLineKind::Context,
        _ => DiffLineKind::Info,
    };
    let mut chars = line.chars();
    chars.next();
    DiffLine {
        kind,
        content: chars.as_str().to_string(),
    }
}

/// A hunk line with the display line numbers it occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumberedLine<'a> {
    pub kind: DiffLineKind,
    pub content: &'a str,
    pub old_line: Option<u32>,
    pub new_line: Option<u32>,
}

/// Derive old/new line numbers for every line of `hunk`.
///
/// Context lines advance both counters, removed lines the old one, added lines
/// the new one. Info lines carry no number.
pub fn number_lines(hunk: &DiffHunk) -> Vec<NumberedLine<'_>> {
    let mut old = hunk.old_start;
    let mut new = hunk.new_start;
    hunk.lines
        .iter()
        .map(|line| {
            let (old_line, new_line) = match line.kind {
                DiffLineKind::Context => {
                    let numbers = (Some(old), Some(new));
                    old += 1;
                    new += 1;
                    numbers
                }
                DiffLineKind::Removed => {
                    let numbers = (Some(old), None);
                    old += 1;
                    numbers
                }
                DiffLineKind::Added => {
                    let numbers = (None, Some(new));
                    new += 1;
                    numbers
                }
                DiffLineKind::Info => (None, None),
            };
            NumberedLine {
                kind: line.kind,
                content: &line.content,
                old_line,
                new_line,
            }
        })
        .collect()
}
