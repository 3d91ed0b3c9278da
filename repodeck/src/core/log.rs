//! Parser for `git log` style history text.
//!
//! Each stanza starts with a `commit <hash>` line. Headers (`Author:`,
//! `Date:`) are read until the subject line; indented lines after the
//! subject form the body.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Commit;

const COMMIT_MARKER: &str = "commit ";
const SHORT_HASH_LEN: usize = 7;
const BODY_INDENT: &str = "    ";

static AUTHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Author:\s+(.+?)\s+<(.+?)>").expect("author regex"));

#[derive(Default)]
struct Stanza {
    commit: Commit,
    body_lines: Vec<String>,
}

impl Stanza {
    fn start(marker_rest: &str) -> Self {
        let hash = marker_rest
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        let short_hash = hash.chars().take(SHORT_HASH_LEN).collect();
        Self {
            commit: Commit {
                hash,
                short_hash,
                ..Commit::default()
            },
            body_lines: Vec::new(),
        }
    }

    fn finish(mut self) -> Commit {
        while self.body_lines.last().is_some_and(|line| line.is_empty()) {
            self.body_lines.pop();
        }
        self.commit.body = self.body_lines.join("\n");
        self.commit
    }

    fn push_line(&mut self, line: &str) {
        if line.starts_with("Author:") {
            if let Some(caps) = AUTHOR.captures(line) {
                self.commit.author = caps[1].to_string();
                self.commit.email = caps[2].to_string();
            }
            return;
        }
        if let Some(rest) = line.strip_prefix("Date:") {
            self.commit.date = rest.trim().to_string();
            return;
        }
        if line.starts_with("Merge:") {
            return;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        let blank = line.trim().is_empty();

        if self.commit.subject.is_empty() {
            if !blank {
                self.commit.subject = line.trim().to_string();
            }
            return;
        }

        if blank {
            if !self.body_lines.is_empty() {
                self.body_lines.push(String::new());
            }
            return;
        }

        if indented {
            let dedented = line.strip_prefix(BODY_INDENT).unwrap_or(line.trim_start());
            self.body_lines.push(dedented.trim_end().to_string());
        }
    }
}

/// Parse history text into commits, preserving input order (newest first).
pub fn parse_log(text: &str) -> Vec<Commit> {
    let mut commits = Vec::new();
    let mut current: Option<Stanza> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(COMMIT_MARKER) {
            if let Some(stanza) = current.take() {
                commits.push(stanza.finish());
            }
            current = Some(Stanza::start(rest));
            continue;
        }
        if let Some(stanza) = current.as_mut() {
            stanza.push_line(line);
        }
    }

    if let Some(stanza) = current {
        commits.push(stanza.finish());
    }

    commits
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_COMMITS: &str = "\
commit 0123456789abcdef0123456789abcdef01234567 (HEAD -> main)
Author: Ada Lovelace <ada@example.com>
Date:   Mon Jan 1 10:00:00 2024 +0000

    Add engine

    Explain the engine.
    Second line.

commit fedcba9876543210fedcba9876543210fedcba98
Author: Charles Babbage <charles@example.com>
Date:   Sun Dec 31 09:00:00 2023 +0000

    Initial commit
";

    #[test]
    fn parses_git_log_stanzas() {
        let commits = parse_log(TWO_COMMITS);
        assert_eq!(commits.len(), 2);

        let first = &commits[0];
        assert_eq!(first.hash, "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(first.short_hash, "0123456");
        assert_eq!(first.author, "Ada Lovelace");
        assert_eq!(first.email, "ada@example.com");
        assert_eq!(first.date, "Mon Jan 1 10:00:00 2024 +0000");
        assert_eq!(first.subject, "Add engine");
        assert_eq!(first.body, "Explain the engine.\nSecond line.");

        let second = &commits[1];
        assert_eq!(second.short_hash, "fedcba9");
        assert_eq!(second.subject, "Initial commit");
        assert_eq!(second.body, "");
    }

    #[test]
    fn non_indented_subject_is_accepted() {
        let text = "commit abc1234\nAuthor: A <a@b.c>\nDate: today\nFix bug\n    details here\n";
        let commits = parse_log(text);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].subject, "Fix bug");
        assert_eq!(commits[0].body, "details here");
    }

    #[test]
    fn yields_one_record_per_marker_in_order() {
        let text: String = (0..5)
            .map(|i| format!("commit {i:040}\nAuthor: X <x@y>\nDate: d\n\n    msg {i}\n\n"))
            .collect();
        let commits = parse_log(&text);
        assert_eq!(commits.len(), 5);
        for (i, commit) in commits.iter().enumerate() {
            assert!(!commit.hash.is_empty());
            assert_eq!(commit.subject, format!("msg {i}"));
        }
    }

    #[test]
    fn malformed_author_leaves_fields_empty() {
        let commits = parse_log("commit abc\nAuthor: nobody\n\n    subject\n");
        assert_eq!(commits[0].author, "");
        assert_eq!(commits[0].email, "");
        assert_eq!(commits[0].subject, "subject");
    }

    #[test]
    fn empty_input_yields_no_commits() {
        assert!(parse_log("").is_empty());
        assert!(parse_log("no markers here\n").is_empty());
    }
}
