//! Parser for human-readable status reports.
//!
//! The report is scanned line by line while tracking which section we are in.
//! Lines that do not fit the current section are skipped, so a garbled
//! section never hides the ones that parsed.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ChangeStatus, FileChange, StatusLists};

const STAGED_HEADER: &str = "Changes to be committed:";
const UNSTAGED_HEADER: &str = "Changes not staged for commit:";
const UNTRACKED_HEADER: &str = "Untracked files:";
const HINT_MARKER: &str = "(use \"";
const BRANCH_PREFIX: &str = "On branch ";

static SHORT_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([AMDR])\s+(.+)$").expect("short status regex"));

static LONG_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(new file|modified|deleted|renamed):\s+(.+)$").expect("long status regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Staged,
    Unstaged,
    Untracked,
}

/// Parse a status report into staged/unstaged/untracked lists.
pub fn parse_status(text: &str) -> StatusLists {
    let mut lists = StatusLists::default();
    let mut section = Section::None;

    for line in text.lines() {
        if line.starts_with(STAGED_HEADER) {
            section = Section::Staged;
            continue;
        }
        if line.starts_with(UNSTAGED_HEADER) {
            section = Section::Unstaged;
            continue;
        }
        if line.starts_with(UNTRACKED_HEADER) {
            section = Section::Untracked;
            continue;
        }
        if line.trim().is_empty() || line.contains(HINT_MARKER) {
            section = Section::None;
            continue;
        }

        let change = match section {
            Section::None => None,
            Section::Staged | Section::Unstaged => parse_entry(line),
            Section::Untracked => Some(FileChange::new(ChangeStatus::Untracked, line.trim())),
        };
        let Some(change) = change else {
            continue;
        };
        if lists.contains_path(&change.path) {
            continue;
        }
        match section {
            Section::Staged => lists.staged.push(change),
            Section::Unstaged => lists.unstaged.push(change),
            Section::Untracked => lists.untracked.push(change),
            Section::None => {}
        }
    }

    lists
}

/// Extract the branch name from an `On branch <name>` line, if present.
pub fn parse_branch(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix(BRANCH_PREFIX))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn parse_entry(line: &str) -> Option<FileChange> {
    if let Some(caps) = LONG_ENTRY.captures(line) {
        let status = match &caps[1] {
            "new file" => ChangeStatus::Added,
            "deleted" => ChangeStatus::Deleted,
            "renamed" => ChangeStatus::Renamed,
            _ => ChangeStatus::Modified,
        };
        let mut path = caps[2].trim();
        if status == ChangeStatus::Renamed
            && let Some((_, new)) = path.split_once("->")
        {
            path = new.trim();
        }
        return Some(FileChange::new(status, path));
    }

    let caps = SHORT_ENTRY.captures(line)?;
    let status = ChangeStatus::from_code(&caps[1])?;
    Some(FileChange::new(status, caps[2].trim()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn parses_three_sections() {
        let text = "Changes to be committed:\nM  foo.txt\n\nChanges not staged for commit:\nM  bar.txt\n\nUntracked files:\nbaz.txt\n";
        let lists = parse_status(text);
        assert_eq!(
            lists.staged,
            vec![FileChange::new(ChangeStatus::Modified, "foo.txt")]
        );
        assert_eq!(
            lists.unstaged,
            vec![FileChange::new(ChangeStatus::Modified, "bar.txt")]
        );
        assert_eq!(
            lists.untracked,
            vec![FileChange::new(ChangeStatus::Untracked, "baz.txt")]
        );
    }

    #[test]
    fn empty_input_yields_empty_lists() {
        assert!(parse_status("").is_empty());
    }

    #[test]
    fn hint_lines_reset_section() {
        let text = "Untracked files:\n  (use \"git add <file>...\" to include in what will be committed)\n\tstray.txt\n";
        let lists = parse_status(text);
        assert!(lists.untracked.is_empty());
    }

    #[test]
    fn parses_long_form_git_output() {
        let text = "\
On branch main
Changes to be committed:
\tnew file:   src/lib.rs
\trenamed:    old.rs -> new.rs

Changes not staged for commit:
\tdeleted:    gone.txt
\tmodified:   README.md
";
        let lists = parse_status(text);
        assert_eq!(
            lists.staged,
            vec![
                FileChange::new(ChangeStatus::Added, "src/lib.rs"),
                FileChange::new(ChangeStatus::Renamed, "new.rs"),
            ]
        );
        assert_eq!(
            lists.unstaged,
            vec![
                FileChange::new(ChangeStatus::Deleted, "gone.txt"),
                FileChange::new(ChangeStatus::Modified, "README.md"),
            ]
        );
        assert_eq!(parse_branch(text).as_deref(), Some("main"));
    }

    #[test]
    fn unmatched_lines_are_skipped() {
        let text = "Changes to be committed:\nX  weird.txt\nA  ok.txt\n??? garbage\n";
        let lists = parse_status(text);
        assert_eq!(
            lists.staged,
            vec![FileChange::new(ChangeStatus::Added, "ok.txt")]
        );
    }

    #[test]
    fn lines_outside_sections_are_ignored() {
        let lists = parse_status("M  orphan.txt\nA  another.txt\n");
        assert!(lists.is_empty());
    }

    #[test]
    fn paths_are_unique_across_lists() {
        let text = "Changes to be committed:\nM  a.txt\nA  b.txt\n\nChanges not staged for commit:\nM  a.txt\nM  c.txt\n\nUntracked files:\nc.txt\nd.txt\nd.txt\n";
        let lists = parse_status(text);
        let all: Vec<&str> = lists
            .staged
            .iter()
            .chain(&lists.unstaged)
            .chain(&lists.untracked)
            .map(|change| change.path.as_str())
            .collect();
        let unique: HashSet<&str> = all.iter().copied().collect();
        assert_eq!(all.len(), unique.len());
        assert_eq!(all, vec!["a.txt", "b.txt", "c.txt", "d.txt"]);
    }

    #[test]
    fn branch_missing_returns_none() {
        assert_eq!(parse_branch("HEAD detached at 1234abc\n"), None);
    }
}
