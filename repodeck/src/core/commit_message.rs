//! Deterministic commit message used when the generation service is unavailable.

use crate::core::types::{ChangeStatus, FileChange};

pub fn fallback_message(changes: &[FileChange]) -> String {
    let count = |status: ChangeStatus| changes.iter().filter(|c| c.status == status).count();

    let mut parts = Vec::new();
    for (verb, n) in [
        ("Add", count(ChangeStatus::Added)),
        ("Update", count(ChangeStatus::Modified)),
        ("Remove", count(ChangeStatus::Deleted)),
    ] {
        if n > 0 {
            let plural = if n > 1 { "s" } else { "" };
            parts.push(format!("{verb} {n} file{plural}"));
        }
    }

    if parts.is_empty() {
        "chore: Update files".to_string()
    } else {
        format!("feat: {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarizes_counts() {
        let changes = vec![
            FileChange::new(ChangeStatus::Added, "a"),
            FileChange::new(ChangeStatus::Added, "b"),
            FileChange::new(ChangeStatus::Modified, "c"),
            FileChange::new(ChangeStatus::Deleted, "d"),
        ];
        assert_eq!(
            fallback_message(&changes),
            "feat: Add 2 files, Update 1 file, Remove 1 file"
        );
    }

    #[test]
    fn renames_and_untracked_only_fall_back_to_chore() {
        let changes = vec![
            FileChange::new(ChangeStatus::Renamed, "a"),
            FileChange::new(ChangeStatus::Untracked, "b"),
        ];
        assert_eq!(fallback_message(&changes), "chore: Update files");
        assert_eq!(fallback_message(&[]), "chore: Update files");
    }
}
