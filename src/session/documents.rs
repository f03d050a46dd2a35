//! Input documents for one review and the rules they must satisfy.
//!
//! Task documents arrive with a temporary suffix (`Task1_Login-3f9a.md`)
//! and are stored under their target name (`Task1_Login.md`). The index
//! document must reference exactly those targets, in the same order.

use crate::encoding::{ATTEMPTED_ENCODINGS, decode_strict};
use crate::errors::{ReviewError, SessionError};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static TASK_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Task\d+_[A-Za-z0-9_]+\.md$").unwrap());

static TASK_REFERENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(Task\d+_[A-Za-z0-9_]+\.md)").unwrap());

pub const MAX_FILE_NAME_LEN: usize = 255;

/// The documents a review is run over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSet {
    pub index: PathBuf,
    /// Task documents in review order.
    pub tasks: Vec<PathBuf>,
    pub requirement: Option<PathBuf>,
    pub planning: Option<PathBuf>,
}

impl DocumentSet {
    pub fn new(index: impl Into<PathBuf>, tasks: Vec<PathBuf>) -> Self {
        Self {
            index: index.into(),
            tasks,
            requirement: None,
            planning: None,
        }
    }

    pub fn with_requirement(mut self, path: impl Into<PathBuf>) -> Self {
        self.requirement = Some(path.into());
        self
    }

    pub fn with_planning(mut self, path: impl Into<PathBuf>) -> Self {
        self.planning = Some(path.into());
        self
    }

    /// Number of files a session built from this set contains.
    pub fn document_count(&self) -> usize {
        1 + self.tasks.len()
            + usize::from(self.requirement.is_some())
            + usize::from(self.planning.is_some())
    }

    /// Target names of the task documents, in order.
    pub fn target_names(&self) -> Result<Vec<String>, SessionError> {
        self.tasks.iter().map(|p| target_task_name(p)).collect()
    }

    /// Check that the set is complete and internally consistent.
    ///
    /// Returns the task target names on success.
    pub fn validate(&self) -> Result<Vec<String>, ReviewError> {
        if self.tasks.is_empty() {
            return Err(ReviewError::Validation(
                "At least one task document is required".to_string(),
            ));
        }

        let labelled = std::iter::once(("Index document", &self.index))
            .chain(self.tasks.iter().map(|p| ("Task document", p)))
            .chain(self.requirement.iter().map(|p| ("Requirement document", p)))
            .chain(self.planning.iter().map(|p| ("Planning document", p)));
        for (label, path) in labelled {
            if !path.is_file() {
                return Err(ReviewError::Validation(format!(
                    "{} not found: {}",
                    label,
                    path.display()
                )));
            }
        }

        let names = self.target_names()?;
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(ReviewError::Validation(format!(
                    "Task document '{}' is given more than once",
                    name
                )));
            }
        }

        let index_text = read_document(&self.index)?;
        check_index_order(&index_text, &names).map_err(ReviewError::Validation)?;
        Ok(names)
    }
}

/// Read a document and decode it to UTF-8 without a BOM.
pub fn read_document(path: &Path) -> Result<String, SessionError> {
    let bytes = std::fs::read(path).map_err(|e| SessionError::io(path, e))?;
    decode_strict(&bytes).ok_or_else(|| SessionError::Encoding {
        path: path.to_path_buf(),
        tried: ATTEMPTED_ENCODINGS.join(", "),
    })
}

/// Name a task document is stored under: the source name with any
/// temporary `-suffix` removed.
pub fn target_task_name(source: &Path) -> Result<String, SessionError> {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some(stem) = file_name.strip_suffix(".md") else {
        return Err(SessionError::InvalidTaskName {
            name: file_name,
            reason: "task documents must have the .md extension".to_string(),
        });
    };
    let target_stem = match stem.rfind('-') {
        Some(idx) => &stem[..idx],
        None => stem,
    };
    let target = format!("{}.md", target_stem);
    validate_task_name(&target)?;
    Ok(target)
}

/// Enforce `Task<N>_<letters, digits, underscores>.md`.
pub fn validate_task_name(name: &str) -> Result<(), SessionError> {
    let invalid = |reason: &str| SessionError::InvalidTaskName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(invalid("name is longer than 255 bytes"));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(invalid("name must not contain path components"));
    }
    if !TASK_NAME_REGEX.is_match(name) {
        return Err(invalid(
            "expected Task<N>_<Description>.md where the description uses only letters, digits and underscores",
        ));
    }
    Ok(())
}

/// Task document names referenced by the index, in order of first mention.
pub fn index_task_references(index_text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    TASK_REFERENCE_REGEX
        .captures_iter(index_text)
        .map(|cap| cap[1].to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// The index must list exactly the given task documents, in the same order.
pub fn check_index_order(index_text: &str, task_names: &[String]) -> Result<(), String> {
    let referenced = index_task_references(index_text);
    if referenced.is_empty() {
        return Err("Index document does not reference any task document".to_string());
    }
    if referenced != task_names {
        return Err(format!(
            "Index document lists [{}] but task documents were given as [{}]",
            referenced.join(", "),
            task_names.join(", ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_target_name_strips_temp_suffix() {
        assert_eq!(
            target_task_name(Path::new("/tmp/Task1_LoginUpgrade-abc123.md")).unwrap(),
            "Task1_LoginUpgrade.md"
        );
        assert_eq!(
            target_task_name(Path::new("Task2_Cache.md")).unwrap(),
            "Task2_Cache.md"
        );
    }

    #[test]
    fn test_target_name_rejects_bad_names() {
        for bad in ["notes.md", "Task1_Login.txt", "Task_Login.md", "Task1_Log-in-x.md"] {
            let err = target_task_name(Path::new(bad)).unwrap_err();
            assert!(
                matches!(err, SessionError::InvalidTaskName { .. }),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_validate_task_name_limits() {
        assert!(validate_task_name("Task1_Ok.md").is_ok());
        assert!(validate_task_name("Task1_..md").is_err());
        let long = format!("Task1_{}.md", "a".repeat(260));
        assert!(validate_task_name(&long).is_err());
    }

    #[test]
    fn test_index_references_in_first_mention_order() {
        let index = "| # | File |\n|---|---|\n| 1 | Task1_Login.md |\n| 2 | Task2_Cache.md |\n\nSee Task1_Login.md first.";
        assert_eq!(
            index_task_references(index),
            vec!["Task1_Login.md", "Task2_Cache.md"]
        );
    }

    #[test]
    fn test_check_index_order() {
        let index = "1. Task1_Login.md\n2. Task2_Cache.md\n";
        let names = vec!["Task1_Login.md".to_string(), "Task2_Cache.md".to_string()];
        assert!(check_index_order(index, &names).is_ok());

        let swapped = vec!["Task2_Cache.md".to_string(), "Task1_Login.md".to_string()];
        assert!(check_index_order(index, &swapped).is_err());

        let missing = vec!["Task1_Login.md".to_string()];
        assert!(check_index_order(index, &missing).is_err());

        assert!(check_index_order("no tasks here", &missing).is_err());
    }

    #[test]
    fn test_validate_document_set() {
        let dir = tempdir().unwrap();
        let index = dir.path().join("ReviewIndex-x1.md");
        let task = dir.path().join("Task1_Login-x1.md");
        std::fs::write(&index, "| 1 | Task1_Login.md |").unwrap();
        std::fs::write(&task, "# Task 1").unwrap();

        let set = DocumentSet::new(&index, vec![task.clone()]);
        assert_eq!(set.validate().unwrap(), vec!["Task1_Login.md"]);
        assert_eq!(set.document_count(), 2);

        let empty = DocumentSet::new(&index, vec![]);
        assert!(matches!(empty.validate(), Err(ReviewError::Validation(_))));

        let missing = DocumentSet::new(&index, vec![dir.path().join("Task9_Gone.md")]);
        let err = missing.validate().unwrap_err();
        assert!(err.to_string().contains("not found"));

        let dup = DocumentSet::new(&index, vec![task.clone(), task]);
        assert!(matches!(dup.validate(), Err(ReviewError::Validation(_))));
    }

    #[test]
    fn test_read_document_rejects_undecodable_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ReviewIndex.md");
        std::fs::write(&path, [0x41, 0xFF, 0xFF, 0x42]).unwrap();
        let err = read_document(&path).unwrap_err();
        assert!(matches!(err, SessionError::Encoding { .. }));
    }
}
