//! Per-review working directories.
//!
//! Every review gets its own directory under the sessions root, named
//! `session-YYYYMMDD-HHMMSS-ffffff-<8 hex>`. The timestamp orders sessions,
//! the random suffix keeps concurrent creators apart. All documents are
//! copied in as UTF-8 without a byte-order mark.
//!
//! ```text
//! .crossreview/sessions/
//! └── session-20260316-101500-123456-9f2c41aa/
//!     ├── ReviewIndex.md
//!     ├── Task1_Login.md
//!     ├── Task2_Cache.md
//!     ├── OriginalRequirement.md   (optional)
//!     ├── TaskPlanning.md          (optional)
//!     ├── report.md                (written by the review tool)
//!     └── <tool>.log               (captured tool output)
//! ```

pub mod documents;

pub use documents::{
    DocumentSet, check_index_order, index_task_references, read_document, target_task_name,
    validate_task_name,
};

use crate::errors::SessionError;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Timelike, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const INDEX_FILE_NAME: &str = "ReviewIndex.md";
pub const REQUIREMENT_FILE_NAME: &str = "OriginalRequirement.md";
pub const PLANNING_FILE_NAME: &str = "TaskPlanning.md";

/// Sessions kept by [`SessionStore::prune`] unless configured otherwise.
pub const DEFAULT_RETAIN_COUNT: usize = 10;

const SESSION_PREFIX: &str = "session-";
const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const CREATE_ATTEMPTS: usize = 5;

/// Lifecycle of a session as seen by the workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Created,
    Reviewing,
    Completed,
    Failed,
    Aborted,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Reviewing => "reviewing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// One review working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    pub index_document: PathBuf,
    /// Copied task documents, in review order.
    pub task_documents: Vec<PathBuf>,
    pub requirement_document: Option<PathBuf>,
    pub planning_document: Option<PathBuf>,
    pub status: SessionStatus,
}

impl Session {
    /// Number of documents copied in.
    pub fn document_count(&self) -> usize {
        1 + self.task_documents.len()
            + usize::from(self.requirement_document.is_some())
            + usize::from(self.planning_document.is_some())
    }
}

/// A session directory found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEntry {
    pub id: String,
    pub created_at: NaiveDateTime,
    pub path: PathBuf,
}

/// Result of a retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub kept: usize,
    pub removed: Vec<PathBuf>,
}

/// Allocates, fills and prunes session directories.
pub struct SessionStore {
    root: PathBuf,
    active: Option<Session>,
    last_stamp: Option<DateTime<Utc>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active: None,
            last_stamp: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    /// Forget the active session; its directory becomes prunable.
    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Allocate a new session directory and copy `documents` into it.
    ///
    /// Task documents keep their order and are stored under their target
    /// names. The new session becomes the active one.
    pub fn create_session(&mut self, documents: &DocumentSet) -> Result<&Session, SessionError> {
        let task_names = documents.target_names()?;
        std::fs::create_dir_all(&self.root).map_err(|e| SessionError::io(&self.root, e))?;

        let (id, created_at, path) = self.allocate_dir()?;
        debug!(session = %id, "Allocated session directory");

        let copied = match copy_documents(documents, &task_names, &path) {
            Ok(copied) => copied,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&path) {
                    warn!(session = %id, error = %cleanup, "Failed to remove incomplete session");
                }
                return Err(e);
            }
        };
        let CopiedDocuments {
            index_document,
            task_documents,
            requirement_document,
            planning_document,
        } = copied;

        info!(
            session = %id,
            tasks = task_documents.len(),
            path = %path.display(),
            "Session created"
        );

        Ok(self.active.insert(Session {
            id,
            created_at,
            path,
            index_document,
            task_documents,
            requirement_document,
            planning_document,
            status: SessionStatus::Created,
        }))
    }

    /// Record the active session's status.
    pub fn set_status(&mut self, status: SessionStatus) {
        if let Some(session) = self.active.as_mut() {
            debug!(session = %session.id, from = %session.status, to = %status, "Session status");
            session.status = status;
        }
    }

    /// Session directories under the root, newest first.
    pub fn list(&self) -> Result<Vec<SessionEntry>, SessionError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::io(&self.root, e)),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SessionError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(created_at) = parse_session_stamp(&name) else {
                continue;
            };
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                sessions.push(SessionEntry {
                    id: name,
                    created_at,
                    path: entry.path(),
                });
            }
        }
        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(sessions)
    }

    /// Delete all but the `retain` most recently created sessions.
    ///
    /// The active session is never removed. A directory that disappears
    /// while pruning (another process got to it first) is not an error.
    pub fn prune(&self, retain: usize) -> Result<PruneReport, SessionError> {
        let sessions = self.list()?;
        let active = self.active.as_ref().map(|s| s.path.as_path());

        let mut report = PruneReport::default();
        for (rank, entry) in sessions.into_iter().enumerate() {
            if rank < retain || Some(entry.path.as_path()) == active {
                report.kept += 1;
                continue;
            }
            match std::fs::remove_dir_all(&entry.path) {
                Ok(()) => {
                    debug!(session = %entry.id, "Pruned session");
                    report.removed.push(entry.path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(session = %entry.id, error = %e, "Failed to prune session");
                    report.kept += 1;
                }
            }
        }

        if !report.removed.is_empty() {
            info!(removed = report.removed.len(), kept = report.kept, "Pruned old sessions");
        }
        Ok(report)
    }

    fn allocate_dir(&mut self) -> Result<(String, DateTime<Utc>, PathBuf), SessionError> {
        let mut last_err = None;
        for _ in 0..CREATE_ATTEMPTS {
            let stamp = self.next_stamp();
            let id = session_id(&stamp);
            let path = self.root.join(&id);
            match std::fs::create_dir(&path) {
                Ok(()) => return Ok((id, stamp, path)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(session = %id, "Session name collision, retrying");
                    last_err = Some(SessionError::io(&path, e));
                }
                Err(e) => return Err(SessionError::io(&path, e)),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            SessionError::io(
                &self.root,
                std::io::Error::other("could not allocate a session directory"),
            )
        }))
    }

    /// Current time at microsecond precision, strictly after the previous stamp.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let micros = now.timestamp_subsec_micros().min(999_999);
        let mut stamp = now.with_nanosecond(micros * 1_000).unwrap_or(now);
        if let Some(last) = self.last_stamp
            && stamp <= last
        {
            stamp = last + TimeDelta::microseconds(1);
        }
        self.last_stamp = Some(stamp);
        stamp
    }
}

fn session_id(stamp: &DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}{}-{:06}-{}",
        SESSION_PREFIX,
        stamp.format(STAMP_FORMAT),
        stamp.timestamp_subsec_micros().min(999_999),
        &suffix[..8]
    )
}

/// Creation time encoded in a session directory name.
pub fn parse_session_stamp(name: &str) -> Option<NaiveDateTime> {
    let rest = name.strip_prefix(SESSION_PREFIX)?;
    // YYYYMMDD-HHMMSS-ffffff
    let stamp = rest.get(..15)?;
    let micros: i64 = rest.get(16..22)?.parse().ok()?;
    if rest.as_bytes().get(15) != Some(&b'-') {
        return None;
    }
    let base = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
    Some(base + TimeDelta::microseconds(micros))
}

struct CopiedDocuments {
    index_document: PathBuf,
    task_documents: Vec<PathBuf>,
    requirement_document: Option<PathBuf>,
    planning_document: Option<PathBuf>,
}

fn copy_documents(
    documents: &DocumentSet,
    task_names: &[String],
    dir: &Path,
) -> Result<CopiedDocuments, SessionError> {
    let index_document = copy_document(&documents.index, &dir.join(INDEX_FILE_NAME))?;
    let mut task_documents = Vec::with_capacity(documents.tasks.len());
    for (source, name) in documents.tasks.iter().zip(task_names) {
        task_documents.push(copy_document(source, &dir.join(name))?);
    }
    let requirement_document = documents
        .requirement
        .as_deref()
        .map(|src| copy_document(src, &dir.join(REQUIREMENT_FILE_NAME)))
        .transpose()?;
    let planning_document = documents
        .planning
        .as_deref()
        .map(|src| copy_document(src, &dir.join(PLANNING_FILE_NAME)))
        .transpose()?;
    Ok(CopiedDocuments {
        index_document,
        task_documents,
        requirement_document,
        planning_document,
    })
}

fn copy_document(source: &Path, target: &Path) -> Result<PathBuf, SessionError> {
    let text = read_document(source)?;
    std::fs::write(target, text.as_bytes()).map_err(|e| SessionError::io(target, e))?;
    Ok(target.to_path_buf())
}
