//! Change events produced by the watchers

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

/// What happened to the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
}

/// A source file that was created or modified
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Tag of the watched directory the change came from
    pub source: String,
    /// Path relative to the watched directory
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub detected_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(source: impl Into<String>, path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            source: source.into(),
            path: path.into(),
            kind,
            detected_at: Utc::now(),
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.kind {
            ChangeKind::Create => "created",
            ChangeKind::Modify => "modified",
        };
        write!(f, "{}/{} {}", self.source, self.path.display(), verb)
    }
}
