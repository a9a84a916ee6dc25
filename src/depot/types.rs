use std::fmt;
use std::str::FromStr;

use crate::depot::error::DepotError;

/// What a sync does to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Edit,
    Delete,
    /// Metadata-only change; no content is transferred.
    Replace,
    Branch,
    Integrate,
    MoveAdd,
    MoveDelete,
}

impl Action {
    /// Removal actions. These are always scheduled at revision 0.
    pub fn is_delete(&self) -> bool {
        matches!(self, Action::Delete | Action::MoveDelete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "added",
            Action::Edit => "updated",
            Action::Delete => "deleted",
            Action::Replace => "replaced",
            Action::Branch => "branched",
            Action::Integrate => "integrated",
            Action::MoveAdd => "move/add",
            Action::MoveDelete => "move/delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DepotError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "add" | "added" => Ok(Action::Add),
            "edit" | "updated" | "updating" => Ok(Action::Edit),
            "delete" | "deleted" => Ok(Action::Delete),
            "replace" | "replaced" | "refreshed" => Ok(Action::Replace),
            "branch" | "branched" => Ok(Action::Branch),
            "integrate" | "integrated" => Ok(Action::Integrate),
            "move/add" => Ok(Action::MoveAdd),
            "move/delete" => Ok(Action::MoveDelete),
            other => Err(DepotError::Backend(format!("unknown action '{}'", other))),
        }
    }
}

/// Revision selector appended to a depot path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RevisionSpec {
    /// Latest revision (`#head`).
    Head,
    /// A file revision (`#n`). `Number(0)` means "not present locally".
    Number(u32),
    /// State of the depot as of a changelist (`@n`).
    Change(u64),
    /// A label (`@name`).
    Label(String),
}

impl RevisionSpec {
    /// The delete sentinel.
    pub const NONE: RevisionSpec = RevisionSpec::Number(0);

    /// Parse a caller-supplied target such as `12345`, `@12345`, `#head` or `0`.
    pub fn parse(target: &str) -> Result<Self, DepotError> {
        let target = target.trim();
        match target.to_ascii_lowercase().as_str() {
            "" | "head" | "#head" => return Ok(RevisionSpec::Head),
            "0" | "none" | "#0" | "@0" | "#none" => return Ok(RevisionSpec::NONE),
            _ => {}
        }

        if let Some(rev) = target.strip_prefix('#') {
            return rev
                .parse::<u32>()
                .map(RevisionSpec::Number)
                .map_err(|_| DepotError::InvalidRevision(target.to_string()));
        }

        let change = target.strip_prefix('@').unwrap_or(target);
        if let Ok(number) = change.parse::<u64>() {
            // Changelist 0 predates every file
            if number == 0 {
                return Ok(RevisionSpec::NONE);
            }
            return Ok(RevisionSpec::Change(number));
        }

        // Labels must be introduced with '@' and must not contain path separators
        if target.starts_with('@')
            && !change.is_empty()
            && !change.contains(&['/', '#', '@', '*'][..])
            && !change.contains("...")
        {
            return Ok(RevisionSpec::Label(change.to_string()));
        }

        Err(DepotError::InvalidRevision(target.to_string()))
    }

    /// Whether this target means "remove everything".
    pub fn is_removal(&self) -> bool {
        matches!(self, RevisionSpec::Number(0))
    }
}

impl fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionSpec::Head => write!(f, "#head"),
            RevisionSpec::Number(rev) => write!(f, "#{}", rev),
            RevisionSpec::Change(change) => write!(f, "@{}", change),
            RevisionSpec::Label(label) => write!(f, "@{}", label),
        }
    }
}

/// A `path@revision` argument to a plan query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepotSpec {
    pub path: String,
    pub revision: RevisionSpec,
}

impl DepotSpec {
    pub fn new(path: impl Into<String>, revision: RevisionSpec) -> Self {
        Self {
            path: path.into(),
            revision,
        }
    }
}

impl fmt::Display for DepotSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.path, self.revision)
    }
}

/// A `path#revision` pair handed to a fetch.
pub type FetchTarget = DepotSpec;

/// One structured item from a plan query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub path: String,
    pub revision: u32,
    pub size: u64,
    pub action: Action,
}

/// One per-item confirmation from a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    pub path: String,
    pub revision: u32,
    pub action: Action,
}

impl fmt::Display for FetchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} - {}", self.path, self.revision, self.action)
    }
}

/// Unstructured side-channel lines reported alongside a backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Info(String),
    Error(String),
}

impl BackendEvent {
    pub fn message(&self) -> &str {
        match self {
            BackendEvent::Info(message) | BackendEvent::Error(message) => message,
        }
    }
}

/// Result of a dry-run plan query, drained by the caller once the call returns.
#[derive(Debug, Clone, Default)]
pub struct PlanReport {
    pub items: Vec<PlannedFile>,
    pub events: Vec<BackendEvent>,
}

impl PlanReport {
    pub fn info(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.events.iter().filter_map(|event| match event {
            BackendEvent::Info(line) => Some(line.as_str()),
            BackendEvent::Error(_) => None,
        })
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.events.iter().filter_map(|event| match event {
            BackendEvent::Error(line) => Some(line.as_str()),
            BackendEvent::Info(_) => None,
        })
    }
}

/// Element of a streaming fetch.
#[derive(Debug)]
pub enum FetchEvent {
    Synced(FetchRecord),
    Info(String),
    Error(DepotError),
}

/// Options for a fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Preview only; nothing changes in the workspace.
    pub dry_run: bool,
    /// Number of targets sent per backend request.
    pub batch_size: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: 64,
        }
    }
}
