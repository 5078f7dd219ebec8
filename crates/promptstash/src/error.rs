use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a local cache read or write failed.
///
/// `Missing` and `Corrupt` are kept apart so callers can tell "never mirrored"
/// from "mirrored but unreadable", even though both surface as
/// [`StashError::Storage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Missing,
    Corrupt,
    Invalid,
    Io,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StorageErrorKind::Missing => "missing",
            StorageErrorKind::Corrupt => "corrupt",
            StorageErrorKind::Invalid => "invalid",
            StorageErrorKind::Io => "io",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
#[error("cache {kind} at {}: {message}", path.display())]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub path: PathBuf,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        let kind = if err.kind() == std::io::ErrorKind::NotFound {
            StorageErrorKind::Missing
        } else {
            StorageErrorKind::Io
        };
        Self::new(kind, path, err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StashError {
    #[error("no prompt index exists yet")]
    NoIndex,

    #[error("the prompt index has no usable entries")]
    EmptyCollection,

    #[error("network error during {operation}{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Network {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("index update conflicted {attempts} times; giving up")]
    Conflict { attempts: u32 },

    #[error("remote unavailable and cache fallback is disabled: {source}")]
    RemoteOnly { source: Box<StashError> },

    #[error("remote failed ({remote}); cache fallback failed ({cache})")]
    Fallback {
        remote: Box<StashError>,
        cache: Box<StashError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of a [`StashError`], looking through the
/// `RemoteOnly` annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoIndex,
    EmptyCollection,
    Network,
    Auth,
    Storage,
    NotFound,
    Conflict,
    Fallback,
    Config,
}

impl StashError {
    pub fn network(operation: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        StashError::Network {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StashError::NoIndex => ErrorKind::NoIndex,
            StashError::EmptyCollection => ErrorKind::EmptyCollection,
            StashError::Network { .. } => ErrorKind::Network,
            StashError::Auth(_) => ErrorKind::Auth,
            StashError::Storage(_) | StashError::Serialization(_) => ErrorKind::Storage,
            StashError::NotFound(_) => ErrorKind::NotFound,
            StashError::Conflict { .. } => ErrorKind::Conflict,
            StashError::RemoteOnly { source } => source.kind(),
            StashError::Fallback { .. } => ErrorKind::Fallback,
            StashError::Config(_) => ErrorKind::Config,
        }
    }

    /// `NoIndex` and `EmptyCollection` mean "nothing to show", not a failure.
    pub fn is_nothing_to_show(&self) -> bool {
        matches!(self.kind(), ErrorKind::NoIndex | ErrorKind::EmptyCollection)
    }

    /// Answers from the remote that describe its state rather than its
    /// reachability. The cache must not override them.
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NoIndex | ErrorKind::EmptyCollection | ErrorKind::NotFound
        )
    }

    pub fn storage_kind(&self) -> Option<StorageErrorKind> {
        match self {
            StashError::Storage(err) => Some(err.kind),
            StashError::Serialization(_) => Some(StorageErrorKind::Corrupt),
            StashError::RemoteOnly { source } => source.storage_kind(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StashError>;
