use thiserror::Error;

use crate::store::EntityId;

/// Load-time rejection of a tracking or event source.
///
/// Fatal: the whole source is rejected and nothing is partially loaded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("I/O error reading source: {0}")]
    Io(String),

    #[error("source contains no frames")]
    Empty,

    #[error("sample rate must be positive and finite, got {0}")]
    SampleRate(f64),

    #[error("frame {frame}: missing field '{field}'")]
    MissingField { frame: usize, field: &'static str },

    #[error("frame {frame}: expected {expected} player slots, found {found}")]
    Arity { frame: usize, expected: usize, found: usize },

    #[error("frame {frame}: timestamp {timestamp} does not increase past {previous}")]
    Ordering { frame: usize, timestamp: f64, previous: f64 },

    #[error("frame {frame}: non-finite value in '{field}'")]
    NonFinite { frame: usize, field: &'static str },

    #[error("frame {frame}: player {id} appears in more than one slot")]
    DuplicatePlayer { frame: usize, id: u32 },

    #[error("frame {frame}: player {id} switches team")]
    TeamChange { frame: usize, id: u32 },

    #[error("event {event}: frame {frame} outside [0, {frame_count})")]
    EventOutOfBounds { event: usize, frame: usize, frame_count: usize },

    #[error("event {event}: frame {frame} precedes previous event frame {previous}")]
    EventOrdering { event: usize, frame: usize, previous: usize },
}

/// Query-time failure. Always local to the query; never ends the session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("frame index {index} outside [0, {frame_count})")]
    OutOfRange { index: usize, frame_count: usize },

    #[error("time {t:.3}s outside [{start:.3}s, {end:.3}s]")]
    TimeOutOfRange { t: f64, start: f64, end: f64 },

    #[error("invalid frame range {start}..={end}")]
    InvalidRange { start: usize, end: usize },

    #[error("no valid samples for {entity} in frames {start}..={end}")]
    InsufficientData { entity: EntityId, start: usize, end: usize },

    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("frames {start}..{end} unavailable: {reason}")]
    Unavailable { start: usize, end: usize, reason: String },
}

impl QueryError {
    /// True for the explicit "no data" outcome, as opposed to a caller mistake.
    pub fn is_no_data(&self) -> bool {
        matches!(self, QueryError::InsufficientData { .. })
    }
}

/// Segment loader failure, retried with backoff by the windowed cache.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("segment I/O failed: {0}")]
    Io(String),

    #[error("segment load cancelled")]
    Cancelled,

    #[error("segment {start}..{end} outside store of {frame_count} frames")]
    OutOfBounds { start: usize, end: usize, frame_count: usize },
}

impl LoadError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoadError::Io(_))
    }
}

/// Persisted frame-store artifact failure.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("Decompression error")]
    Decompression,

    #[error("Corrupted artifact")]
    Corrupted,

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Artifact belongs to match '{found}', expected '{expected}'")]
    MatchMismatch { found: String, expected: String },

    #[error("Artifact not found: {path}")]
    NotFound { path: String },

    #[error("Artifact content rejected: {0}")]
    Invalid(#[from] FormatError),
}

impl ArtifactError {
    /// Recoverable errors mean "reparse the raw source"; the others point at a bad file.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ArtifactError::Io(_) => true,
            ArtifactError::NotFound { .. } => true,
            ArtifactError::VersionMismatch { .. } => true,
            ArtifactError::MatchMismatch { .. } => false,
            ArtifactError::Corrupted => false,
            ArtifactError::ChecksumMismatch => false,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure opening a match session. Everything here is load-time and fatal.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;
