//! Error types for the ingestion pipeline

use thiserror::Error;

use crate::models::FeedKind;

/// Transport failure while fetching a feed body
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network level failure (connect, DNS, TLS, timeout)
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Upstream answered with a non-2xx status
    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// Any other transport failure (used by alternative fetchers)
    #[error("transport error: {0}")]
    Other(String),
}

impl FetchError {
    /// Create a transport error that is not tied to reqwest
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// No known timestamp layout accepted the input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed timestamp {input:?}: layout {layout} failed: {reason}")]
pub struct MalformedTimestamp {
    /// The raw attribute value
    pub input: String,
    /// Name of the last layout attempted
    pub layout: &'static str,
    /// Diagnostic produced by that layout
    pub reason: String,
}

/// Document-level failure while decoding a feed body
#[derive(Error, Debug)]
pub enum ParseError {
    /// Structurally invalid or incomplete XML
    #[error("failed to decode {kind} document: {message}")]
    Decode { kind: FeedKind, message: String },

    /// Root element does not belong to the requested feed shape
    #[error("expected <{expected}> root element, found <{found}>")]
    UnexpectedRoot { expected: &'static str, found: String },

    /// A timestamp attribute could not be parsed
    #[error("attribute {attribute}: {source}")]
    MalformedTimestamp {
        attribute: &'static str,
        #[source]
        source: MalformedTimestamp,
    },
}

impl ParseError {
    /// Create a new decode error
    pub fn decode(kind: FeedKind, msg: impl Into<String>) -> Self {
        Self::Decode { kind, message: msg.into() }
    }

    /// Whether this is a timestamp failure rather than a structural one
    pub fn is_timestamp(&self) -> bool {
        matches!(self, Self::MalformedTimestamp { .. })
    }
}

/// Per-row persistence failure
#[derive(Error, Debug)]
pub enum WriteError {
    /// Database driver error (constraint violation, lost connection, ...)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row rejected by a store constraint outside the database driver
    #[error("constraint violation: {0}")]
    Constraint(String),
}

impl WriteError {
    /// Create a new constraint error
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }
}

/// Hard failure that aborts a whole cycle
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Scheduler setup and dispatch errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Cron expression rejected by the trigger engine
    #[error("invalid trigger {expression:?} for job {job}: {reason}")]
    InvalidTrigger { job: String, expression: String, reason: String },

    /// A job name was registered twice
    #[error("job {0} is already registered")]
    DuplicateJob(String),

    /// No job registered under this name
    #[error("unknown job {0}")]
    UnknownJob(String),

    /// Trigger engine failed to start or stop
    #[error("trigger engine error: {0}")]
    Engine(String),
}
