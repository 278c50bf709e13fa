use thiserror::Error;

/// Errors raised while scanning and framing bytes off the wire.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while classifying or parsing an HL7 payload.
#[derive(Error, Debug)]
pub enum HlSevenError {
    #[error("empty HL7 message")]
    EmptyMessage,

    #[error("malformed segment: {0}")]
    MalformedSegment(String),

    #[error("invalid field value in {segment}.{field}: {value}")]
    InvalidField {
        segment: &'static str,
        field: &'static str,
        value: String,
    },
}

/// Errors raised by the patient/result store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed historical record: {0}")]
    MalformedHistory(String),
}

/// Errors raised by the pager client. Never fatal to the orchestrator loop.
#[derive(Error, Debug)]
pub enum PagerError {
    #[error("pager request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("pager returned non-success status {0}")]
    Status(reqwest::StatusCode),
}

/// Top-level error composed only at layer boundaries that need a single return type
/// (orchestrator frame handling, startup). Inner layers return their own error kind.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Hl7(#[from] HlSevenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pager(#[from] PagerError),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
