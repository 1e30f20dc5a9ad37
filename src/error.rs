use thiserror::Error;

/// Errors surfaced while serving client commands.
///
/// Every variant except `Io` is local to the command that produced it: the
/// session reports it as an `-ERR` line and keeps reading. `Io` means the
/// socket itself failed and the session ends.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown command {0}")]
    UnknownCommand(String),

    #[error("Malformed command: {0}")]
    BadFormat(&'static str),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid timestamp {0}")]
    InvalidTimestamp(String),

    #[error("Unknown client {0}")]
    UnknownClient(String),

    #[error("Unknown job {0}")]
    UnknownJob(String),

    #[error("Unknown STORE command: {0}")]
    UnknownStoreCommand(String),

    #[error("STORE backup is not implemented")]
    BackupUnsupported,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
