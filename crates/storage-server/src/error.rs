use thiserror::Error;

/// Failures that can happen before the server is serving a single request —
/// config loading, socket bind, log file creation. All of these are fatal:
/// the server prints the cause and exits non-zero rather than limping on
/// with partial configuration.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not read config file '{path}': {source}")]
    ConfigIo { path: String, source: std::io::Error },

    #[error("config file '{path}' is malformed: {reason}")]
    ConfigMalformed { path: String, reason: String },

    #[error("could not open log file '{path}': {source}")]
    LogFileIo { path: String, source: std::io::Error },

    #[error("could not bind socket '{path}': {source}")]
    SocketBind { path: String, source: std::io::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;
