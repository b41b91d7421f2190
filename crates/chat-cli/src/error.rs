#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Connection(#[from] chat_connection::Error),

    #[error("invalid command: {0}")]
    Command(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CliResult<T> = Result<T, CliError>;
