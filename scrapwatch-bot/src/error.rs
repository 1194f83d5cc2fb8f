use thiserror::Error;

/// Errors produced by the Battlemetrics client.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response status: {0}")]
    Status(u16),

    #[error("malformed response payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response carried no data")]
    MissingData,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

/// Errors produced by a session synchronization pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("player is not known to the tracker")]
    UnknownPlayer,

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("database error: {0}")]
    Db(#[from] scrapwatch_db::DbError),
}
