use std::fmt::{self, Display};
use std::path::PathBuf;

// region:    Error
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("required environment variable is empty: {0:?}")]
    EmptyEnv(&'static str),

    #[error("environment variable has leading or trailing whitespace: {0:?}")]
    PaddedEnv(&'static str),

    #[error("environment variable is not valid unicode: {0:?}")]
    NotUnicodeEnv(&'static str),

    #[error("could not read file {path:?}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file is not valid UTF-8: {0:?}")]
    InvalidUtf8(PathBuf),

    #[error("Invalid Connection String - {0}")]
    InvalidConnectionString(String),

    #[error("Invalid Url")]
    InvalidUrl,

    #[error("Unexpected Status - {0}")]
    UnexpectedStatus(hyper::StatusCode),

    #[error(transparent)]
    DbError(#[from] sqlx::Error),

    #[error(transparent)]
    HttpError(#[from] hyper::http::Error),

    #[error(transparent)]
    HyperError(#[from] hyper::Error),

    #[error(transparent)]
    HyperClientError(#[from] hyper_util::client::legacy::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}
// endregion: Error

/// Pipeline step an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Connect,
    Prepare,
    Client,
    Fetch,
    Serialize,
    Insert,
    Refresh,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Config => "could not load configuration",
            Stage::Connect => "could not connect to database",
            Stage::Prepare => "could not prepare statement",
            Stage::Client => "could not create client",
            Stage::Fetch => "could not fetch worlds status",
            Stage::Serialize => "could not convert to JSON",
            Stage::Insert => "could not save to database",
            Stage::Refresh => "could not refresh materialized view",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("{stage}: {source}")]
pub struct RunError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl RunError {
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }
}

#[tokio::test]
async fn run_error_display_has_stage_and_cause() -> anyhow::Result<()> {
    // arrange
    let err = RunError::new(
        Stage::Config,
        Error::EmptyEnv("POSTGRESQL_CONNECTION_STRING_FILE"),
    );
    // act
    let msg = err.to_string();

    // assert
    assert_eq!(
        "could not load configuration: required environment variable is empty: \"POSTGRESQL_CONNECTION_STRING_FILE\"",
        msg
    );
    Ok(())
}

#[tokio::test]
async fn run_error_source_is_cause() -> anyhow::Result<()> {
    // arrange
    let err = RunError::new(Stage::Fetch, Error::InvalidUrl);
    // act
    let source = std::error::Error::source(&err).map(|e| e.to_string());

    // assert
    assert_eq!(Some("Invalid Url".to_owned()), source);
    Ok(())
}
