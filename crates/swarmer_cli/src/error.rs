use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error(transparent)]
    Swarmer(#[from] swarmer::error::Error),

    #[error("Could not open the log file: {0}")]
    LogFile(#[from] std::io::Error),

    #[error("Could not set up the logger: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}
