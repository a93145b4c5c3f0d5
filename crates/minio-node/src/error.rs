use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid admin endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error(transparent)]
    Minio(#[from] proven_minio::Error),
}

impl From<proven_minio::ConfigError> for Error {
    fn from(error: proven_minio::ConfigError) -> Self {
        Self::Minio(error.into())
    }
}
