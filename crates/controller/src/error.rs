use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("store error: {0}")]
    Store(#[from] common::StoreError),

    #[error("runtime error: {0}")]
    Runtime(#[from] docker::DockerError),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
