use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MjpegError {
    #[error("boundary marker must not be empty")]
    EmptyBoundary,

    #[error("buffer capacity must be greater than zero")]
    ZeroCapacity,
}
