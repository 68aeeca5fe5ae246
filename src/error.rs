use std::{io, path::PathBuf};

use thiserror::Error;

/// Everything that can stop a render before the image reaches disk.
#[derive(Error, Debug)]
pub enum Error {
    #[error("sample grid must be at least 2x2, got {width}x{height}")]
    InvalidDimension { width: u32, height: u32 },

    #[error("invalid plane bounds: {0}")]
    InvalidBounds(String),

    #[error("max_iterations must be at least 1")]
    InvalidIterationBound,

    #[error("no compute device available: {0}")]
    NoDeviceAvailable(String),

    #[error("kernel build failed: {0}")]
    BuildError(String),

    #[error("buffer allocation failed: {0}")]
    BufferAllocationError(String),

    #[error("dispatch failed: {0}")]
    DispatchError(String),

    #[error("failed to write {}: {source}", .path.display())]
    FileWriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode bitmap: {0}")]
    EncodeError(#[source] io::Error),

    #[error("malformed bitmap: {0}")]
    MalformedBitmap(String),
}

pub type Result<A> = std::result::Result<A, Error>;
