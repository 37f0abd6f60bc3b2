use std::{
    error::Error,
    fmt::Display,
    io::{self},
};

/// Errors that may occur when reading a frame from a stream.
#[derive(Debug)]
pub enum ReadError {
    IoError(io::Error),
    /// The primary header did not start with the expected magic tag.
    InvalidMagic([u8; 2]),
    /// The frame is structurally malformed, e.g. the header lengths disagree.
    InvalidFormat(String),
    TooManyBytes { max: usize, got: usize },
}

impl From<io::Error> for ReadError {
    fn from(value: io::Error) -> Self {
        ReadError::IoError(value)
    }
}

impl Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::IoError(error) => write!(f, "{}", error),
            ReadError::InvalidMagic(magic) => {
                write!(f, "Received frame with invalid magic {:02x?}", magic)
            }
            ReadError::InvalidFormat(format) => write!(f, "{}", format),
            ReadError::TooManyBytes { max, got } => {
                write!(f, "Frame too large! Maximum is {}, but got {}", max, got)
            }
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadError::IoError(error) => Some(error),
            _ => None,
        }
    }
}
