use std::{error::Error, fmt::Display, io};

/// Errors reported by [`ScanClient`](crate::ScanClient).
#[derive(Debug)]
pub enum TransportError {
    /// The channel failed. The scan session cannot continue.
    Io(io::Error),
    /// A reply header carried the wrong magic tag and strict checking is enabled.
    BadMagic([u8; 2]),
    /// The declared reply size matches neither the requested size nor the size
    /// announced with the command. The reply payload has been discarded.
    SizeMismatch { declared: usize, wanted: usize },
    /// The expected reply exceeds the configured maximum.
    ReplyTooLarge { max: usize, got: usize },
    /// A frame or reply buffer could not be allocated.
    OutOfMemory { requested: usize },
    /// A reply header declared more than the configured maximum. The payload
    /// was left on the channel, so the frame boundaries are lost.
    LostSync { declared: usize, max: usize },
}

impl TransportError {
    /// Whether the channel is unusable after this error.
    ///
    /// The other errors are raised before anything is sent or after the
    /// stream has been brought back to a frame boundary.
    pub fn is_channel_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::BadMagic(_) | TransportError::LostSync { .. }
        )
    }
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        TransportError::Io(value)
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(error) => write!(f, "{}", error),
            TransportError::BadMagic(magic) => {
                write!(f, "Received reply with invalid magic {:02x?}", magic)
            }
            TransportError::SizeMismatch { declared, wanted } => write!(
                f,
                "Device replied with {} bytes, but {} were requested",
                declared, wanted
            ),
            TransportError::ReplyTooLarge { max, got } => {
                write!(f, "Reply too large! Maximum is {}, but got {}", max, got)
            }
            TransportError::OutOfMemory { requested } => {
                write!(f, "Cannot allocate {} bytes", requested)
            }
            TransportError::LostSync { declared, max } => write!(
                f,
                "Reply declares {} bytes, more than the maximum of {}; lost frame sync",
                declared, max
            ),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::Io(error) => Some(error),
            _ => None,
        }
    }
}
