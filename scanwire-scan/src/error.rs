use std::{error::Error, fmt::Display, io};

use scanwire_client::TransportError;
use scanwire_protocol::Status;

/// Misuse of a [`Realigner`](crate::realign::Realigner).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RealignError {
    /// The line width is zero or not a whole number of RGB pixels.
    InvalidGeometry(String),
    OutOfMemory { requested: usize },
    NotInitialized,
    /// Offsets can only change before the first byte is pushed.
    AlreadyStreaming,
    /// The offsets need more history than the ring was sized for.
    OffsetsExceedRing { needed: usize, available: usize },
    LineNotReady,
    OutputTooSmall { needed: usize, got: usize },
}

impl Display for RealignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealignError::InvalidGeometry(reason) => write!(f, "Invalid line geometry: {}", reason),
            RealignError::OutOfMemory { requested } => {
                write!(f, "Cannot allocate {} bytes of ring storage", requested)
            }
            RealignError::NotInitialized => write!(f, "Ring buffer is not initialized"),
            RealignError::AlreadyStreaming => {
                write!(f, "Channel offsets cannot change while lines are buffered")
            }
            RealignError::OffsetsExceedRing { needed, available } => write!(
                f,
                "Channel offsets need a ring depth of {}, but only {} is available",
                needed, available
            ),
            RealignError::LineNotReady => write!(f, "No realigned line is ready yet"),
            RealignError::OutputTooSmall { needed, got } => write!(
                f,
                "Output buffer too small! Need {} bytes, but got {}",
                needed, got
            ),
        }
    }
}

impl Error for RealignError {}

/// Errors that end or refuse a scan session operation.
#[derive(Debug)]
pub enum ScanError {
    Transport(TransportError),
    Realign(RealignError),
    /// The advisory device lock could not be taken or released.
    Lock(io::Error),
    /// The device answered with a status other than good.
    Device(Status),
    /// The scan was cancelled. The session can still send commands.
    Cancelled,
    NotStarted,
    /// A scan is in progress and owns the channel.
    InProgress,
    /// The session was aborted after a fatal error or closed.
    Closed,
}

impl ScanError {
    /// Transport, realignment and lock failures end the session they occur in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::Transport(_) | ScanError::Realign(_) | ScanError::Lock(_)
        )
    }
}

impl From<TransportError> for ScanError {
    fn from(value: TransportError) -> Self {
        ScanError::Transport(value)
    }
}

impl From<RealignError> for ScanError {
    fn from(value: RealignError) -> Self {
        ScanError::Realign(value)
    }
}

impl Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::Transport(error) => write!(f, "{}", error),
            ScanError::Realign(error) => write!(f, "{}", error),
            ScanError::Lock(error) => write!(f, "Device lock failed: {}", error),
            ScanError::Device(status) => write!(f, "Device reported: {}", status),
            ScanError::Cancelled => write!(f, "Scan was cancelled"),
            ScanError::NotStarted => write!(f, "No scan has been started"),
            ScanError::InProgress => write!(f, "A scan is in progress"),
            ScanError::Closed => write!(f, "Scan session is closed"),
        }
    }
}

impl Error for ScanError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ScanError::Transport(error) => Some(error),
            ScanError::Realign(error) => Some(error),
            ScanError::Lock(error) => Some(error),
            _ => None,
        }
    }
}
