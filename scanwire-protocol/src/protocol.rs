use std::fmt::Display;

/// Magic tag at the start of every primary header ("IS").
pub const MAGIC: [u8; 2] = *b"IS";

/// Size of the primary header that precedes every request and reply.
pub const PRIMARY_HEADER_LEN: usize = 12;

/// Size of the secondary header carried by [`Command::has_secondary_header`] commands.
pub const SECONDARY_HEADER_LEN: usize = 8;

/// Fixed word at offset 4 of every primary header.
pub(crate) const HEADER_WORD: u16 = 0x000C;

/// A 16-bit command code.
///
/// Commands whose high byte is `0x20` carry a secondary header and a payload.
/// All other commands are sent as a bare primary header.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Command(u16);

impl Command {
    /// Carries a device command block in the payload. The reply holds the data
    /// the device returns for that block.
    pub const PASSTHROUGH: Command = Command(0x2000);
    /// Claims exclusive access to the device. The reply is one status byte.
    pub const LOCK: Command = Command(0x2100);
    /// Releases exclusive access to the device. The reply is one status byte.
    pub const UNLOCK: Command = Command(0x2101);

    pub const fn new(code: u16) -> Command {
        Command(code)
    }

    /// The raw command code
    pub const fn code(&self) -> u16 {
        self.0
    }

    /// Whether a secondary header (payload size, reply size) and a payload follow
    /// the primary header.
    pub const fn has_secondary_header(&self) -> bool {
        self.0 >> 8 == 0x20
    }
}

impl From<u16> for Command {
    fn from(value: u16) -> Self {
        Command(value)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Command::PASSTHROUGH => write!(f, "passthrough"),
            Command::LOCK => write!(f, "lock"),
            Command::UNLOCK => write!(f, "unlock"),
            Command(code) => write!(f, "0x{:04x}", code),
        }
    }
}

#[test]
fn secondary_header_commands() {
    assert!(Command::PASSTHROUGH.has_secondary_header());
    assert!(Command::new(0x20ff).has_secondary_header());
    assert!(!Command::LOCK.has_secondary_header());
    assert!(!Command::UNLOCK.has_secondary_header());
    assert!(!Command::new(0x0020).has_secondary_header());
}

/// The 12-byte header in front of every frame.
///
/// On requests, `length` counts the secondary header plus the payload and is
/// only non-zero for commands with a secondary header.
/// On replies, `length` is the size of the reply payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PrimaryHeader {
    magic: [u8; 2],
    command: Command,
    length: u32,
}

impl PrimaryHeader {
    pub fn new(command: Command, length: u32) -> PrimaryHeader {
        PrimaryHeader {
            magic: MAGIC,
            command,
            length,
        }
    }

    pub(crate) fn with_magic(magic: [u8; 2], command: Command, length: u32) -> PrimaryHeader {
        PrimaryHeader {
            magic,
            command,
            length,
        }
    }

    /// Header of a request for `command` that carries `payload_len` payload bytes.
    pub fn for_request(command: Command, payload_len: u32) -> PrimaryHeader {
        let length = if command.has_secondary_header() {
            SECONDARY_HEADER_LEN as u32 + payload_len
        } else {
            0
        };
        PrimaryHeader::new(command, length)
    }

    /// The magic tag as received. Only headers built by this crate are guaranteed
    /// to carry [`MAGIC`].
    pub fn magic(&self) -> [u8; 2] {
        self.magic
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn length(&self) -> u32 {
        self.length
    }
}

/// The 8-byte header that follows the primary header for `0x20xx` commands.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct SecondaryHeader {
    /// Number of payload bytes following this header
    pub payload_size: u32,
    /// Number of bytes the device is expected to send back
    pub reply_size: u32,
}

/// A request sent from the host to the scanner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub command: Command,
    /// Payload bytes. Always empty for commands without a secondary header.
    pub payload: Box<[u8]>,
    /// The size of the reply the host expects for this request.
    pub reply_size: u32,
}

impl Request {
    pub fn new(command: Command, payload: impl Into<Box<[u8]>>, reply_size: u32) -> Request {
        Request {
            command,
            payload: payload.into(),
            reply_size,
        }
    }

    /// Total number of bytes this request occupies on the wire.
    pub fn wire_size(&self) -> usize {
        if self.command.has_secondary_header() {
            PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN + self.payload.len()
        } else {
            PRIMARY_HEADER_LEN
        }
    }
}

/// A reply sent from the scanner back to the host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reply {
    /// The command this reply answers
    pub command: Command,
    pub payload: Box<[u8]>,
}

impl Reply {
    pub fn new(command: Command, payload: impl Into<Box<[u8]>>) -> Reply {
        Reply {
            command,
            payload: payload.into(),
        }
    }

    /// A one-byte reply carrying `status`, as sent for lock and unlock.
    pub fn status(command: Command, status: Status) -> Reply {
        Reply::new(command, vec![status.code()])
    }
}

/// Status code reported by the device in one-byte replies.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Status {
    Good,
    Unsupported,
    Cancelled,
    DeviceBusy,
    Invalid,
    Eof,
    Jammed,
    NoDocs,
    CoverOpen,
    IoError,
    NoMem,
    AccessDenied,
    Unknown(u8),
}

impl Status {
    pub fn code(&self) -> u8 {
        match self {
            Status::Good => 0,
            Status::Unsupported => 1,
            Status::Cancelled => 2,
            Status::DeviceBusy => 3,
            Status::Invalid => 4,
            Status::Eof => 5,
            Status::Jammed => 6,
            Status::NoDocs => 7,
            Status::CoverOpen => 8,
            Status::IoError => 9,
            Status::NoMem => 10,
            Status::AccessDenied => 11,
            Status::Unknown(code) => *code,
        }
    }

    pub fn is_good(&self) -> bool {
        *self == Status::Good
    }
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        match value {
            0 => Status::Good,
            1 => Status::Unsupported,
            2 => Status::Cancelled,
            3 => Status::DeviceBusy,
            4 => Status::Invalid,
            5 => Status::Eof,
            6 => Status::Jammed,
            7 => Status::NoDocs,
            8 => Status::CoverOpen,
            9 => Status::IoError,
            10 => Status::NoMem,
            11 => Status::AccessDenied,
            other => Status::Unknown(other),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Good => write!(f, "success"),
            Status::Unsupported => write!(f, "operation not supported"),
            Status::Cancelled => write!(f, "operation was cancelled"),
            Status::DeviceBusy => write!(f, "device busy"),
            Status::Invalid => write!(f, "invalid argument"),
            Status::Eof => write!(f, "no more data available"),
            Status::Jammed => write!(f, "document feeder jammed"),
            Status::NoDocs => write!(f, "document feeder out of documents"),
            Status::CoverOpen => write!(f, "scanner cover is open"),
            Status::IoError => write!(f, "error during device I/O"),
            Status::NoMem => write!(f, "out of memory"),
            Status::AccessDenied => write!(f, "access to resource has been denied"),
            Status::Unknown(code) => write!(f, "unknown status {}", code),
        }
    }
}

#[test]
fn status_codes_are_stable() {
    for code in 0..=u8::MAX {
        assert_eq!(Status::from(code).code(), code);
    }
    assert_eq!(Status::from(3), Status::DeviceBusy);
    assert!(matches!(Status::from(200), Status::Unknown(200)));
}
