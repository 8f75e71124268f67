use thiserror::Error;

/// Crate-wide error type for MIDI-CI / Property Exchange operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A MUID value exceeded the 28-bit range (`> 0x0FFF_FFFF`).
    #[error("muid {0:#010x} exceeds the 28-bit range")]
    MuidOutOfRange(u32),

    /// SysEx framing did not start with `F0` and end with `F7`, or was
    /// shorter than the minimum 17-byte CI message.
    #[error("invalid SysEx framing: {0}")]
    InvalidFraming(&'static str),

    /// A payload was shorter than the minimum required for its claimed layout.
    #[error("payload too short: {0}")]
    PayloadTooShort(&'static str),

    /// A claimed length field pointed past the remaining buffer.
    #[error("claimed length exceeds remaining payload")]
    LengthOutOfBounds,

    /// A byte with its MSB set was found in a 7-bit payload region.
    #[error("non-7-bit byte {0:#04x} found in payload")]
    NonSevenBit(u8),

    /// None of the three PE reply dialects parsed successfully.
    #[error("unrecognized PE reply dialect")]
    UnrecognizedReplyDialect,

    /// An unknown or unsupported CI message type byte.
    #[error("unknown CI message type {0:#04x}")]
    UnknownMessageType(u8),

    /// Header bytes were not valid UTF-8 / JSON where a JSON header was expected.
    #[error("invalid property exchange header: {0}")]
    InvalidHeader(String),

    /// The 7-bit Request ID pool has no free or cooling IDs available.
    #[error("request ID pool exhausted")]
    RequestIdExhausted,

    /// A request did not receive a complete reply before its deadline.
    #[error("request for resource {0:?} timed out")]
    Timeout(Option<String>),

    /// A caller-initiated or shutdown-initiated cancellation.
    #[error("request cancelled")]
    Cancelled,

    /// The remote device replied with a protocol-level error status.
    #[error("device error: status {status}{}", message.as_ref().map(|m| format!(" ({m})")).unwrap_or_default())]
    DeviceError {
        status: u16,
        message: Option<String>,
    },

    /// No device table entry exists for the given MUID.
    #[error("device {0:#010x} not found")]
    DeviceNotFound(u32),

    /// A reply did not match the shape expected for the outstanding request.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The transport rejected a send or could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// Endpoint resolution could not find a safe destination for a device;
    /// the caller MUST NOT guess and send to an unrelated port.
    #[error("no destination endpoint resolved for device")]
    NoDestination,

    /// A subscription could not be established or restored.
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Configuration values were internally inconsistent (e.g. framer
    /// ceiling below the 1 KiB floor).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
