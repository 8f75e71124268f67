use crate::identity::{CategorySupport, DeviceIdentity};
use crate::muid::Muid;

/// SysEx framing bytes.
pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;
pub const UNIVERSAL_NON_REALTIME: u8 = 0x7E;
pub const SUB_ID_CI: u8 = 0x0D;
pub const DEVICE_ID_BROADCAST: u8 = 0x7F;

/// Minimum length of any CI SysEx message:
/// `F0 7E <devId> 0D <msgType> <ciVersion> <src:4> <dst:4> F7`.
pub const MIN_MESSAGE_LEN: usize = 17;

/// CI message type byte values (`<msgType>` in the framing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    DiscoveryInquiry,
    DiscoveryReply,
    InvalidateMuid,
    Nak,
    PeCapabilityInquiry,
    PeCapabilityReply,
    PeGetInquiry,
    PeGetReply,
    PeSetInquiry,
    PeSetReply,
    PeSubscribeInquiry,
    PeSubscribeReply,
    PeNotify,
    ProcessInquiry(u8),
    Unknown(u8),
}

impl MessageType {
    pub fn to_byte(self) -> u8 {
        match self {
            MessageType::DiscoveryInquiry => 0x70,
            MessageType::DiscoveryReply => 0x71,
            MessageType::InvalidateMuid => 0x7E,
            MessageType::Nak => 0x7F,
            MessageType::PeCapabilityInquiry => 0x30,
            MessageType::PeCapabilityReply => 0x31,
            MessageType::PeGetInquiry => 0x34,
            MessageType::PeGetReply => 0x35,
            MessageType::PeSetInquiry => 0x36,
            MessageType::PeSetReply => 0x37,
            MessageType::PeSubscribeInquiry => 0x38,
            MessageType::PeSubscribeReply => 0x39,
            MessageType::PeNotify => 0x3F,
            MessageType::ProcessInquiry(b) => b,
            MessageType::Unknown(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> MessageType {
        match b {
            0x70 => MessageType::DiscoveryInquiry,
            0x71 => MessageType::DiscoveryReply,
            0x7E => MessageType::InvalidateMuid,
            0x7F => MessageType::Nak,
            0x30 => MessageType::PeCapabilityInquiry,
            0x31 => MessageType::PeCapabilityReply,
            0x34 => MessageType::PeGetInquiry,
            0x35 => MessageType::PeGetReply,
            0x36 => MessageType::PeSetInquiry,
            0x37 => MessageType::PeSetReply,
            0x38 => MessageType::PeSubscribeInquiry,
            0x39 => MessageType::PeSubscribeReply,
            0x3F => MessageType::PeNotify,
            0x40..=0x44 => MessageType::ProcessInquiry(b),
            other => MessageType::Unknown(other),
        }
    }
}

/// The common CI envelope shared by every message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiHeader {
    pub device_id: u8,
    pub message_type: MessageType,
    pub ci_version: u8,
    pub source_muid: Muid,
    pub destination_muid: Muid,
}

/// Body of a Discovery Inquiry or Discovery Reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryBody {
    pub identity: DeviceIdentity,
    pub category_support: CategorySupport,
    pub max_sysex_size: u32,
    pub initiator_output_path: u8,
    pub function_block: u8,
}

/// The union result of parsing a PE reply (Get Reply, Set Reply, or Subscribe Reply).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeReplyBody {
    pub request_id: u8,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
    pub num_chunks: u16,
    pub this_chunk: u16,
}

/// Body of a PE Get or Set Inquiry (the Get variant has no chunk fields).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeGetInquiryBody {
    pub request_id: u8,
    pub header: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeSetInquiryBody {
    pub request_id: u8,
    pub header: Vec<u8>,
    pub num_chunks: u16,
    pub this_chunk: u16,
    pub property_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeSubscribeInquiryBody {
    pub request_id: u8,
    pub header: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeNotifyBody {
    pub request_id: u8,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeCapabilityBody {
    pub major_version: u8,
    pub minor_version: u8,
    pub max_simultaneous_requests: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NakBody {
    pub original_transaction: u8,
    pub status: u8,
    pub status_data: u8,
    pub details: Option<[u8; 5]>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidateMuidBody {
    pub target_muid: Muid,
}

/// Total, structured result of parsing any CI SysEx message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage {
    DiscoveryInquiry(CiHeader, DiscoveryBody),
    DiscoveryReply(CiHeader, DiscoveryBody),
    InvalidateMuid(CiHeader, InvalidateMuidBody),
    Nak(CiHeader, NakBody),
    PeCapabilityInquiry(CiHeader, PeCapabilityBody),
    PeCapabilityReply(CiHeader, PeCapabilityBody),
    PeGetInquiry(CiHeader, PeGetInquiryBody),
    PeGetReply(CiHeader, PeReplyBody),
    PeSetInquiry(CiHeader, PeSetInquiryBody),
    PeSetReply(CiHeader, PeReplyBody),
    PeSubscribeInquiry(CiHeader, PeSubscribeInquiryBody),
    PeSubscribeReply(CiHeader, PeReplyBody),
    PeNotify(CiHeader, PeNotifyBody),
    /// Process Inquiry family (`0x40..0x44`): recognized and round-tripped as
    /// an opaque payload. Transaction semantics are out of scope (spec §1).
    ProcessInquiry(CiHeader, Vec<u8>),
}

impl ParsedMessage {
    pub fn header(&self) -> &CiHeader {
        match self {
            ParsedMessage::DiscoveryInquiry(h, _)
            | ParsedMessage::DiscoveryReply(h, _)
            | ParsedMessage::InvalidateMuid(h, _)
            | ParsedMessage::Nak(h, _)
            | ParsedMessage::PeCapabilityInquiry(h, _)
            | ParsedMessage::PeCapabilityReply(h, _)
            | ParsedMessage::PeGetInquiry(h, _)
            | ParsedMessage::PeGetReply(h, _)
            | ParsedMessage::PeSetInquiry(h, _)
            | ParsedMessage::PeSetReply(h, _)
            | ParsedMessage::PeSubscribeInquiry(h, _)
            | ParsedMessage::PeSubscribeReply(h, _)
            | ParsedMessage::PeNotify(h, _)
            | ParsedMessage::ProcessInquiry(h, _) => h,
        }
    }
}
