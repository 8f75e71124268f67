//! Construction of CI/PE SysEx messages.

use super::message::*;
use crate::identity::{CategorySupport, DeviceIdentity};
use crate::muid::{encode_u14, Muid};

fn push_envelope(out: &mut Vec<u8>, device_id: u8, message_type: MessageType, ci_version: u8, source: Muid, destination: Muid) {
    out.push(SYSEX_START);
    out.push(UNIVERSAL_NON_REALTIME);
    out.push(device_id);
    out.push(SUB_ID_CI);
    out.push(message_type.to_byte());
    out.push(ci_version);
    out.extend_from_slice(&source.to_limbs());
    out.extend_from_slice(&destination.to_limbs());
}

fn finish(mut out: Vec<u8>) -> Vec<u8> {
    out.push(SYSEX_END);
    out
}

fn discovery_body_bytes(identity: &DeviceIdentity, category: CategorySupport, max_sysex: u32, initiator_output_path: u8, function_block: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(18);
    out.extend_from_slice(&identity.encode());
    out.push(category.bits());
    let max = crate::muid::encode_u28(max_sysex);
    out.extend_from_slice(&max);
    out.push(initiator_output_path & 0x7F);
    out.push(function_block & 0x7F);
    out
}

/// Build a Discovery Inquiry, addressed to the broadcast MUID per convention.
pub fn build_discovery_inquiry(
    source: Muid,
    identity: &DeviceIdentity,
    category: CategorySupport,
    max_sysex: u32,
    ci_version: u8,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    push_envelope(&mut out, DEVICE_ID_BROADCAST, MessageType::DiscoveryInquiry, ci_version, source, Muid::broadcast());
    out.extend(discovery_body_bytes(identity, category, max_sysex, 0, 0));
    finish(out)
}

/// Build a Discovery Reply addressed back to the inquiring MUID.
pub fn build_discovery_reply(
    source: Muid,
    destination: Muid,
    identity: &DeviceIdentity,
    category: CategorySupport,
    max_sysex: u32,
    initiator_output_path: u8,
    function_block: u8,
    ci_version: u8,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    push_envelope(&mut out, DEVICE_ID_BROADCAST, MessageType::DiscoveryReply, ci_version, source, destination);
    out.extend(discovery_body_bytes(identity, category, max_sysex, initiator_output_path, function_block));
    finish(out)
}

/// Build an Invalidate MUID message. `target` is broadcast to invalidate the
/// sender's own MUID and request re-discovery, or a specific MUID to evict.
pub fn build_invalidate_muid(source: Muid, target: Muid, ci_version: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    push_envelope(&mut out, DEVICE_ID_BROADCAST, MessageType::InvalidateMuid, ci_version, source, Muid::broadcast());
    out.extend_from_slice(&target.to_limbs());
    finish(out)
}

/// Build a NAK in response to a malformed or unsupported message.
pub fn build_nak(
    source: Muid,
    destination: Muid,
    original_transaction: u8,
    status: u8,
    status_data: u8,
    details: Option<[u8; 5]>,
    message: Option<&str>,
    ci_version: u8,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    push_envelope(&mut out, DEVICE_ID_BROADCAST, MessageType::Nak, ci_version, source, destination);
    out.push(original_transaction & 0x7F);
    out.push(status);
    out.push(status_data);
    if let Some(d) = details {
        out.extend_from_slice(&d);
        let msg_bytes = message.unwrap_or("").as_bytes();
        out.extend_from_slice(&encode_u14(msg_bytes.len() as u16));
        out.extend_from_slice(msg_bytes);
    }
    finish(out)
}

/// Build a PE Capability Inquiry.
pub fn build_pe_capability_inquiry(source: Muid, destination: Muid, major: u8, minor: u8, max_requests: u8, ci_version: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    push_envelope(&mut out, DEVICE_ID_BROADCAST, MessageType::PeCapabilityInquiry, ci_version, source, destination);
    out.push(major & 0x7F);
    out.push(minor & 0x7F);
    out.push(max_requests & 0x7F);
    finish(out)
}

/// Build a PE Capability Reply.
pub fn build_pe_capability_reply(source: Muid, destination: Muid, major: u8, minor: u8, max_requests: u8, ci_version: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    push_envelope(&mut out, DEVICE_ID_BROADCAST, MessageType::PeCapabilityReply, ci_version, source, destination);
    out.push(major & 0x7F);
    out.push(minor & 0x7F);
    out.push(max_requests & 0x7F);
    finish(out)
}

/// Build a PE Get Inquiry: `requestId | headerLen | headerData`.
pub fn build_pe_get_inquiry(source: Muid, destination: Muid, request_id: u8, header: &[u8], ci_version: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + header.len());
    push_envelope(&mut out, DEVICE_ID_BROADCAST, MessageType::PeGetInquiry, ci_version, source, destination);
    out.push(request_id & 0x7F);
    out.extend_from_slice(&encode_u14(header.len() as u16));
    out.extend_from_slice(header);
    finish(out)
}

/// Build a PE Set Inquiry: `requestId | headerLen | headerData | numChunks | thisChunk | dataLen | propertyData`.
pub fn build_pe_set_inquiry(
    source: Muid,
    destination: Muid,
    request_id: u8,
    header: &[u8],
    num_chunks: u16,
    this_chunk: u16,
    property_data: &[u8],
    ci_version: u8,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + header.len() + property_data.len());
    push_envelope(&mut out, DEVICE_ID_BROADCAST, MessageType::PeSetInquiry, ci_version, source, destination);
    out.push(request_id & 0x7F);
    out.extend_from_slice(&encode_u14(header.len() as u16));
    out.extend_from_slice(header);
    out.extend_from_slice(&encode_u14(num_chunks));
    out.extend_from_slice(&encode_u14(this_chunk));
    out.extend_from_slice(&encode_u14(property_data.len() as u16));
    out.extend_from_slice(property_data);
    finish(out)
}

/// Build a PE Subscribe Inquiry: same shape as a Get Inquiry.
pub fn build_pe_subscribe_inquiry(source: Muid, destination: Muid, request_id: u8, header: &[u8], ci_version: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + header.len());
    push_envelope(&mut out, DEVICE_ID_BROADCAST, MessageType::PeSubscribeInquiry, ci_version, source, destination);
    out.push(request_id & 0x7F);
    out.extend_from_slice(&encode_u14(header.len() as u16));
    out.extend_from_slice(header);
    finish(out)
}

/// Build a PE Notify message: `requestId | headerLen | headerData | dataLen | propertyData`
/// (a degenerate single-chunk reply shape, reusing the CI 1.1 compact layout).
pub fn build_pe_notify(source: Muid, destination: Muid, request_id: u8, header: &[u8], body: &[u8], ci_version: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + header.len() + body.len());
    push_envelope(&mut out, DEVICE_ID_BROADCAST, MessageType::PeNotify, ci_version, source, destination);
    out.push(request_id & 0x7F);
    out.extend_from_slice(&encode_u14(header.len() as u16));
    out.extend_from_slice(&encode_u14(body.len() as u16));
    out.extend_from_slice(header);
    out.extend_from_slice(body);
    finish(out)
}

/// Build a standard (CI 1.2) PE reply: Get Reply, Set Reply, or Subscribe Reply.
fn build_pe_reply(message_type: MessageType, source: Muid, destination: Muid, request_id: u8, header: &[u8], body: &[u8], num_chunks: u16, this_chunk: u16, ci_version: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + header.len() + body.len());
    push_envelope(&mut out, DEVICE_ID_BROADCAST, message_type, ci_version, source, destination);
    out.push(request_id & 0x7F);
    out.extend_from_slice(&encode_u14(header.len() as u16));
    out.extend_from_slice(&encode_u14(num_chunks));
    out.extend_from_slice(&encode_u14(this_chunk));
    out.extend_from_slice(&encode_u14(body.len() as u16));
    out.extend_from_slice(header);
    out.extend_from_slice(body);
    finish(out)
}

pub fn build_pe_get_reply(source: Muid, destination: Muid, request_id: u8, header: &[u8], body: &[u8], num_chunks: u16, this_chunk: u16, ci_version: u8) -> Vec<u8> {
    build_pe_reply(MessageType::PeGetReply, source, destination, request_id, header, body, num_chunks, this_chunk, ci_version)
}

pub fn build_pe_set_reply(source: Muid, destination: Muid, request_id: u8, header: &[u8], ci_version: u8) -> Vec<u8> {
    build_pe_reply(MessageType::PeSetReply, source, destination, request_id, header, &[], 1, 1, ci_version)
}

pub fn build_pe_subscribe_reply(source: Muid, destination: Muid, request_id: u8, header: &[u8], ci_version: u8) -> Vec<u8> {
    build_pe_reply(MessageType::PeSubscribeReply, source, destination, request_id, header, &[], 1, 1, ci_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_inquiry_matches_spec_example() {
        // spec §8 scenario 1: sourceMuid=0x01234567, categorySupport={propertyExchange}, maxSysExSize=0
        let source = Muid::new(0x01234567 & crate::muid::MUID_MAX).unwrap();
        let identity = DeviceIdentity::default();
        let bytes = build_discovery_inquiry(source, &identity, CategorySupport::PROPERTY_EXCHANGE, 0, 1);
        assert_eq!(bytes[0], 0xF0);
        assert_eq!(bytes[1], 0x7E);
        assert_eq!(bytes[2], 0x7F);
        assert_eq!(bytes[3], 0x0D);
        assert_eq!(bytes[4], 0x70);
        assert_eq!(bytes[5], 0x01);
        assert_eq!(*bytes.last().unwrap(), 0xF7);
    }
}
