//! Parsing of CI/PE SysEx messages. Every function here is total: it never
//! panics, never reads past declared lengths, and rejects non-7-bit bytes,
//! truncated claims, and bad framing by returning `Err`.

use super::message::*;
use crate::error::{Error, Result};
use crate::identity::{CategorySupport, DeviceIdentity};
use crate::muid::{decode_u14, Muid};

fn check_seven_bit(payload: &[u8]) -> Result<()> {
    for &b in payload {
        if b & 0x80 != 0 {
            return Err(Error::NonSevenBit(b));
        }
    }
    Ok(())
}

fn take(payload: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    payload
        .get(offset..offset + len)
        .ok_or(Error::LengthOutOfBounds)
}

fn take_u14(payload: &[u8], offset: usize) -> Result<(u16, usize)> {
    let span = take(payload, offset, 2)?;
    Ok((decode_u14([span[0], span[1]])?, offset + 2))
}

/// Parse the common envelope and split off the raw payload span (everything
/// between the destination MUID and the terminating `F7`, exclusive).
fn parse_envelope(bytes: &[u8]) -> Result<(CiHeader, &[u8])> {
    if bytes.len() < MIN_MESSAGE_LEN {
        return Err(Error::PayloadTooShort("message shorter than minimum CI envelope"));
    }
    if bytes[0] != SYSEX_START {
        return Err(Error::InvalidFraming("missing F0 start byte"));
    }
    if *bytes.last().unwrap() != SYSEX_END {
        return Err(Error::InvalidFraming("missing F7 end byte"));
    }
    if bytes[1] != UNIVERSAL_NON_REALTIME {
        return Err(Error::InvalidFraming("not a Universal Non-Realtime message"));
    }
    if bytes[3] != SUB_ID_CI {
        return Err(Error::InvalidFraming("not a MIDI-CI sub-ID"));
    }
    let device_id = bytes[2];
    let message_type = MessageType::from_byte(bytes[4]);
    let ci_version = bytes[5];
    let source_muid = Muid::from_limbs([bytes[6], bytes[7], bytes[8], bytes[9]])?;
    let destination_muid = Muid::from_limbs([bytes[10], bytes[11], bytes[12], bytes[13]])?;
    let payload = &bytes[14..bytes.len() - 1];
    check_seven_bit(payload)?;
    Ok((
        CiHeader {
            device_id,
            message_type,
            ci_version,
            source_muid,
            destination_muid,
        },
        payload,
    ))
}

fn parse_discovery_body(payload: &[u8]) -> Result<DiscoveryBody> {
    if payload.len() < 12 {
        return Err(Error::PayloadTooShort("discovery body requires at least identity + category"));
    }
    let identity = DeviceIdentity::decode(&payload[0..11])?;
    let category = CategorySupport::from_bits_truncate(payload[11]);
    let (max_sysex_size, initiator_output_path, function_block) = if payload.len() >= 16 {
        let max = crate::muid::decode_u28([payload[12], payload[13], payload[14], payload[15]])?;
        let initiator_output_path = payload.get(16).copied().unwrap_or(0);
        let function_block = payload.get(17).copied().unwrap_or(0);
        (max, initiator_output_path, function_block)
    } else {
        (0, 0, 0)
    };
    Ok(DiscoveryBody {
        identity,
        category_support: category,
        max_sysex_size,
        initiator_output_path,
        function_block,
    })
}

/// Parse any CI SysEx message into its structured, total union.
pub fn parse(bytes: &[u8]) -> Result<ParsedMessage> {
    let (header, payload) = parse_envelope(bytes)?;
    match header.message_type {
        MessageType::DiscoveryInquiry => Ok(ParsedMessage::DiscoveryInquiry(header.clone(), parse_discovery_body(payload)?)),
        MessageType::DiscoveryReply => Ok(ParsedMessage::DiscoveryReply(header.clone(), parse_discovery_body(payload)?)),
        MessageType::InvalidateMuid => {
            if payload.len() < 4 {
                return Err(Error::PayloadTooShort("invalidate MUID requires 4 bytes"));
            }
            let target_muid = Muid::from_limbs([payload[0], payload[1], payload[2], payload[3]])?;
            Ok(ParsedMessage::InvalidateMuid(header.clone(), InvalidateMuidBody { target_muid }))
        }
        MessageType::Nak => Ok(ParsedMessage::Nak(header.clone(), parse_nak_body(payload)?)),
        MessageType::PeCapabilityInquiry => Ok(ParsedMessage::PeCapabilityInquiry(header.clone(), parse_capability_body(payload)?)),
        MessageType::PeCapabilityReply => Ok(ParsedMessage::PeCapabilityReply(header.clone(), parse_capability_body(payload)?)),
        MessageType::PeGetInquiry => Ok(ParsedMessage::PeGetInquiry(header.clone(), parse_get_inquiry_body(payload)?)),
        MessageType::PeGetReply => Ok(ParsedMessage::PeGetReply(header.clone(), parse_pe_reply_body(payload)?)),
        MessageType::PeSetInquiry => Ok(ParsedMessage::PeSetInquiry(header.clone(), parse_set_inquiry_body(payload)?)),
        MessageType::PeSetReply => Ok(ParsedMessage::PeSetReply(header.clone(), parse_pe_reply_body(payload)?)),
        MessageType::PeSubscribeInquiry => Ok(ParsedMessage::PeSubscribeInquiry(header.clone(), parse_subscribe_inquiry_body(payload)?)),
        MessageType::PeSubscribeReply => Ok(ParsedMessage::PeSubscribeReply(header.clone(), parse_pe_reply_body(payload)?)),
        MessageType::PeNotify => Ok(ParsedMessage::PeNotify(header.clone(), parse_notify_body(payload)?)),
        MessageType::ProcessInquiry(_) => Ok(ParsedMessage::ProcessInquiry(header.clone(), payload.to_vec())),
        MessageType::Unknown(b) => Err(Error::UnknownMessageType(b)),
    }
}

fn parse_capability_body(payload: &[u8]) -> Result<PeCapabilityBody> {
    if payload.len() < 3 {
        return Err(Error::PayloadTooShort("PE capability requires 3 bytes"));
    }
    Ok(PeCapabilityBody {
        major_version: payload[0],
        minor_version: payload[1],
        max_simultaneous_requests: payload[2],
    })
}

fn parse_get_inquiry_body(payload: &[u8]) -> Result<PeGetInquiryBody> {
    if payload.is_empty() {
        return Err(Error::PayloadTooShort("PE get inquiry requires a request ID"));
    }
    let request_id = payload[0] & 0x7F;
    let (header_len, off) = take_u14(payload, 1)?;
    let header = take(payload, off, header_len as usize)?.to_vec();
    Ok(PeGetInquiryBody { request_id, header })
}

fn parse_set_inquiry_body(payload: &[u8]) -> Result<PeSetInquiryBody> {
    if payload.is_empty() {
        return Err(Error::PayloadTooShort("PE set inquiry requires a request ID"));
    }
    let request_id = payload[0] & 0x7F;
    let (header_len, off) = take_u14(payload, 1)?;
    let header = take(payload, off, header_len as usize)?.to_vec();
    let off = off + header_len as usize;
    let (num_chunks, off) = take_u14(payload, off)?;
    let (this_chunk, off) = take_u14(payload, off)?;
    let (data_len, off) = take_u14(payload, off)?;
    let property_data = take(payload, off, data_len as usize)?.to_vec();
    Ok(PeSetInquiryBody {
        request_id,
        header,
        num_chunks,
        this_chunk,
        property_data,
    })
}

fn parse_subscribe_inquiry_body(payload: &[u8]) -> Result<PeSubscribeInquiryBody> {
    let get = parse_get_inquiry_body(payload)?;
    Ok(PeSubscribeInquiryBody {
        request_id: get.request_id,
        header: get.header,
    })
}

fn parse_notify_body(payload: &[u8]) -> Result<PeNotifyBody> {
    if payload.is_empty() {
        return Err(Error::PayloadTooShort("PE notify requires a request ID"));
    }
    let request_id = payload[0] & 0x7F;
    let (header_len, off) = take_u14(payload, 1)?;
    let (body_len, off) = take_u14(payload, off)?;
    let header = take(payload, off, header_len as usize)?.to_vec();
    let off = off + header_len as usize;
    let body = take(payload, off, body_len as usize)?.to_vec();
    Ok(PeNotifyBody { request_id, header, body })
}

/// Try all three PE reply dialects in the order specified, returning the
/// first whose sanity checks pass.
fn parse_pe_reply_body(payload: &[u8]) -> Result<PeReplyBody> {
    if payload.is_empty() {
        return Err(Error::PayloadTooShort("PE reply requires a request ID"));
    }
    let request_id = payload[0] & 0x7F;

    if let Some(body) = try_parse_standard_dialect(payload, request_id) {
        return Ok(body);
    }
    if let Some(body) = try_parse_compact_dialect(payload, request_id) {
        return Ok(body);
    }
    if let Some(body) = try_parse_vendor_dialect(payload, request_id) {
        return Ok(body);
    }
    Err(Error::UnrecognizedReplyDialect)
}

/// *Standard CI 1.2*: `requestId | headerLen | numChunks | thisChunk | dataLen | headerData | propertyData`.
fn try_parse_standard_dialect(payload: &[u8], request_id: u8) -> Option<PeReplyBody> {
    let (header_len, off) = take_u14(payload, 1).ok()?;
    let (num_chunks, off) = take_u14(payload, off).ok()?;
    let (this_chunk, off) = take_u14(payload, off).ok()?;
    let (data_len, off) = take_u14(payload, off).ok()?;
    if !(1..=0x3FFF).contains(&num_chunks) || this_chunk < 1 || this_chunk > num_chunks {
        return None;
    }
    let header = take(payload, off, header_len as usize).ok()?;
    let off = off + header_len as usize;
    let body = take(payload, off, data_len as usize).ok()?;
    Some(PeReplyBody {
        request_id,
        header: header.to_vec(),
        body: body.to_vec(),
        num_chunks,
        this_chunk,
    })
}

/// *Vendor variant*: header appears before chunk metadata, distinguished by
/// the header's first byte being `{` (the header is JSON).
fn try_parse_vendor_dialect(payload: &[u8], request_id: u8) -> Option<PeReplyBody> {
    if payload.len() < 4 || payload[3] != b'{' {
        return None;
    }
    let (header_len, off) = take_u14(payload, 1).ok()?;
    let header = take(payload, off, header_len as usize).ok()?;
    let off = off + header_len as usize;
    let (num_chunks, off) = take_u14(payload, off).ok()?;
    let (this_chunk, off) = take_u14(payload, off).ok()?;
    let (data_len, off) = take_u14(payload, off).ok()?;
    if !(1..=0x3FFF).contains(&num_chunks) || this_chunk < 1 || this_chunk > num_chunks {
        return None;
    }
    let body = take(payload, off, data_len as usize).ok()?;
    Some(PeReplyBody {
        request_id,
        header: header.to_vec(),
        body: body.to_vec(),
        num_chunks,
        this_chunk,
    })
}

/// *CI 1.1 compact*: `requestId | headerLen | dataLen | headerData | propertyData`; chunking synthesized as 1/1.
fn try_parse_compact_dialect(payload: &[u8], request_id: u8) -> Option<PeReplyBody> {
    let (header_len, off) = take_u14(payload, 1).ok()?;
    let (data_len, off) = take_u14(payload, off).ok()?;
    let header = take(payload, off, header_len as usize).ok()?;
    let off = off + header_len as usize;
    let body = take(payload, off, data_len as usize).ok()?;
    // Reject spans that don't exactly consume the payload: a false positive
    // here would otherwise mask a genuinely malformed standard-dialect reply.
    if off + data_len as usize != payload.len() {
        return None;
    }
    Some(PeReplyBody {
        request_id,
        header: header.to_vec(),
        body: body.to_vec(),
        num_chunks: 1,
        this_chunk: 1,
    })
}

fn parse_nak_body(payload: &[u8]) -> Result<NakBody> {
    if payload.len() < 3 {
        return Err(Error::PayloadTooShort("NAK requires at least 3 bytes"));
    }
    let original_transaction = payload[0] & 0x7F;
    let status = payload[1];
    let status_data = payload[2];
    if payload.len() < 8 {
        return Ok(NakBody {
            original_transaction,
            status,
            status_data,
            details: None,
            message: None,
        });
    }
    let details: [u8; 5] = payload[3..8].try_into().unwrap();
    if payload.len() < 10 {
        return Ok(NakBody {
            original_transaction,
            status,
            status_data,
            details: Some(details),
            message: None,
        });
    }
    let (msg_len, off) = take_u14(payload, 8)?;
    let message = if payload.len() >= off + msg_len as usize {
        let bytes = &payload[off..off + msg_len as usize];
        Some(String::from_utf8_lossy(bytes).into_owned())
    } else {
        None
    };
    Ok(NakBody {
        original_transaction,
        status,
        status_data,
        details: Some(details),
        message,
    })
}
