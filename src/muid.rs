use crate::error::{Error, Result};

/// Maximum legal value of a 28-bit MUID.
pub const MUID_MAX: u32 = 0x0FFF_FFFF;

/// The reserved broadcast MUID, matched by every device.
pub const MUID_BROADCAST: Muid = Muid(0x0FFF_FFFF);

/// A 28-bit MIDI Unique Identifier.
///
/// Transmitted on the wire as four 7-bit little-endian limbs. Every
/// constructed value satisfies `value <= MUID_MAX`; out-of-range values are
/// a constructor error rather than a silent truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Muid(u32);

impl Muid {
    /// Construct a MUID, rejecting values outside the 28-bit range.
    pub fn new(value: u32) -> Result<Self> {
        if value > MUID_MAX {
            return Err(Error::MuidOutOfRange(value));
        }
        Ok(Muid(value))
    }

    /// The broadcast MUID (`0x0FFF_FFFF`), matched by every device.
    pub fn broadcast() -> Self {
        MUID_BROADCAST
    }

    pub fn is_broadcast(self) -> bool {
        self.0 == MUID_MAX
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Encode as four 7-bit little-endian limbs.
    pub fn to_limbs(self) -> [u8; 4] {
        let v = self.0;
        [
            (v & 0x7F) as u8,
            ((v >> 7) & 0x7F) as u8,
            ((v >> 14) & 0x7F) as u8,
            ((v >> 21) & 0x7F) as u8,
        ]
    }

    /// Decode from four 7-bit little-endian limbs.
    pub fn from_limbs(limbs: [u8; 4]) -> Result<Self> {
        for b in limbs {
            if b & 0x80 != 0 {
                return Err(Error::NonSevenBit(b));
            }
        }
        let v = (limbs[0] as u32)
            | ((limbs[1] as u32) << 7)
            | ((limbs[2] as u32) << 14)
            | ((limbs[3] as u32) << 21);
        Muid::new(v)
    }

    /// Generate a random non-broadcast MUID, as a discovering device would
    /// when it first comes online.
    pub fn random() -> Self {
        loop {
            let v = rand::random::<u32>() & MUID_MAX;
            if v != MUID_MAX {
                return Muid(v);
            }
        }
    }
}

impl std::fmt::Display for Muid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Encode a 14-bit value as two 7-bit little-endian limbs.
pub fn encode_u14(value: u16) -> [u8; 2] {
    [(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
}

/// Decode two 7-bit little-endian limbs into a 14-bit value.
pub fn decode_u14(limbs: [u8; 2]) -> Result<u16> {
    for b in limbs {
        if b & 0x80 != 0 {
            return Err(Error::NonSevenBit(b));
        }
    }
    Ok((limbs[0] as u16) | ((limbs[1] as u16) << 7))
}

/// Encode a 28-bit value as four 7-bit little-endian limbs.
pub fn encode_u28(value: u32) -> [u8; 4] {
    [
        (value & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 21) & 0x7F) as u8,
    ]
}

/// Decode four 7-bit little-endian limbs into a 28-bit value.
pub fn decode_u28(limbs: [u8; 4]) -> Result<u32> {
    for b in limbs {
        if b & 0x80 != 0 {
            return Err(Error::NonSevenBit(b));
        }
    }
    Ok((limbs[0] as u32)
        | ((limbs[1] as u32) << 7)
        | ((limbs[2] as u32) << 14)
        | ((limbs[3] as u32) << 21))
}
