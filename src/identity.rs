use crate::error::{Error, Result};
use crate::muid::{decode_u14, decode_u28, encode_u14, encode_u28};

/// A device manufacturer, family, model and version identity.
///
/// Serialized as exactly 11 bytes of 7-bit data: a 1-byte standard
/// manufacturer ID, or a 3-byte extended ID prefixed with `0x00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer_id: ManufacturerId,
    pub family_id: u16,
    pub model_id: u16,
    pub version_id: u32,
}

/// A 1-byte standard manufacturer ID, or a 3-byte extended ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManufacturerId {
    Standard(u8),
    Extended([u8; 2]),
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        DeviceIdentity {
            manufacturer_id: ManufacturerId::Standard(0x7D), // educational/non-commercial
            family_id: 0,
            model_id: 0,
            version_id: 0,
        }
    }
}

impl DeviceIdentity {
    pub fn with_manufacturer(mut self, id: ManufacturerId) -> Self {
        self.manufacturer_id = id;
        self
    }

    pub fn with_family(mut self, family_id: u16) -> Self {
        self.family_id = family_id;
        self
    }

    pub fn with_model(mut self, model_id: u16) -> Self {
        self.model_id = model_id;
        self
    }

    pub fn with_version(mut self, version_id: u32) -> Self {
        self.version_id = version_id;
        self
    }

    /// Encode into exactly 11 bytes of 7-bit payload.
    pub fn encode(&self) -> [u8; 11] {
        let mut out = [0u8; 11];
        match self.manufacturer_id {
            ManufacturerId::Standard(id) => {
                out[0] = id & 0x7F;
                out[1] = 0;
                out[2] = 0;
            }
            ManufacturerId::Extended([a, b]) => {
                out[0] = 0;
                out[1] = a & 0x7F;
                out[2] = b & 0x7F;
            }
        }
        let family = encode_u14(self.family_id);
        out[3] = family[0];
        out[4] = family[1];
        let model = encode_u14(self.model_id);
        out[5] = model[0];
        out[6] = model[1];
        let version = encode_u28(self.version_id);
        out[7] = version[0];
        out[8] = version[1];
        out[9] = version[2];
        out[10] = version[3];
        out
    }

    /// Decode from an 11-byte 7-bit payload span.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 11 {
            return Err(Error::PayloadTooShort("device identity requires 11 bytes"));
        }
        for &b in &bytes[..11] {
            if b & 0x80 != 0 {
                return Err(Error::NonSevenBit(b));
            }
        }
        let manufacturer_id = if bytes[0] == 0 {
            ManufacturerId::Extended([bytes[1], bytes[2]])
        } else {
            ManufacturerId::Standard(bytes[0])
        };
        let family_id = decode_u14([bytes[3], bytes[4]])?;
        let model_id = decode_u14([bytes[5], bytes[6]])?;
        let version_id = decode_u28([bytes[7], bytes[8], bytes[9], bytes[10]])?;
        Ok(DeviceIdentity {
            manufacturer_id,
            family_id,
            model_id,
            version_id,
        })
    }
}

bitflags::bitflags! {
    /// Bitset over the four MIDI-CI categories a device may support.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CategorySupport: u8 {
        const PROTOCOL_NEGOTIATION = 0b0000_0010;
        const PROFILE_CONFIGURATION = 0b0000_0100;
        const PROPERTY_EXCHANGE = 0b0000_1000;
        const PROCESS_INQUIRY = 0b0001_0000;
    }
}
