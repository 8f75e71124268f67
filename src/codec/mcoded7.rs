//! Mcoded7: 8-bit to 7-bit packing used for Property Exchange bodies.
//!
//! Input is consumed in 8-byte groups. Each group encodes to one "MSB byte"
//! (bit 7 of each of up to seven following data bytes, LSB-first) followed
//! by the up-to-seven data bytes with their MSBs cleared. A final partial
//! group of N < 7 bytes still produces a 1-byte MSB header followed by N
//! data bytes.

/// Encode raw bytes into the Mcoded7 7-bit-safe representation.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 7 + 1);
    for chunk in data.chunks(7) {
        let mut msb_byte = 0u8;
        for (i, &b) in chunk.iter().enumerate() {
            if b & 0x80 != 0 {
                msb_byte |= 1 << i;
            }
        }
        out.push(msb_byte);
        for &b in chunk {
            out.push(b & 0x7F);
        }
    }
    out
}

/// Decode an Mcoded7 byte span back into the original 8-bit bytes.
pub fn decode(encoded: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded.len());
    let mut i = 0;
    while i < encoded.len() {
        let msb_byte = encoded[i];
        i += 1;
        let remaining = encoded.len() - i;
        let group_len = remaining.min(7);
        for (j, &b) in encoded[i..i + group_len].iter().enumerate() {
            let mut byte = b & 0x7F;
            if msb_byte & (1 << j) != 0 {
                byte |= 0x80;
            }
            out.push(byte);
        }
        i += group_len;
    }
    out
}
