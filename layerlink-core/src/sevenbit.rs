//! 7-bit packing for SysEx payloads: groups of up to 7 raw bytes are emitted
//! as one MSB byte (bit i = original MSB of raw byte i) followed by the raw
//! bytes with their MSB cleared.
//!
//! Field sizes are fixed by the protocol, so encoded lengths carry no prefix:
//! MAC 6 -> 7, layer 16 -> 19, version 8 -> 10, u32 4 -> 5.

/// Encoded length for `raw` input bytes.
pub const fn encoded_len(raw: usize) -> usize {
    raw + raw.div_ceil(7)
}

/// Pack raw bytes into the 7-bit-safe representation.
pub fn encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(input.len()));
    for group in input.chunks(7) {
        let mut msb = 0u8;
        for (i, &b) in group.iter().enumerate() {
            if b & 0x80 != 0 {
                msb |= 1 << i;
            }
        }
        out.push(msb);
        for &b in group {
            out.push(b & 0x7F);
        }
    }
    out
}

/// Unpack a 7-bit-safe slice back into raw bytes. Inverse of [`encode`].
pub fn decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut idx = 0;
    while idx < input.len() {
        let msb = input[idx];
        idx += 1;
        for i in 0..7 {
            if idx >= input.len() {
                break;
            }
            let mut b = input[idx] & 0x7F;
            if msb & (1 << i) != 0 {
                b |= 0x80;
            }
            out.push(b);
            idx += 1;
        }
    }
    out
}

/// Decode a 5-byte packed group into a big-endian u32. Returns `None` when the
/// slice is short.
pub fn decode_u32_be(input: &[u8]) -> Option<u32> {
    if input.len() < 5 {
        return None;
    }
    let raw = decode(&input[..5]);
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Encode a big-endian u32 into its 5-byte packed form.
pub fn encode_u32_be(value: u32) -> [u8; 5] {
    let enc = encode(&value.to_be_bytes());
    [enc[0], enc[1], enc[2], enc[3], enc[4]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_lengths() {
        for len in 0..=32 {
            let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(37).wrapping_add(0x80)).collect();
            let enc = encode(&data);
            assert_eq!(enc.len(), encoded_len(len));
            assert!(enc.iter().all(|&b| b < 0x80), "encoded byte above 0x7F");
            assert_eq!(decode(&enc), data);
        }
    }

    #[test]
    fn known_field_sizes() {
        assert_eq!(encoded_len(6), 7); // MAC
        assert_eq!(encoded_len(16), 19); // layer
        assert_eq!(encoded_len(8), 10); // version
        assert_eq!(encoded_len(4), 5); // u32
    }

    #[test]
    fn msb_bits_map_to_positions() {
        // Only byte 2 of the group has its MSB set.
        let enc = encode(&[0x01, 0x02, 0x83]);
        assert_eq!(enc, vec![0b100, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn u32_roundtrip() {
        for v in [0u32, 1, 12345, 0x8000_0000, u32::MAX] {
            assert_eq!(decode_u32_be(&encode_u32_be(v)), Some(v));
        }
        assert_eq!(decode_u32_be(&[0, 1, 2]), None);
    }
}
