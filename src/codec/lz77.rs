//! Flag-group LZ77 with relative back-references.
//!
//! Each group starts with a flag byte read LSB first; a set bit is a literal
//! byte, a clear bit is a two-byte match token:
//! ```text
//! b0 = distance-1 bits 0..8
//! b1 = (distance-1 bits 8..12) << 4 | (length - 3)
//! ```
//! Distances reach 4096 bytes back into the output decoded so far and
//! lengths run from 3 to 18.  Unlike a ring-buffer LZSS there is no
//! pre-filled window, so a distance reaching before the start of the output
//! is corruption.

use super::{Codec, CodecError, CodecId};

const WINDOW:    usize = 4096;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 18;
const MAX_CHAIN: usize = 64;
const HASH_BITS: usize = 12;
const NIL:       usize = usize::MAX;

pub struct Lz77Codec;

impl Codec for Lz77Codec {
    fn codec_id(&self) -> CodecId { CodecId::Lz77 }

    fn max_expansion(&self) -> u32 { 16 }

    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
        lz77_decode(data, capacity)
    }

    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz77_encode(data))
    }
}

pub fn lz77_decode(data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
    let mut out: Vec<u8> = Vec::with_capacity(capacity.min(data.len().saturating_mul(8)));
    let mut i = 0usize;

    while i < data.len() {
        let flags = data[i];
        i += 1;

        for bit in 0..8 {
            if i >= data.len() {
                break;
            }
            if flags & (1 << bit) != 0 {
                if out.len() >= capacity {
                    return Err(CodecError::Overflow { capacity });
                }
                out.push(data[i]);
                i += 1;
                continue;
            }

            if i + 1 >= data.len() {
                return Err(CodecError::Truncated(i));
            }
            let b0 = usize::from(data[i]);
            let b1 = usize::from(data[i + 1]);
            i += 2;

            let distance = (((b1 & 0xF0) << 4) | b0) + 1;
            let length = (b1 & 0x0F) + MIN_MATCH;
            if distance > out.len() {
                return Err(CodecError::InvalidBackReference { distance, available: out.len() });
            }
            if out.len() + length > capacity {
                return Err(CodecError::Overflow { capacity });
            }
            // Byte by byte: a match may overlap the bytes it produces.
            let start = out.len() - distance;
            for k in 0..length {
                let b = out[start + k];
                out.push(b);
            }
        }
    }
    Ok(out)
}

/// Greedy encoder using hash chains over 3-byte prefixes.
pub fn lz77_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8 + 1);
    let mut chains = HashChains::new(data.len());

    let mut i = 0usize;
    let mut flag_pos = 0usize;
    let mut bit = 8u32;

    while i < data.len() {
        if bit == 8 {
            flag_pos = out.len();
            out.push(0);
            bit = 0;
        }

        let (length, distance) = chains.longest_match(data, i);
        if length >= MIN_MATCH {
            let d = distance - 1;
            out.push((d & 0xFF) as u8);
            out.push((((d >> 4) & 0xF0) | (length - MIN_MATCH)) as u8);
            for k in i..i + length {
                chains.insert(data, k);
            }
            i += length;
        } else {
            out[flag_pos] |= 1 << bit;
            out.push(data[i]);
            chains.insert(data, i);
            i += 1;
        }
        bit += 1;
    }
    out
}

struct HashChains {
    head: Vec<usize>,
    prev: Vec<usize>,
}

impl HashChains {
    fn new(len: usize) -> Self {
        Self { head: vec![NIL; 1 << HASH_BITS], prev: vec![NIL; len] }
    }

    fn hash(data: &[u8], at: usize) -> usize {
        let h = (usize::from(data[at]) << 8) ^ (usize::from(data[at + 1]) << 4) ^ usize::from(data[at + 2]);
        h & ((1 << HASH_BITS) - 1)
    }

    fn insert(&mut self, data: &[u8], at: usize) {
        if at + MIN_MATCH > data.len() {
            return;
        }
        let h = Self::hash(data, at);
        self.prev[at] = self.head[h];
        self.head[h] = at;
    }

    /// Longest match for position `at`, as `(length, distance)`.
    fn longest_match(&self, data: &[u8], at: usize) -> (usize, usize) {
        if at + MIN_MATCH > data.len() {
            return (0, 0);
        }
        let limit = MAX_MATCH.min(data.len() - at);
        let mut best = (0usize, 0usize);
        let mut candidate = self.head[Self::hash(data, at)];
        let mut steps = 0usize;

        while candidate != NIL && at - candidate <= WINDOW && steps < MAX_CHAIN {
            let length = (0..limit)
                .take_while(|&k| data[candidate + k] == data[at + k])
                .count();
            if length > best.0 {
                best = (length, at - candidate);
                if length == limit {
                    break;
                }
            }
            candidate = self.prev[candidate];
            steps += 1;
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_only() {
        // flags 0b0000_0111: three literals
        assert_eq!(lz77_decode(&[0x07, b'a', b'b', b'c'], 16).unwrap(), b"abc");
    }

    #[test]
    fn overlapping_match() {
        // literal 'x', then distance 1 length 5
        let encoded = [0x01, b'x', 0x00, 0x02];
        assert_eq!(lz77_decode(&encoded, 16).unwrap(), b"xxxxxx");
    }

    #[test]
    fn back_reference_before_start_is_rejected() {
        let err = lz77_decode(&[0x00, 0x05, 0x00], 64).unwrap_err();
        assert!(matches!(err, CodecError::InvalidBackReference { distance: 6, available: 0 }));
    }

    #[test]
    fn half_token_is_truncated() {
        assert!(matches!(lz77_decode(&[0x01, b'q', 0x00], 64), Err(CodecError::Truncated(2))));
    }

    #[test]
    fn bound_is_enforced() {
        let encoded = lz77_encode(&[7u8; 64]);
        assert!(matches!(lz77_decode(&encoded, 63), Err(CodecError::Overflow { capacity: 63 })));
    }

    #[test]
    fn lz77_roundtrip_text() {
        let data = b"I am Sam. Sam I am. That Sam-I-am! That Sam-I-am! I do not like that Sam-I-am!".repeat(20);
        let encoded = lz77_encode(&data);
        assert!(encoded.len() < data.len() / 3);
        assert_eq!(lz77_decode(&encoded, data.len()).unwrap(), data);
    }

    #[test]
    fn lz77_roundtrip_noisy_with_repeat() {
        let mut data: Vec<u8> = (0..5000u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let copy = data[4000..4800].to_vec();
        data.extend_from_slice(&copy);
        let encoded = lz77_encode(&data);
        assert_eq!(lz77_decode(&encoded, data.len()).unwrap(), data);
    }
}
