//! Ring-buffer LZSS, decode only.
//!
//! 4 KiB window, pre-filled with a fill byte (a space in the classic
//! variant, zero in many console ports), write cursor starting at
//! `N - F`.  Flag bytes are read LSB first; a set bit is a literal, a clear
//! bit a two-byte reference `pos = b0 | (b1 & 0xF0) << 4`,
//! `len = (b1 & 0x0F) + 3`.  References index the ring, not the output, so
//! every reference is valid and corruption can only show up as truncation or
//! an overlong result.

use super::{Codec, CodecError, CodecId, PackFallback};

const N:         usize = 4096;
const F:         usize = 18;
const THRESHOLD: usize = 2;

pub struct LzssCodec {
    fill: u8,
}

impl LzssCodec {
    pub fn with_fill(fill: u8) -> Self {
        Self { fill }
    }
}

impl Default for LzssCodec {
    fn default() -> Self {
        Self { fill: b' ' }
    }
}

impl Codec for LzssCodec {
    fn codec_id(&self) -> CodecId { CodecId::Lzss }

    fn max_expansion(&self) -> u32 { 16 }

    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
        lzss_decode(data, capacity, self.fill)
    }

    // Emitting decoded bytes as if they were LZSS would corrupt the target.
    fn pack_fallback(&self) -> PackFallback {
        PackFallback::Skip
    }
}

pub fn lzss_decode(data: &[u8], capacity: usize, fill: u8) -> Result<Vec<u8>, CodecError> {
    let mut ring = [fill; N];
    let mut r = N - F;
    let mut out = Vec::with_capacity(capacity.min(data.len().saturating_mul(8)));
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
                let c = data[i];
                i += 1;
                out.push(c);
                ring[r] = c;
                r = (r + 1) & (N - 1);
                continue;
            }

            if i + 1 >= data.len() {
                return Err(CodecError::Truncated(i));
            }
            let b0 = usize::from(data[i]);
            let b1 = usize::from(data[i + 1]);
            i += 2;

            let pos = b0 | ((b1 & 0xF0) << 4);
            let len = (b1 & 0x0F) + THRESHOLD + 1;
            if out.len() + len > capacity {
                return Err(CodecError::Overflow { capacity });
            }
            for k in 0..len {
                let c = ring[(pos + k) & (N - 1)];
                out.push(c);
                ring[r] = c;
                r = (r + 1) & (N - 1);
            }
        }
    }
    Ok(out)
}
