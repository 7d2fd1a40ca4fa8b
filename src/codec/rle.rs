//! Control-byte run-length coding.
//!
//! The stream is a sequence of frames, each introduced by one control byte:
//! ```text
//! 0x80..=0xFF  LIT  (ctrl - 0x7F) raw bytes follow        (1..=128)
//! 0x00..=0x7F  RUN  next byte repeated (ctrl + 3) times   (3..=130)
//! ```
//! A lone `0x80 xx` frame therefore decodes to the single byte `xx`.

use super::{Codec, CodecError, CodecId};

const MAX_LITERAL: usize = 128;
const MIN_RUN:     usize = 3;
const MAX_RUN:     usize = 130;

pub struct RleCodec;

impl Codec for RleCodec {
    fn codec_id(&self) -> CodecId { CodecId::Rle }

    fn max_expansion(&self) -> u32 { (MAX_RUN / 2) as u32 }

    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
        rle_decode(data, capacity)
    }

    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(rle_encode(data))
    }
}

/// Encode `data` into run-length frames.
pub fn rle_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / MAX_LITERAL + 1);
    let mut i = 0usize;

    while i < data.len() {
        let run_len = run_length(data, i);
        if run_len >= MIN_RUN {
            out.push((run_len - MIN_RUN) as u8);
            out.push(data[i]);
            i += run_len;
            continue;
        }

        // Accumulate literals until a run worth encoding starts.
        let start = i;
        while i < data.len() && i - start < MAX_LITERAL && run_length(data, i) < MIN_RUN {
            i += 1;
        }
        out.push((i - start + 0x7F) as u8);
        out.extend_from_slice(&data[start..i]);
    }
    out
}

fn run_length(data: &[u8], at: usize) -> usize {
    let byte = data[at];
    data[at..]
        .iter()
        .take(MAX_RUN)
        .take_while(|&&b| b == byte)
        .count()
}

/// Decode frames produced by [`rle_encode`], producing at most `capacity`
/// bytes.
pub fn rle_decode(data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(capacity.min(data.len().saturating_mul(4)));
    let mut i = 0usize;

    while i < data.len() {
        let ctrl = data[i];
        let frame = i;
        i += 1;

        if ctrl >= 0x80 {
            let count = usize::from(ctrl - 0x7F);
            if i + count > data.len() {
                return Err(CodecError::Truncated(frame));
            }
            if out.len() + count > capacity {
                return Err(CodecError::Overflow { capacity });
            }
            out.extend_from_slice(&data[i..i + count]);
            i += count;
        } else {
            let count = usize::from(ctrl) + MIN_RUN;
            let byte = *data.get(i).ok_or(CodecError::Truncated(frame))?;
            i += 1;
            if out.len() + count > capacity {
                return Err(CodecError::Overflow { capacity });
            }
            out.resize(out.len() + count, byte);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_literal_frame() {
        assert_eq!(rle_decode(&[0x80, 0x5A], 16).unwrap(), vec![0x5A]);
    }

    #[test]
    fn run_frame_expands() {
        assert_eq!(rle_decode(&[0x02, 0xEE], 16).unwrap(), vec![0xEE; 5]);
    }

    #[test]
    fn rle_roundtrip_mixed() {
        let mut data: Vec<u8> = (0u8..=255).cycle().take(700).collect();
        data.extend(vec![0xAAu8; 1000]);
        data.extend(b"ab");
        let encoded = rle_encode(&data);
        assert_eq!(rle_decode(&encoded, data.len()).unwrap(), data);
    }

    #[test]
    fn runs_compress_well() {
        let data = vec![0u8; 13_000];
        let encoded = rle_encode(&data);
        assert_eq!(encoded.len(), 200);
    }

    #[test]
    fn truncated_literal_is_rejected() {
        assert!(matches!(rle_decode(&[0x83, 1, 2], 64), Err(CodecError::Truncated(0))));
    }

    #[test]
    fn truncated_run_is_rejected() {
        assert!(matches!(rle_decode(&[0x80, 9, 0x05], 64), Err(CodecError::Truncated(2))));
    }

    #[test]
    fn overflow_is_reported() {
        assert!(matches!(
            rle_decode(&[0x7F, 0x11], 100),
            Err(CodecError::Overflow { capacity: 100 })
        ));
    }

    #[test]
    fn rle_empty() {
        assert_eq!(rle_encode(&[]), Vec::<u8>::new());
        assert_eq!(rle_decode(&[], 0).unwrap(), Vec::<u8>::new());
    }
}
