//! Synthesized file headers in front of headerless payloads.
//!
//! Archives often store raw PCM or raw pixels and keep the format fields in
//! their directory.  [`HeaderPrefixExporter`] renders a standard header from
//! those fields and emits it ahead of the payload so the extracted file
//! opens in ordinary tools.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use super::{DirectExporter, ExportError, Exporter, PackSummary, SessionState, Status};
use crate::descriptor::SourceDescriptor;

const NAME: &str = "header";

const WAV_HEADER_LEN: usize = 44;
const BMP_HEADER_LEN: usize = 54;
/// 72 DPI in pixels per metre.
const BMP_PIXELS_PER_METRE: i32 = 2835;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum HeaderTemplate {
    /// 44-byte RIFF/WAVE header for PCM data.
    Wav { channels: u16, sample_rate: u32, bits_per_sample: u16 },
    /// 54-byte BITMAPFILEHEADER + BITMAPINFOHEADER for uncompressed pixels.
    Bmp { width: i32, height: i32, bits_per_pixel: u16 },
    /// Fixed bytes copied verbatim.
    Raw { bytes: Vec<u8> },
}

impl HeaderTemplate {
    /// Header length in bytes; independent of the payload size.
    pub fn len(&self) -> usize {
        match self {
            HeaderTemplate::Wav { .. } => WAV_HEADER_LEN,
            HeaderTemplate::Bmp { .. } => BMP_HEADER_LEN,
            HeaderTemplate::Raw { bytes } => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Render the header for a payload of `payload_len` bytes.  Size fields
    /// that do not fit in 32 bits saturate.
    pub fn render(&self, payload_len: u64) -> Vec<u8> {
        let data_len = u32::try_from(payload_len).unwrap_or(u32::MAX);
        let mut out = Vec::with_capacity(self.len());
        match self {
            HeaderTemplate::Wav { channels, sample_rate, bits_per_sample } => {
                let block_align = u32::from(*channels) * u32::from(*bits_per_sample) / 8;
                out.extend_from_slice(b"RIFF");
                out.extend_from_slice(&data_len.saturating_add(36).to_le_bytes());
                out.extend_from_slice(b"WAVEfmt ");
                out.extend_from_slice(&16u32.to_le_bytes());
                out.extend_from_slice(&1u16.to_le_bytes()); // PCM
                out.extend_from_slice(&channels.to_le_bytes());
                out.extend_from_slice(&sample_rate.to_le_bytes());
                out.extend_from_slice(&sample_rate.saturating_mul(block_align).to_le_bytes());
                out.extend_from_slice(&(block_align as u16).to_le_bytes());
                out.extend_from_slice(&bits_per_sample.to_le_bytes());
                out.extend_from_slice(b"data");
                out.extend_from_slice(&data_len.to_le_bytes());
            }
            HeaderTemplate::Bmp { width, height, bits_per_pixel } => {
                out.extend_from_slice(b"BM");
                out.extend_from_slice(&data_len.saturating_add(BMP_HEADER_LEN as u32).to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes()); // reserved
                out.extend_from_slice(&(BMP_HEADER_LEN as u32).to_le_bytes());
                out.extend_from_slice(&40u32.to_le_bytes());
                out.extend_from_slice(&width.to_le_bytes());
                out.extend_from_slice(&height.to_le_bytes());
                out.extend_from_slice(&1u16.to_le_bytes()); // planes
                out.extend_from_slice(&bits_per_pixel.to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
                out.extend_from_slice(&data_len.to_le_bytes());
                out.extend_from_slice(&BMP_PIXELS_PER_METRE.to_le_bytes());
                out.extend_from_slice(&BMP_PIXELS_PER_METRE.to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes()); // palette colours
                out.extend_from_slice(&0u32.to_le_bytes()); // important colours
            }
            HeaderTemplate::Raw { bytes } => out.extend_from_slice(bytes),
        }
        out
    }
}

pub struct HeaderPrefixExporter {
    template: HeaderTemplate,
    inner:    Box<dyn Exporter>,
    header:   Vec<u8>,
    pos:      usize,
    status:   Status,
}

impl HeaderPrefixExporter {
    pub fn new(template: HeaderTemplate, inner: Box<dyn Exporter>) -> Self {
        Self { template, inner, header: Vec::new(), pos: 0, status: Status::default() }
    }

    /// Header in front of the raw stored bytes.
    pub fn direct(template: HeaderTemplate) -> Self {
        Self::new(template, Box::new(DirectExporter::new()))
    }
}

impl Exporter for HeaderPrefixExporter {
    fn name(&self) -> &'static str { NAME }

    fn open(&mut self, descriptor: &SourceDescriptor) {
        self.close();
        self.status.opened();
        let payload_len = descriptor.decompressed_length.unwrap_or(descriptor.length);
        self.header = self.template.render(payload_len);
        self.pos = 0;

        self.inner.open(descriptor);
        if let Some(err) = ExportError::from_inner(self.inner.as_ref()) {
            self.status.fail(NAME, err);
        }
    }

    fn available(&mut self) -> bool {
        if !self.status.is_open() {
            return false;
        }
        if self.pos < self.header.len() || self.inner.available() {
            return true;
        }
        match ExportError::from_inner(self.inner.as_ref()) {
            Some(err) => self.status.fail(NAME, err),
            None => self.status.exhaust(),
        }
        false
    }

    fn read(&mut self) -> u8 {
        if !self.status.is_open() {
            return 0;
        }
        match self.header.get(self.pos) {
            Some(&byte) => {
                self.pos += 1;
                byte
            }
            None => self.inner.read(),
        }
    }

    fn close(&mut self) {
        self.inner.close();
        self.header.clear();
        self.pos = 0;
        self.status.close();
    }

    /// Strip the synthesized header and store the payload through the inner
    /// exporter.
    fn pack(&mut self, input: &mut dyn Read, sink: &mut dyn Write) -> Result<PackSummary, ExportError> {
        let header_len = self.template.len() as u64;
        let skipped = io::copy(&mut (&mut *input).take(header_len), &mut io::sink())?;
        let mut summary = self.inner.pack(input, sink)?;
        summary.bytes_in += skipped;
        Ok(summary)
    }

    fn state(&self) -> SessionState { self.status.state() }

    fn failure(&self) -> Option<&ExportError> { self.status.failure() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::read_all;

    fn pcm_template() -> HeaderTemplate {
        HeaderTemplate::Wav { channels: 2, sample_rate: 44_100, bits_per_sample: 16 }
    }

    #[test]
    fn wav_header_layout() {
        let header = pcm_template().render(1000);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 1036);
        assert_eq!(&header[8..16], b"WAVEfmt ");
        assert_eq!(u16::from_le_bytes([header[22], header[23]]), 2);
        assert_eq!(u32::from_le_bytes(header[28..32].try_into().unwrap()), 176_400);
        assert_eq!(u16::from_le_bytes([header[32], header[33]]), 4);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 1000);
    }

    #[test]
    fn bmp_header_layout() {
        let header = HeaderTemplate::Bmp { width: 4, height: -2, bits_per_pixel: 32 }.render(32);
        assert_eq!(header.len(), 54);
        assert_eq!(&header[0..2], b"BM");
        assert_eq!(u32::from_le_bytes(header[2..6].try_into().unwrap()), 86);
        assert_eq!(u32::from_le_bytes(header[10..14].try_into().unwrap()), 54);
        assert_eq!(i32::from_le_bytes(header[22..26].try_into().unwrap()), -2);
        assert_eq!(u16::from_le_bytes([header[28], header[29]]), 32);
    }

    #[test]
    fn header_precedes_payload() {
        let samples = vec![0x11u8; 8];
        let mut exporter = HeaderPrefixExporter::direct(pcm_template());
        let out = read_all(&mut exporter, &SourceDescriptor::memory(samples.clone()));
        assert_eq!(out.len(), 52);
        assert_eq!(&out[44..], samples.as_slice());
    }

    #[test]
    fn failed_payload_emits_nothing() {
        let desc = SourceDescriptor::new(crate::source::Backing::memory(vec![0u8; 2]), 0, 9);
        let mut exporter = HeaderPrefixExporter::direct(HeaderTemplate::Raw { bytes: b"HDR".to_vec() });
        assert!(read_all(&mut exporter, &desc).is_empty());
        assert!(matches!(exporter.failure(), Some(ExportError::Inner { exporter: "direct", .. })));
    }

    #[test]
    fn pack_strips_the_header() {
        let mut exporter = HeaderPrefixExporter::direct(HeaderTemplate::Raw { bytes: b"HDR".to_vec() });
        let mut stored = Vec::new();
        let summary = exporter.pack(&mut &b"HDRpayload"[..], &mut stored).unwrap();
        assert_eq!(stored, b"payload");
        assert_eq!(summary.bytes_in, 10);
        assert_eq!(summary.bytes_out, 7);
    }
}
