//! Resources split into independently compressed blocks.
//!
//! The composite walks a [`BlockTable`] in order, opening a delegate
//! exporter on one block at a time.  Blocks that fail to open, or that turn
//! out to be corrupt partway through, end early and the walk moves on to
//! the next block.  Their indices are kept in
//! [`BlockCompositeExporter::skipped_blocks`], and a stream that lost blocks
//! ends with [`ExportError::SkippedBlocks`] in `failure()` once the last
//! block is done.

use std::io::{Read, Write};
use std::sync::Arc;

use super::{read_chunk, ExportError, Exporter, PackSummary, SessionState, Status};
use crate::descriptor::SourceDescriptor;
use crate::sink::BlockWriter;
use crate::table::{BlockEntry, BlockTable};

const NAME: &str = "blocks";

/// Decoded bytes per block written by `pack`.
pub const DEFAULT_PACK_BLOCK_SIZE: usize = 64 * 1024;

pub struct BlockCompositeExporter {
    table:           Arc<BlockTable>,
    inner:           Box<dyn Exporter>,
    pack_block_size: usize,
    session:         Option<BlockSession>,
    skipped:         Vec<usize>,
    status:          Status,
}

struct BlockSession {
    resource: SourceDescriptor,
    current:  usize,
}

impl BlockCompositeExporter {
    pub fn new(table: Arc<BlockTable>, inner: Box<dyn Exporter>) -> Self {
        Self {
            table,
            inner,
            pack_block_size: DEFAULT_PACK_BLOCK_SIZE,
            session: None,
            skipped: Vec::new(),
            status: Status::default(),
        }
    }

    pub fn with_pack_block_size(mut self, size: usize) -> Self {
        self.pack_block_size = size.max(1);
        self
    }

    pub fn table(&self) -> &Arc<BlockTable> { &self.table }

    /// Blocks of the current or last session that ended early.
    pub fn skipped_blocks(&self) -> &[usize] { &self.skipped }
}

fn open_block(inner: &mut dyn Exporter, table: &BlockTable, resource: &SourceDescriptor, index: usize) {
    if let Some(sub) = table.block_descriptor(resource, index) {
        tracing::debug!(block = index, offset = sub.offset, length = sub.length, "opening block");
        inner.open(&sub);
    }
}

impl Exporter for BlockCompositeExporter {
    fn name(&self) -> &'static str { NAME }

    fn open(&mut self, descriptor: &SourceDescriptor) {
        self.close();
        self.status.opened();
        self.skipped.clear();

        if self.table.is_empty() {
            self.status.exhaust();
            return;
        }
        open_block(self.inner.as_mut(), &self.table, descriptor, 0);
        self.session = Some(BlockSession { resource: descriptor.clone(), current: 0 });
    }

    fn available(&mut self) -> bool {
        if !self.status.is_open() {
            return false;
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        // One block per pass; the pass count is bounded by the table length.
        let count = self.table.len();
        while session.current < count {
            if self.inner.available() {
                return true;
            }
            if let Some(err) = self.inner.failure() {
                tracing::warn!(block = session.current, error = %err, "block skipped");
                self.skipped.push(session.current);
            }
            self.inner.close();
            session.current += 1;
            if session.current < count {
                open_block(self.inner.as_mut(), &self.table, &session.resource, session.current);
            }
        }

        self.session = None;
        if self.skipped.is_empty() {
            self.status.exhaust();
        } else {
            let skipped = self.skipped.clone();
            self.status.fail(NAME, ExportError::SkippedBlocks { skipped });
        }
        false
    }

    fn read(&mut self) -> u8 {
        if !self.status.is_open() {
            return 0;
        }
        self.inner.read()
    }

    fn close(&mut self) {
        self.inner.close();
        self.session = None;
        self.status.close();
    }

    /// Split the input into `pack_block_size` pieces and pack each through
    /// the inner exporter.  The returned table's offsets are relative to the
    /// start of `sink`.
    fn pack(&mut self, input: &mut dyn Read, sink: &mut dyn Write) -> Result<PackSummary, ExportError> {
        let mut writer = BlockWriter::new(sink);
        let mut blocks = Vec::new();
        let mut bytes_in = 0u64;
        let mut fallback = None;

        loop {
            let chunk = read_chunk(input, self.pack_block_size)?;
            if chunk.is_empty() {
                break;
            }
            let offset = writer.position();
            let summary = self.inner.pack(&mut chunk.as_slice(), &mut writer)?;
            fallback = fallback.or(summary.fallback);

            let mut entry = BlockEntry::new(offset, writer.position() - offset);
            entry.decompressed_length = Some(chunk.len() as u64);
            entry.checksum = Some(writer.finish_block());
            tracing::trace!(block = blocks.len(), offset, length = entry.length, "block packed");
            blocks.push(entry);
            bytes_in += chunk.len() as u64;
        }

        Ok(PackSummary {
            bytes_in,
            bytes_out: writer.position(),
            blocks: Some(BlockTable::from_entries(blocks)),
            fallback,
        })
    }

    fn state(&self) -> SessionState { self.status.state() }

    fn failure(&self) -> Option<&ExportError> { self.status.failure() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::rle::rle_encode;
    use crate::codec::CodecId;
    use crate::exporter::{read_all, BufferedTransformExporter, ChunkFraming, DirectExporter};
    use crate::source::Backing;

    fn rle_blocks() -> Box<dyn Exporter> {
        Box::new(BufferedTransformExporter::new(CodecId::Rle, ChunkFraming::Whole))
    }

    #[test]
    fn blocks_decode_in_table_order() {
        let backing = Backing::memory(b"WORLDHELLO".to_vec());
        let table = BlockTable::from_columns(&[5, 0], &[5, 5], None, None).unwrap();
        let mut exporter = BlockCompositeExporter::new(Arc::new(table), Box::new(DirectExporter::new()));
        let out = read_all(&mut exporter, &SourceDescriptor::new(backing, 0, 10));
        assert_eq!(out, b"HELLOWORLD");
    }

    #[test]
    fn empty_and_corrupt_blocks_are_skipped() {
        let mut data = rle_encode(b"AAAA");
        let good_len = data.len() as u64;
        data.extend_from_slice(&[0x85, 1]); // literal frame cut short
        let bad_len = 2;
        data.extend_from_slice(&rle_encode(b"BBBB"));

        let table = BlockTable::from_entries(vec![
            BlockEntry::new(0, good_len),
            BlockEntry::new(0, 0),
            BlockEntry::new(good_len, bad_len),
            BlockEntry::new(good_len + bad_len, good_len),
        ]);
        let mut exporter = BlockCompositeExporter::new(Arc::new(table), rle_blocks());
        let desc = SourceDescriptor::memory(data);
        assert_eq!(read_all(&mut exporter, &desc), b"AAAABBBB");
        assert_eq!(exporter.skipped_blocks(), &[2]);
        assert!(matches!(
            exporter.failure(),
            Some(ExportError::SkippedBlocks { skipped }) if skipped == &[2]
        ));
    }

    #[test]
    fn out_of_range_block_is_skipped() {
        let table = BlockTable::contiguous(0, &[3, 100, 3]);
        let desc = SourceDescriptor::memory(b"abcdef".to_vec());
        let mut exporter = BlockCompositeExporter::new(Arc::new(table), Box::new(DirectExporter::new()));
        assert_eq!(read_all(&mut exporter, &desc), b"abc");
        assert_eq!(exporter.skipped_blocks(), &[1, 2]);
        assert!(exporter.failure().unwrap().to_string().starts_with("2 block(s) skipped"));
    }

    #[test]
    fn empty_table_is_empty_stream() {
        let mut exporter =
            BlockCompositeExporter::new(Arc::new(BlockTable::default()), Box::new(DirectExporter::new()));
        exporter.open(&SourceDescriptor::memory(vec![1u8, 2]));
        assert!(!exporter.available());
        assert_eq!(exporter.state(), SessionState::Exhausted);
    }

    #[test]
    fn many_empty_blocks_do_not_recurse() {
        let mut lengths = vec![0u64; 100_000];
        lengths.push(1);
        let table = BlockTable::contiguous(0, &lengths);
        let mut exporter = BlockCompositeExporter::new(Arc::new(table), Box::new(DirectExporter::new()));
        assert_eq!(read_all(&mut exporter, &SourceDescriptor::memory(vec![0x42u8])), vec![0x42]);
    }

    #[test]
    fn table_is_shared_between_instances() {
        let table = Arc::new(BlockTable::contiguous(0, &[2, 2]));
        let desc = SourceDescriptor::memory(b"wxyz".to_vec());
        let mut a = BlockCompositeExporter::new(Arc::clone(&table), Box::new(DirectExporter::new()));
        let mut b = BlockCompositeExporter::new(Arc::clone(&table), Box::new(DirectExporter::new()));
        a.open(&desc);
        b.open(&desc);
        assert!(a.available());
        assert_eq!(a.read(), b'w');
        assert!(b.available());
        assert_eq!(b.read(), b'w');
        assert!(a.available());
        assert_eq!(a.read(), b'x');
        a.close();
        b.close();
        assert_eq!(Arc::strong_count(&table), 3);
    }

    #[test]
    fn pack_builds_a_decodable_table() {
        let plain: Vec<u8> = (0..3000u32).map(|i| (i / 7) as u8).collect();
        let mut packer = BlockCompositeExporter::new(Arc::new(BlockTable::default()), rle_blocks())
            .with_pack_block_size(1024);
        let mut stored = Vec::new();
        let summary = packer.pack(&mut plain.as_slice(), &mut stored).unwrap();

        let table = summary.blocks.unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.total_decompressed(), Some(3000));
        assert_eq!(summary.bytes_out, stored.len() as u64);

        let mut reader = BlockCompositeExporter::new(Arc::new(table), rle_blocks());
        assert_eq!(read_all(&mut reader, &SourceDescriptor::memory(stored)), plain);
        assert!(reader.skipped_blocks().is_empty());
    }
}
