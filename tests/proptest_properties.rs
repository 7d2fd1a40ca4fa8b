use gxport::codec::lz77::lz77_decode;
use gxport::codec::lzss::lzss_decode;
use gxport::codec::rle::{rle_decode, rle_encode};
use gxport::codec::CodecId;
use gxport::exporter::{
    read_all, BlockCompositeExporter, BufferedTransformExporter, ChunkFraming, DirectExporter, Exporter,
};
use gxport::{BlockEntry, BlockTable, SourceDescriptor};
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #[test]
    fn composite_is_concatenation(blocks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 0..12)) {
        let mut stored = Vec::new();
        let mut entries = Vec::new();
        for block in &blocks {
            let encoded = rle_encode(block);
            let mut entry = BlockEntry::new(stored.len() as u64, encoded.len() as u64);
            entry.decompressed_length = Some(block.len() as u64);
            entries.push(entry);
            stored.extend_from_slice(&encoded);
        }
        let table = Arc::new(BlockTable::from_entries(entries));
        let inner = Box::new(BufferedTransformExporter::new(CodecId::Rle, ChunkFraming::Whole));
        let mut exporter = BlockCompositeExporter::new(table, inner);
        let out = read_all(&mut exporter, &SourceDescriptor::memory(stored));
        prop_assert_eq!(out, blocks.concat());
        prop_assert!(exporter.skipped_blocks().is_empty());
    }

    #[test]
    fn available_is_idempotent(data in prop::collection::vec(any::<u8>(), 0..64), polls in 1usize..4) {
        let mut exporter = DirectExporter::new();
        exporter.open(&SourceDescriptor::memory(data.clone()));
        let mut out = Vec::new();
        loop {
            let first = exporter.available();
            for _ in 1..polls {
                prop_assert_eq!(exporter.available(), first);
            }
            if !first {
                break;
            }
            out.push(exporter.read());
        }
        exporter.close();
        prop_assert_eq!(out, data);
    }

    #[test]
    fn size_prefixed_pack_round_trips(
        data in prop::collection::vec(prop_oneof![Just(0u8), Just(1u8), any::<u8>()], 0..5000),
        chunk in 1usize..2048,
        align in 0u32..32,
    ) {
        let mut exporter = BufferedTransformExporter::new(CodecId::Lz77, ChunkFraming::SizePrefixed { align })
            .with_pack_chunk_size(chunk);
        let mut stored = Vec::new();
        let summary = exporter.pack(&mut data.as_slice(), &mut stored).unwrap();
        prop_assert_eq!(summary.bytes_out, stored.len() as u64);
        let out = read_all(&mut exporter, &SourceDescriptor::memory(stored));
        prop_assert_eq!(out, data);
    }

    #[test]
    fn declared_length_caps_output(data in prop::collection::vec(any::<u8>(), 1..400), cap in 0u64..500) {
        let stored = rle_encode(&data);
        let desc = SourceDescriptor::memory(stored).with_decompressed_length(cap);
        let mut exporter = BufferedTransformExporter::new(CodecId::Rle, ChunkFraming::Fixed { size: 1 << 16 });
        let out = read_all(&mut exporter, &desc);
        let expected = data.len().min(cap as usize);
        prop_assert_eq!(out.as_slice(), &data[..expected]);
    }

    #[test]
    fn decoders_respect_capacity(data in prop::collection::vec(any::<u8>(), 0..300), capacity in 0usize..1000) {
        if let Ok(out) = rle_decode(&data, capacity) {
            prop_assert!(out.len() <= capacity);
        }
        if let Ok(out) = lz77_decode(&data, capacity) {
            prop_assert!(out.len() <= capacity);
        }
        if let Ok(out) = lzss_decode(&data, capacity, 0) {
            prop_assert!(out.len() <= capacity);
        }
    }

    #[test]
    fn rle_round_trips(data in prop::collection::vec(prop_oneof![Just(9u8), any::<u8>()], 0..2000)) {
        prop_assert_eq!(rle_decode(&rle_encode(&data), data.len()).unwrap(), data);
    }
}
