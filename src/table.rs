//! Block tables: the per-resource list of independently compressed ranges.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::CodecId;
use crate::descriptor::SourceDescriptor;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableError {
    #[error("Column '{column}' has {found} entries, expected {expected}")]
    ColumnLength { column: &'static str, expected: usize, found: usize },
}

/// One independently decodable range.  `offset` is absolute within the
/// backing of the resource the table belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub offset:              u64,
    pub length:              u64,
    #[serde(default)]
    pub decompressed_length: Option<u64>,
    /// Per-block codec for tables that mix compression methods.
    #[serde(default)]
    pub codec:               Option<CodecId>,
    #[serde(default)]
    pub checksum:            Option<u32>,
}

impl BlockEntry {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length, decompressed_length: None, codec: None, checksum: None }
    }
}

/// Ordered block list.  Decoded order is table order; source order is
/// whatever the offsets say.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTable {
    pub blocks: Vec<BlockEntry>,
}

impl BlockTable {
    pub fn from_entries(blocks: Vec<BlockEntry>) -> Self {
        Self { blocks }
    }

    /// Build a table from parallel columns, the way directory formats usually
    /// store them.  Optional columns must match the offset column in length.
    pub fn from_columns(
        offsets:              &[u64],
        lengths:              &[u64],
        decompressed_lengths: Option<&[u64]>,
        codecs:               Option<&[CodecId]>,
    ) -> Result<Self, TableError> {
        let expected = offsets.len();
        check_column("lengths", expected, lengths.len())?;
        if let Some(column) = decompressed_lengths {
            check_column("decompressed_lengths", expected, column.len())?;
        }
        if let Some(column) = codecs {
            check_column("codecs", expected, column.len())?;
        }

        let blocks = (0..expected)
            .map(|i| BlockEntry {
                offset:              offsets[i],
                length:              lengths[i],
                decompressed_length: decompressed_lengths.map(|c| c[i]),
                codec:               codecs.map(|c| c[i]),
                checksum:            None,
            })
            .collect();
        Ok(Self { blocks })
    }

    /// Blocks laid out back to back starting at `start`.
    pub fn contiguous(start: u64, lengths: &[u64]) -> Self {
        let mut offset = start;
        let blocks = lengths
            .iter()
            .map(|&length| {
                let entry = BlockEntry::new(offset, length);
                offset += length;
                entry
            })
            .collect();
        Self { blocks }
    }

    pub fn len(&self) -> usize { self.blocks.len() }

    pub fn is_empty(&self) -> bool { self.blocks.is_empty() }

    pub fn get(&self, index: usize) -> Option<&BlockEntry> { self.blocks.get(index) }

    /// Sum of the declared decompressed lengths, if every block declares one.
    pub fn total_decompressed(&self) -> Option<u64> {
        self.blocks.iter().map(|b| b.decompressed_length).sum()
    }

    /// Descriptor for block `index`, derived from the resource descriptor:
    /// same backing and parameters, the block's own range, and the block's
    /// codec overriding the resource codec when it names one.
    pub fn block_descriptor(&self, resource: &SourceDescriptor, index: usize) -> Option<SourceDescriptor> {
        let entry = self.blocks.get(index)?;
        let mut sub = resource.sub_range(entry.offset, entry.length);
        sub.decompressed_length = entry.decompressed_length;
        sub.checksum = entry.checksum;
        if let Some(codec) = entry.codec {
            sub.params.codec = Some(codec);
        }
        Some(sub)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

fn check_column(column: &'static str, expected: usize, found: usize) -> Result<(), TableError> {
    if expected == found {
        Ok(())
    } else {
        Err(TableError::ColumnLength { column, expected, found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Backing;

    #[test]
    fn columns_must_agree() {
        let err = BlockTable::from_columns(&[0, 10], &[10], None, None).unwrap_err();
        assert_eq!(err, TableError::ColumnLength { column: "lengths", expected: 2, found: 1 });
        let err = BlockTable::from_columns(&[0], &[10], Some(&[1, 2][..]), None).unwrap_err();
        assert_eq!(err, TableError::ColumnLength { column: "decompressed_lengths", expected: 1, found: 2 });
    }

    #[test]
    fn block_descriptor_inherits_params() {
        let codecs = [CodecId::Rle, CodecId::Zstd];
        let table = BlockTable::from_columns(&[8, 0], &[4, 8], Some(&[16, 32][..]), Some(&codecs[..])).unwrap();
        let resource = SourceDescriptor::memory(vec![0u8; 12]).with_xor_key(vec![7]);
        let sub = table.block_descriptor(&resource, 1).unwrap();
        assert_eq!((sub.offset, sub.length), (0, 8));
        assert_eq!(sub.decompressed_length, Some(32));
        assert_eq!(sub.params.codec, Some(CodecId::Zstd));
        assert_eq!(sub.params.xor_key, Some(vec![7]));
        assert!(matches!(sub.backing, Backing::Memory(_)));
        assert!(table.block_descriptor(&resource, 2).is_none());
        assert_eq!(table.total_decompressed(), Some(48));
    }

    #[test]
    fn contiguous_offsets() {
        let table = BlockTable::contiguous(100, &[5, 0, 7]);
        let offsets: Vec<u64> = table.blocks.iter().map(|b| b.offset).collect();
        assert_eq!(offsets, vec![100, 105, 105]);
        assert_eq!(table.total_decompressed(), None);
    }

    #[test]
    fn json_round_trip() {
        let table = BlockTable::contiguous(0, &[1, 2, 3]);
        assert_eq!(BlockTable::from_bytes(&table.to_bytes().unwrap()).unwrap(), table);
    }
}
