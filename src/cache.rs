//! Motion-vector compression and caching
//!
//! Motion fields are serialized as little-endian `i32` pairs and deflated
//! with zlib so recent fields can be retained cheaply. Records are
//! self-describing: grid dimensions and block size travel with the
//! compressed payload, so a record round-trips without external context.

use std::collections::VecDeque;
use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::motion::MotionField;

/// Number of compressed fields retained before eviction
pub const DEFAULT_CACHE_CAPACITY: usize = 3;

/// Compressed motion field plus the grid metadata needed to restore it
#[derive(Debug, Clone)]
pub struct CompressedMotionRecord {
    data: Vec<u8>,
    cols: usize,
    rows: usize,
    block_size: usize,
}

impl CompressedMotionRecord {
    pub fn compressed_len(&self) -> usize {
        self.data.len()
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

/// Deflate a motion field into a self-describing record
pub fn compress(field: &MotionField) -> Result<CompressedMotionRecord> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    for &v in field.data() {
        encoder.write_i32::<LittleEndian>(v)?;
    }
    let data = encoder.finish()?;
    Ok(CompressedMotionRecord {
        data,
        cols: field.cols(),
        rows: field.rows(),
        block_size: field.block_size(),
    })
}

/// Restore a motion field bit-for-bit from a compressed record
pub fn decompress(record: &CompressedMotionRecord) -> Result<MotionField> {
    let expected = record.cols * record.rows * 2;
    let mut decoder = ZlibDecoder::new(record.data.as_slice());
    let mut values = Vec::with_capacity(expected);
    for _ in 0..expected {
        values.push(decoder.read_i32::<LittleEndian>()?);
    }
    // A well-formed record is exhausted exactly at the grid boundary.
    let mut trailing = [0u8; 1];
    if decoder.read(&mut trailing)? != 0 {
        return Err(Error::invalid_input(
            "compressed motion record longer than its grid",
        ));
    }
    MotionField::from_raw(values, record.cols, record.rows, record.block_size)
}

/// Bounded FIFO of recently compressed motion fields
///
/// Pushing at capacity evicts the oldest record. Intended for short-lived
/// reuse of recent fields; not an index, so lookup is positional.
#[derive(Debug)]
pub struct MotionVectorCache {
    records: VecDeque<CompressedMotionRecord>,
    capacity: usize,
}

impl MotionVectorCache {
    pub fn new(capacity: usize) -> Self {
        MotionVectorCache {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Compress and retain a field, evicting the oldest at capacity
    pub fn push(&mut self, field: &MotionField) -> Result<()> {
        let record = compress(field)?;
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        Ok(())
    }

    /// Most recently pushed record
    pub fn latest(&self) -> Option<&CompressedMotionRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for MotionVectorCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_field(fill: i32) -> MotionField {
        let mut field = MotionField::new(4, 3, 8);
        for by in 0..3 {
            for bx in 0..4 {
                field.set(bx, by, fill + bx as i32, fill - by as i32);
            }
        }
        field
    }

    #[test]
    fn test_compress_round_trip_is_exact() {
        let field = sample_field(5);
        let record = compress(&field).unwrap();
        let restored = decompress(&record).unwrap();
        assert_eq!(restored, field);
    }

    #[test]
    fn test_record_is_self_describing() {
        let field = sample_field(0);
        let record = compress(&field).unwrap();
        assert_eq!(record.cols(), 4);
        assert_eq!(record.rows(), 3);
        assert_eq!(record.block_size(), 8);
    }

    #[test]
    fn test_uniform_field_compresses_well() {
        let field = MotionField::new(32, 32, 8);
        let record = compress(&field).unwrap();
        // 8 KiB of zeros should deflate far below raw size.
        assert!(record.compressed_len() < field.data().len() * 4 / 8);
    }

    #[test]
    fn test_cache_evicts_oldest_at_capacity() {
        let mut cache = MotionVectorCache::new(3);
        for fill in 0..5 {
            cache.push(&sample_field(fill)).unwrap();
        }
        assert_eq!(cache.len(), 3);
        let latest = decompress(cache.latest().unwrap()).unwrap();
        assert_eq!(latest.get(0, 0), (4, 4));

        // Oldest surviving record is fill = 2.
        let oldest = decompress(cache.records.front().unwrap()).unwrap();
        assert_eq!(oldest.get(0, 0), (2, 2));
    }

    #[test]
    fn test_cache_clear() {
        let mut cache = MotionVectorCache::default();
        cache.push(&sample_field(1)).unwrap();
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.latest().is_none());
    }
}
