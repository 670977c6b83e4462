//! #Blob heap - length-prefixed binary data (signatures, constants).

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::writer::Writer;

/// The #Blob heap containing length-prefixed binary blobs.
#[derive(Debug, Clone, Default)]
pub struct BlobHeap {
    /// Raw heap data.
    data: Vec<u8>,
    /// Offsets of blobs added through [`BlobHeap::add`].
    index_map: HashMap<Vec<u8>, u32>,
}

impl BlobHeap {
    /// Create a new empty blob heap.
    #[must_use]
    pub fn new() -> Self {
        let mut index_map = HashMap::new();
        index_map.insert(Vec::new(), 0);
        Self {
            data: vec![0],
            index_map,
        }
    }

    /// Parse the blob heap from raw bytes.
    #[must_use]
    pub fn parse(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            index_map: HashMap::new(),
        }
    }

    /// Get a blob at the given offset.
    pub fn get(&self, offset: u32) -> Result<&[u8]> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Err(Error::InvalidBlob(offset));
        }

        let mut reader = Reader::new(&self.data[offset..]);
        let len = reader.read_compressed_uint()? as usize;
        let blob_start = offset + reader.position();
        let blob_end = blob_start + len;

        if blob_end > self.data.len() {
            return Err(Error::InvalidBlob(offset));
        }

        Ok(&self.data[blob_start..blob_end])
    }

    /// Add a blob to the heap and return its offset.
    pub fn add(&mut self, blob: &[u8]) -> u32 {
        if let Some(&offset) = self.index_map.get(blob) {
            return offset;
        }

        let offset = self.data.len() as u32;
        let mut writer = Writer::new();
        writer.write_compressed_uint(blob.len() as u32);
        self.data.extend_from_slice(writer.as_slice());
        self.data.extend_from_slice(blob);
        self.index_map.insert(blob.to_vec(), offset);
        offset
    }

    /// Get the raw heap data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heap() {
        let heap = BlobHeap::parse(&[0x00, 0x02, 0xAB, 0xCD]);
        assert_eq!(heap.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(heap.get(1).unwrap(), &[0xAB, 0xCD]);
    }

    #[test]
    fn test_truncated_blob() {
        let heap = BlobHeap::parse(&[0x00, 0x05, 0xAB]);
        assert!(matches!(heap.get(1), Err(Error::InvalidBlob(1))));
    }

    #[test]
    fn test_add_and_get() {
        let mut heap = BlobHeap::new();
        // instance bool (string)
        let offset = heap.add(&[0x20, 0x01, 0x02, 0x0E]);
        assert_eq!(heap.add(&[0x20, 0x01, 0x02, 0x0E]), offset);
        assert_eq!(heap.get(offset).unwrap(), &[0x20, 0x01, 0x02, 0x0E]);
    }
}
