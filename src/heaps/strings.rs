//! #Strings heap - null-terminated UTF-8 identifiers.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// The #Strings heap containing null-terminated UTF-8 strings.
#[derive(Debug, Clone, Default)]
pub struct StringsHeap {
    /// Raw heap data.
    data: Vec<u8>,
    /// Offsets of strings added through [`StringsHeap::add`].
    index_map: HashMap<String, u32>,
}

impl StringsHeap {
    /// Create a new empty strings heap.
    #[must_use]
    pub fn new() -> Self {
        // Heap always starts with a null byte (empty string at index 0)
        let mut index_map = HashMap::new();
        index_map.insert(String::new(), 0);
        Self {
            data: vec![0],
            index_map,
        }
    }

    /// Parse the strings heap from raw bytes.
    #[must_use]
    pub fn parse(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            index_map: HashMap::new(),
        }
    }

    /// Get a string at the given offset.
    pub fn get(&self, offset: u32) -> Result<&str> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            // Index 0 of an absent heap is still the empty string.
            return if offset == 0 {
                Ok("")
            } else {
                Err(Error::InvalidString(offset))
            };
        }

        let end = self.data[offset..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::InvalidString(offset))?;

        std::str::from_utf8(&self.data[offset..offset + end])
            .map_err(|_| Error::InvalidString(offset))
    }

    /// Add a string to the heap and return its offset.
    pub fn add(&mut self, s: &str) -> u32 {
        if let Some(&offset) = self.index_map.get(s) {
            return offset;
        }

        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.index_map.insert(s.to_string(), offset);
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
        let heap = StringsHeap::parse(b"\0Hello\0World\0");
        assert_eq!(heap.get(0).unwrap(), "");
        assert_eq!(heap.get(1).unwrap(), "Hello");
        assert_eq!(heap.get(7).unwrap(), "World");
        // Suffix sharing: an index may point into the middle of a string.
        assert_eq!(heap.get(3).unwrap(), "llo");
    }

    #[test]
    fn test_out_of_range() {
        let heap = StringsHeap::parse(b"\0Hi\0");
        assert!(matches!(heap.get(9), Err(Error::InvalidString(9))));
        assert_eq!(StringsHeap::default().get(0).unwrap(), "");
    }

    #[test]
    fn test_add_deduplicates() {
        let mut heap = StringsHeap::new();
        let first = heap.add("IsFeatureActivated");
        assert_eq!(heap.add("IsFeatureActivated"), first);
        assert_eq!(heap.get(first).unwrap(), "IsFeatureActivated");
        assert_eq!(heap.data(), b"\0IsFeatureActivated\0");
    }
}
