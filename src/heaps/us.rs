//! #US (User Strings) heap - length-prefixed UTF-16LE strings.

use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::writer::Writer;

/// Largest heap offset an `ldstr` token (0x70xxxxxx) can address.
pub const MAX_USER_STRING_OFFSET: usize = 0x00FF_FFFF;

/// The #US heap containing user strings (UTF-16LE with length prefix).
#[derive(Debug, Clone, Default)]
pub struct UserStringsHeap {
    /// Raw heap data.
    data: Vec<u8>,
}

impl UserStringsHeap {
    /// Create a new empty user strings heap.
    #[must_use]
    pub fn new() -> Self {
        // Heap always starts with a null byte
        Self { data: vec![0] }
    }

    /// Parse the user strings heap from raw bytes.
    #[must_use]
    pub fn parse(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Get a user string at the given offset.
    pub fn get(&self, offset: u32) -> Result<String> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Err(Error::InvalidUserString(offset));
        }

        let mut reader = Reader::new(&self.data[offset..]);
        let blob_len = reader.read_compressed_uint()? as usize;

        if blob_len == 0 {
            return Ok(String::new());
        }

        // The blob length includes a trailing byte indicating if any chars are > 0x7F
        let str_len = blob_len - 1;
        if str_len % 2 != 0 {
            return Err(Error::InvalidUserString(offset));
        }

        let bytes = reader
            .read_bytes(str_len)
            .map_err(|_| Error::InvalidUserString(offset))?;
        decode_utf16(bytes).ok_or(Error::InvalidUserString(offset))
    }

    /// Offset of an existing entry equal to `s`, if any.
    ///
    /// The empty string only matches a real zero-length entry, never the leading null byte.
    #[must_use]
    pub fn find(&self, s: &str) -> Option<u32> {
        let wanted: Vec<u16> = s.encode_utf16().collect();
        let mut offset = 1;
        while offset < self.data.len() {
            let mut reader = Reader::new(&self.data[offset..]);
            let blob_len = reader.read_compressed_uint().ok()? as usize;
            let start = offset + reader.position();
            let end = start.checked_add(blob_len)?;
            if end > self.data.len() {
                return None;
            }
            if blob_len > 0 && (blob_len - 1) == wanted.len() * 2 {
                let matches = self.data[start..end - 1]
                    .chunks_exact(2)
                    .zip(&wanted)
                    .all(|(chunk, &c)| u16::from_le_bytes([chunk[0], chunk[1]]) == c);
                if matches {
                    return Some(offset as u32);
                }
            }
            // Compilers pad the heap with zero bytes; a zero length advances by one.
            offset = end.max(offset + 1);
        }
        None
    }

    /// Add a user string to the heap and return its offset.
    pub fn add(&mut self, s: &str) -> u32 {
        let offset = self.data.len() as u32;

        let utf16: Vec<u16> = s.encode_utf16().collect();

        // Blob length = string bytes + 1 (trailing flag byte)
        let mut writer = Writer::new();
        writer.write_compressed_uint((utf16.len() * 2 + 1) as u32);
        self.data.extend_from_slice(writer.as_slice());

        for &c in &utf16 {
            self.data.extend_from_slice(&c.to_le_bytes());
        }

        self.data.push(u8::from(utf16.iter().any(|&c| needs_special_handling(c))));

        offset
    }

    /// Get the raw heap data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get the size of the heap.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    let utf16: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    String::from_utf16(&utf16).ok()
}

/// ECMA-335 II.24.2.4: the trailing byte is 1 when a character needs more than 8-bit handling.
fn needs_special_handling(c: u16) -> bool {
    c > 0xFF || matches!(c, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_heap_starts_with_null() {
        let heap = UserStringsHeap::new();
        assert_eq!(heap.size(), 1);
        assert_eq!(heap.data()[0], 0);
    }

    #[test]
    fn test_add_and_get_string() {
        let mut heap = UserStringsHeap::new();
        let offset = heap.add("Hello");
        assert_eq!(heap.get(offset).unwrap(), "Hello");
    }

    #[test]
    fn test_unicode_string() {
        let mut heap = UserStringsHeap::new();
        let offset = heap.add("日本語");
        assert_eq!(heap.get(offset).unwrap(), "日本語");
        assert_eq!(*heap.data().last().unwrap(), 1);
    }

    #[test]
    fn test_parse_heap() {
        // null byte + "Hi" in UTF-16LE, length = 2 chars * 2 + 1 flag byte
        let data = [0x00, 0x05, 0x48, 0x00, 0x69, 0x00, 0x00];
        let heap = UserStringsHeap::parse(&data);
        assert_eq!(heap.get(1).unwrap(), "Hi");
    }

    #[test]
    fn test_encoding() {
        let mut heap = UserStringsHeap::new();
        heap.add("A");
        // null byte + length (3) + 'A' UTF-16LE (0x41, 0x00) + flag (0)
        assert_eq!(heap.data(), &[0x00, 0x03, 0x41, 0x00, 0x00]);
    }

    #[test]
    fn test_find_existing_entries() {
        let mut heap = UserStringsHeap::new();
        let licensed = heap.add("Licensed");
        let empty = heap.add("");
        let lic = heap.add("Lic");
        assert_eq!(heap.find("Licensed"), Some(licensed));
        assert_eq!(heap.find(""), Some(empty));
        assert_eq!(heap.find("Lic"), Some(lic));
        assert_eq!(heap.find("Trial"), None);
    }

    #[test]
    fn test_find_empty_needs_real_entry() {
        let mut heap = UserStringsHeap::new();
        heap.add("x");
        assert_eq!(heap.find(""), None);
    }

    #[test]
    fn test_odd_length_is_invalid() {
        let heap = UserStringsHeap::parse(&[0x00, 0x02, 0x41, 0x00]);
        assert!(matches!(heap.get(1), Err(Error::InvalidUserString(1))));
    }
}
