//! Metadata stream header parsing and writing.

use crate::error::Result;
use crate::reader::Reader;
use crate::writer::Writer;

/// A metadata stream header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset from the start of the metadata root.
    pub offset: u32,
    /// Size of the stream in bytes.
    pub size: u32,
    /// Stream name (e.g., "#~", "#Strings", "#US", "#GUID", "#Blob").
    pub name: String,
}

impl StreamHeader {
    /// Well-known stream names.
    pub const TABLES: &'static str = "#~";
    pub const TABLES_UNCOMPRESSED: &'static str = "#-";
    pub const STRINGS: &'static str = "#Strings";
    pub const USER_STRINGS: &'static str = "#US";
    pub const GUID: &'static str = "#GUID";
    pub const BLOB: &'static str = "#Blob";

    /// Create a header for a stream at `offset` of `size` bytes.
    #[must_use]
    pub fn new(name: &str, offset: u32, size: u32) -> Self {
        Self {
            offset,
            size,
            name: name.to_string(),
        }
    }

    /// Parse a stream header from the reader.
    pub fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let offset = reader.read_u32()?;
        let size = reader.read_u32()?;

        let name_start = reader.position();
        let name = reader.read_null_str()?.to_string();

        // Stream names are 4-byte aligned (including null terminator)
        let padding = padding_for(reader.position() - name_start);
        reader.skip(padding)?;

        Ok(Self { offset, size, name })
    }

    /// Write the stream header to a writer.
    pub fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.offset);
        writer.write_u32(self.size);
        writer.write_null_str(&self.name);
        for _ in 0..padding_for(self.name.len() + 1) {
            writer.write_u8(0);
        }
    }

    /// Calculate the serialized size of this header.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        let name_len_with_null = self.name.len() + 1;
        8 + name_len_with_null + padding_for(name_len_with_null)
    }

    /// Check if this is the tables stream (#~ or #-).
    #[must_use]
    pub fn is_tables(&self) -> bool {
        self.name == Self::TABLES || self.name == Self::TABLES_UNCOMPRESSED
    }
}

fn padding_for(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_padding() {
        for (name, size) in [("#~", 12), ("#US", 12), ("#Blob", 16), ("#Strings", 20)] {
            let header = StreamHeader::new(name, 0x6C, 0x10);
            let mut writer = Writer::new();
            header.write(&mut writer);
            assert_eq!(writer.len(), size, "{name}");
            assert_eq!(header.serialized_size(), size);

            let mut reader = Reader::new(writer.as_slice());
            assert_eq!(StreamHeader::parse(&mut reader).unwrap(), header);
            assert_eq!(reader.position(), size);
        }
    }
}
