//! Tables stream (#~ / #-) header parsing and writing.

use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::tables::{TableContext, TableId};
use crate::writer::Writer;

/// HeapSizes flag: an extra dword follows the row counts.
const EXTRA_DATA: u8 = 0x40;

/// The tables stream header.
#[derive(Debug, Clone)]
pub struct TablesHeader {
    /// Reserved (should be 0).
    pub reserved: u32,
    /// Major version (1 or 2).
    pub major_version: u8,
    /// Minor version (typically 0).
    pub minor_version: u8,
    /// Heap size flags.
    /// - Bit 0: #Strings uses 4-byte indices
    /// - Bit 1: #GUID uses 4-byte indices
    /// - Bit 2: #Blob uses 4-byte indices
    /// - Bit 6: extra data dword present
    pub heap_sizes: u8,
    /// Reserved (should be 1).
    pub reserved2: u8,
    /// Bitmask of valid (present) tables.
    pub valid: u64,
    /// Bitmask of sorted tables.
    pub sorted: u64,
    /// Row counts for each valid table.
    pub row_counts: [u32; 64],
    /// Extra dword written by some compilers, only present with heap-size bit 0x40.
    pub extra_data: Option<u32>,
}

impl TablesHeader {
    /// Parse the tables header from a reader.
    pub fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let reserved = reader.read_u32()?;
        let major_version = reader.read_u8()?;
        let minor_version = reader.read_u8()?;
        if !(1..=2).contains(&major_version) {
            return Err(Error::UnsupportedMetadataVersion {
                major: u16::from(major_version),
                minor: u16::from(minor_version),
            });
        }
        let heap_sizes = reader.read_u8()?;
        let reserved2 = reader.read_u8()?;
        let valid = reader.read_u64()?;
        let sorted = reader.read_u64()?;

        // Only the ECMA-335 module tables are understood; anything above would shift every row.
        if let Some(unknown) = (TableId::ALL.len()..64).find(|&i| valid & (1u64 << i) != 0) {
            return Err(Error::InvalidTableId(unknown as u8));
        }

        let mut row_counts = [0u32; 64];
        for (i, count) in row_counts.iter_mut().enumerate() {
            if valid & (1u64 << i) != 0 {
                *count = reader.read_u32()?;
            }
        }

        let extra_data = if heap_sizes & EXTRA_DATA != 0 {
            Some(reader.read_u32()?)
        } else {
            None
        };

        Ok(Self {
            reserved,
            major_version,
            minor_version,
            heap_sizes,
            reserved2,
            valid,
            sorted,
            row_counts,
            extra_data,
        })
    }

    /// Write the tables header to a writer.
    pub fn write_to(&self, writer: &mut Writer) {
        writer.write_u32(self.reserved);
        writer.write_u8(self.major_version);
        writer.write_u8(self.minor_version);
        writer.write_u8(self.heap_sizes);
        writer.write_u8(self.reserved2);
        writer.write_u64(self.valid);
        writer.write_u64(self.sorted);

        for (i, &count) in self.row_counts.iter().enumerate() {
            if self.valid & (1u64 << i) != 0 {
                writer.write_u32(count);
            }
        }

        if let Some(extra) = self.extra_data {
            writer.write_u32(extra);
        }
    }

    /// Check if a table is present.
    #[must_use]
    pub fn has_table(&self, table: TableId) -> bool {
        self.valid & (1u64 << (table as u8)) != 0
    }

    /// Get the row count for a table.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.row_counts[table as usize]
    }

    /// Set the row count for a table.
    pub fn set_row_count(&mut self, table: TableId, count: u32) {
        let bit = 1u64 << (table as u8);
        if count > 0 {
            self.valid |= bit;
        } else {
            self.valid &= !bit;
        }
        self.row_counts[table as usize] = count;
    }

    /// Create a table context from this header.
    #[must_use]
    pub fn context(&self) -> TableContext {
        TableContext::new(self.heap_sizes, self.row_counts)
    }

    /// Calculate the size of this header in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        let valid_count = self.valid.count_ones() as usize;
        let extra = if self.extra_data.is_some() { 4 } else { 0 };
        24 + valid_count * 4 + extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> TablesHeader {
        let mut header = TablesHeader {
            reserved: 0,
            major_version: 2,
            minor_version: 0,
            heap_sizes: 0,
            reserved2: 1,
            valid: 0,
            sorted: 0,
            row_counts: [0; 64],
            extra_data: None,
        };
        header.set_row_count(TableId::Module, 1);
        header.set_row_count(TableId::MethodDef, 3);
        header
    }

    #[test]
    fn test_write_then_parse() {
        let original = header();
        let mut writer = Writer::new();
        original.write_to(&mut writer);
        assert_eq!(writer.len(), original.size());

        let parsed = TablesHeader::parse(&mut Reader::new(writer.as_slice())).unwrap();
        assert!(parsed.has_table(TableId::MethodDef));
        assert!(!parsed.has_table(TableId::Param));
        assert_eq!(parsed.row_count(TableId::MethodDef), 3);
    }

    #[test]
    fn test_extra_data_is_consumed() {
        let mut original = header();
        original.heap_sizes |= EXTRA_DATA;
        original.extra_data = Some(0x1234);
        let mut writer = Writer::new();
        original.write_to(&mut writer);

        let mut reader = Reader::new(writer.as_slice());
        let parsed = TablesHeader::parse(&mut reader).unwrap();
        assert_eq!(parsed.extra_data, Some(0x1234));
        assert_eq!(reader.position(), parsed.size());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut original = header();
        original.major_version = 3;
        let mut writer = Writer::new();
        original.write_to(&mut writer);
        assert!(matches!(
            TablesHeader::parse(&mut Reader::new(writer.as_slice())),
            Err(Error::UnsupportedMetadataVersion { major: 3, .. })
        ));
    }

    #[test]
    fn test_rejects_tables_beyond_known_range() {
        let mut original = header();
        original.valid |= 1u64 << 0x30;
        let mut writer = Writer::new();
        original.write_to(&mut writer);
        assert!(matches!(
            TablesHeader::parse(&mut Reader::new(writer.as_slice())),
            Err(Error::InvalidTableId(0x30))
        ));
    }
}
