//! Parsed CLR metadata: root, heaps and the tables a patcher navigates.
//!
//! Rows are read in place and never renumbered. Tables the patcher does not
//! need are skipped by their computed size so their bytes stay untouched.

use std::collections::HashMap;
use std::ops::Range;

use crate::error::{Error, Result};
use crate::heaps::{BlobHeap, StringsHeap, UserStringsHeap};
use crate::reader::Reader;
use crate::root::MetadataRoot;
use crate::stream::StreamHeader;
use crate::tables::{
    MethodDefRow, MethodPtrRow, ModuleRow, NestedClassRow, ParamPtrRow, ParamRow, TableContext,
    TableId, TablesHeader, TypeDefRow,
};
use crate::writer::Writer;

/// Parsed CLR metadata.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// The metadata root (BSJB header).
    pub root: MetadataRoot,
    /// The #Strings heap.
    pub strings: StringsHeap,
    /// The #US (user strings) heap.
    pub user_strings: UserStringsHeap,
    /// The #Blob heap.
    pub blobs: BlobHeap,
    /// The tables header.
    pub tables_header: TablesHeader,
    /// Offset of the first table row, relative to the metadata root.
    rows_offset: usize,
    /// Offset of every table relative to `rows_offset`.
    table_offsets: [usize; 64],
    /// Row sizes, indexed by table id.
    row_sizes: [usize; 64],
    /// MethodDef (or MethodPtr) slots owned by each TypeDef.
    method_ranges: Vec<Range<u32>>,
    /// Param (or ParamPtr) slots owned by each MethodDef.
    param_ranges: Vec<Range<u32>>,

    /// Module table rows (0x00).
    pub modules: Vec<ModuleRow>,
    /// TypeDef table rows (0x02).
    pub type_defs: Vec<TypeDefRow>,
    /// MethodPtr table rows (0x05) - only in uncompressed #- streams.
    pub method_ptrs: Vec<MethodPtrRow>,
    /// MethodDef table rows (0x06).
    pub method_defs: Vec<MethodDefRow>,
    /// ParamPtr table rows (0x07) - only in uncompressed #- streams.
    pub param_ptrs: Vec<ParamPtrRow>,
    /// Param table rows (0x08).
    pub params: Vec<ParamRow>,
    /// NestedClass table rows (0x29).
    pub nested_classes: Vec<NestedClassRow>,
}

impl Metadata {
    /// Parse metadata from the bytes of the metadata directory.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let root = MetadataRoot::parse(data)?;

        let strings = StringsHeap::parse(stream_data(&root, data, StreamHeader::STRINGS)?);
        let user_strings =
            UserStringsHeap::parse(stream_data(&root, data, StreamHeader::USER_STRINGS)?);
        let blobs = BlobHeap::parse(stream_data(&root, data, StreamHeader::BLOB)?);

        let tables_stream = root
            .tables_stream()
            .ok_or_else(|| Error::StreamNotFound(StreamHeader::TABLES.to_string()))?;
        let tables_data = stream_data(&root, data, &tables_stream.name)?;
        let mut reader = Reader::new(tables_data);
        let tables_header = TablesHeader::parse(&mut reader)?;
        let ctx = tables_header.context();

        let rows_offset = tables_stream.offset as usize + reader.position();
        let table_offsets = ctx.table_offsets();
        let mut row_sizes = [0usize; 64];
        for table in TableId::ALL {
            row_sizes[table as usize] = ctx.row_size(table);
        }

        // Tables are laid out back to back in id order; everything before
        // NestedClass is either parsed or skipped by size.
        let mut modules = Vec::new();
        let mut type_defs = Vec::new();
        let mut method_ptrs = Vec::new();
        let mut method_defs = Vec::new();
        let mut param_ptrs = Vec::new();
        let mut params = Vec::new();
        let mut nested_classes = Vec::new();
        for table in TableId::ALL {
            match table {
                TableId::Module => modules = parse_table(&mut reader, &ctx, table, ModuleRow::parse)?,
                TableId::TypeDef => {
                    type_defs = parse_table(&mut reader, &ctx, table, TypeDefRow::parse)?;
                }
                TableId::MethodPtr => {
                    method_ptrs = parse_table(&mut reader, &ctx, table, MethodPtrRow::parse)?;
                }
                TableId::MethodDef => {
                    method_defs = parse_table(&mut reader, &ctx, table, MethodDefRow::parse)?;
                }
                TableId::ParamPtr => {
                    param_ptrs = parse_table(&mut reader, &ctx, table, ParamPtrRow::parse)?;
                }
                TableId::Param => params = parse_table(&mut reader, &ctx, table, ParamRow::parse)?,
                TableId::NestedClass => {
                    nested_classes = parse_table(&mut reader, &ctx, table, NestedClassRow::parse)?;
                }
                _ => skip_table(&mut reader, &ctx, table)?,
            }
        }

        let method_slots = if method_ptrs.is_empty() {
            method_defs.len()
        } else {
            method_ptrs.len()
        };
        let param_slots = if param_ptrs.is_empty() {
            params.len()
        } else {
            param_ptrs.len()
        };
        let method_ranges = owned_ranges(type_defs.iter().map(|t| t.method_list), method_slots);
        let param_ranges = owned_ranges(method_defs.iter().map(|m| m.param_list), param_slots);

        log::debug!(
            "metadata {}: {} types, {} methods, {} params, #US {} bytes",
            root.version,
            type_defs.len(),
            method_defs.len(),
            params.len(),
            user_strings.size()
        );

        Ok(Self {
            root,
            strings,
            user_strings,
            blobs,
            tables_header,
            rows_offset,
            table_offsets,
            row_sizes,
            method_ranges,
            param_ranges,
            modules,
            type_defs,
            method_ptrs,
            method_defs,
            param_ptrs,
            params,
            nested_classes,
        })
    }

    /// Get the runtime version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.root.version
    }

    /// Offset of a row (1-based) relative to the metadata root.
    pub fn row_offset(&self, table: TableId, row: u32) -> Result<usize> {
        let max = self.tables_header.row_count(table);
        if row == 0 || row > max {
            return Err(Error::RowIndexOutOfBounds {
                table: table.name(),
                index: row,
                max,
            });
        }
        Ok(self.rows_offset
            + self.table_offsets[table as usize]
            + (row as usize - 1) * self.row_sizes[table as usize])
    }

    /// Get a MethodDef row by its 1-based index.
    pub fn method_def(&self, row: u32) -> Result<&MethodDefRow> {
        row_at(&self.method_defs, TableId::MethodDef, row)
    }

    /// MethodDef rows owned by the TypeDef at `type_index` (0-based), in declaration order.
    pub fn methods_of(&self, type_index: usize) -> Result<Vec<u32>> {
        let slots = self.method_ranges.get(type_index).cloned().ok_or(
            Error::RowIndexOutOfBounds {
                table: TableId::TypeDef.name(),
                index: type_index as u32 + 1,
                max: self.type_defs.len() as u32,
            },
        )?;
        if self.method_ptrs.is_empty() {
            return Ok(slots.collect());
        }
        slots
            .map(|slot| Ok(row_at(&self.method_ptrs, TableId::MethodPtr, slot)?.method))
            .collect()
    }

    /// Param rows owned by the MethodDef at 1-based `method_row`, in table order.
    pub fn params_of(&self, method_row: u32) -> Result<Vec<u32>> {
        self.method_def(method_row)?;
        let slots = self.param_ranges[method_row as usize - 1].clone();
        if self.param_ptrs.is_empty() {
            return Ok(slots.collect());
        }
        slots
            .map(|slot| Ok(row_at(&self.param_ptrs, TableId::ParamPtr, slot)?.param))
            .collect()
    }

    /// Get a Param row by its 1-based index.
    pub fn param(&self, row: u32) -> Result<&ParamRow> {
        row_at(&self.params, TableId::Param, row)
    }

    /// Fully-qualified names of every TypeDef, `Namespace.Name` or `Enclosing/Nested`.
    pub fn type_names(&self) -> Result<Vec<String>> {
        let enclosing: HashMap<u32, u32> = self
            .nested_classes
            .iter()
            .map(|n| (n.nested_class, n.enclosing_class))
            .collect();

        let mut names = Vec::with_capacity(self.type_defs.len());
        for i in 0..self.type_defs.len() {
            let mut row = i as u32 + 1;
            let mut name = self.simple_type_name(row)?;
            // Bounded walk so a cyclic NestedClass table cannot loop forever.
            for _ in 0..self.type_defs.len() {
                let Some(&outer) = enclosing.get(&row) else {
                    break;
                };
                row = outer;
                name = format!("{}/{name}", self.simple_type_name(row)?);
            }
            names.push(name);
        }
        Ok(names)
    }

    fn simple_type_name(&self, row: u32) -> Result<String> {
        let type_def = row_at(&self.type_defs, TableId::TypeDef, row)?;
        let name = self.strings.get(type_def.type_name)?;
        let namespace = self.strings.get(type_def.type_namespace)?;
        Ok(if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}.{name}")
        })
    }

    /// Rebuild the metadata block with `user_strings` in place of the #US heap.
    ///
    /// Every other stream is copied byte for byte; only stream offsets in the root change.
    pub fn relayout_with_user_strings(
        &self,
        data: &[u8],
        user_strings: &UserStringsHeap,
    ) -> Result<Vec<u8>> {
        let mut streams = Vec::with_capacity(self.root.streams.len() + 1);
        for stream in &self.root.streams {
            let bytes = if stream.name == StreamHeader::USER_STRINGS {
                user_strings.data()
            } else {
                stream_data(&self.root, data, &stream.name)?
            };
            streams.push((stream.name.as_str(), bytes));
        }
        if self.root.find_stream(StreamHeader::USER_STRINGS).is_none() {
            streams.push((StreamHeader::USER_STRINGS, user_strings.data()));
        }
        Ok(build_metadata_block(&self.root, &streams))
    }
}

/// Lay out a metadata root followed by its streams, each 4-byte aligned.
pub(crate) fn build_metadata_block(template: &MetadataRoot, streams: &[(&str, &[u8])]) -> Vec<u8> {
    let mut root = MetadataRoot {
        streams: streams
            .iter()
            .map(|&(name, _)| StreamHeader::new(name, 0, 0))
            .collect(),
        ..template.clone()
    };

    let mut offset = root.header_size();
    for (header, &(_, bytes)) in root.streams.iter_mut().zip(streams) {
        let size = bytes.len().next_multiple_of(4);
        header.offset = offset as u32;
        header.size = size as u32;
        offset += size;
    }

    let mut writer = Writer::with_capacity(offset);
    root.write_to(&mut writer);
    for &(_, bytes) in streams {
        writer.write_bytes(bytes);
        writer.align(4);
    }
    writer.into_inner()
}

fn stream_data<'a>(root: &MetadataRoot, data: &'a [u8], name: &str) -> Result<&'a [u8]> {
    let Some(stream) = root.find_stream(name) else {
        return Ok(&[]);
    };
    let start = stream.offset as usize;
    let end = start + stream.size as usize;
    data.get(start..end).ok_or(Error::UnexpectedEof {
        offset: start,
        needed: stream.size as usize,
    })
}

fn parse_table<T, F>(
    reader: &mut Reader<'_>,
    ctx: &TableContext,
    table: TableId,
    parser: F,
) -> Result<Vec<T>>
where
    F: Fn(&mut Reader<'_>, &TableContext) -> Result<T>,
{
    let count = ctx.row_count(table) as usize;
    let mut rows = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        rows.push(parser(reader, ctx)?);
    }
    Ok(rows)
}

fn skip_table(reader: &mut Reader<'_>, ctx: &TableContext, table: TableId) -> Result<()> {
    let count = ctx.row_count(table) as usize;
    reader.skip(count * ctx.row_size(table))
}

fn row_at<T>(rows: &[T], table: TableId, row: u32) -> Result<&T> {
    row.checked_sub(1)
        .and_then(|i| rows.get(i as usize))
        .ok_or(Error::RowIndexOutOfBounds {
            table: table.name(),
            index: row,
            max: rows.len() as u32,
        })
}

/// 1-based slots owned by each entry of a list-start column, clamped to `slot_count`.
///
/// Entry `i` owns `starts[i]..starts[i + 1]`; the last entry runs to the end of the table.
fn owned_ranges(starts: impl Iterator<Item = u32>, slot_count: usize) -> Vec<Range<u32>> {
    let limit = slot_count as u32 + 1;
    let starts: Vec<u32> = starts.map(|start| start.clamp(1, limit)).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(limit);
            start..end.max(start)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_ranges() {
        let ranges = owned_ranges([1, 1, 3].into_iter(), 4);
        assert_eq!(ranges, vec![1..1, 1..3, 3..5]);
    }

    #[test]
    fn test_owned_ranges_clamp_corrupt_lists() {
        // A list start past the end of the table owns nothing.
        assert_eq!(owned_ranges([9].into_iter(), 4), vec![5..5]);
        // A decreasing next start never produces a reversed range.
        assert_eq!(owned_ranges([3, 2].into_iter(), 4), vec![3..3, 2..5]);
    }

    #[test]
    fn test_owned_ranges_cover_large_tables() {
        let count = 50_000u32;
        let ranges = owned_ranges((1..=count).map(|i| i * 2 - 1), count as usize * 2);
        assert_eq!(ranges.len(), count as usize);
        assert_eq!(ranges[0], 1..3);
        assert_eq!(ranges[count as usize - 1], count * 2 - 1..count * 2 + 1);
        assert!(ranges.windows(2).all(|w| w[0].end == w[1].start));
    }

    #[test]
    fn test_build_metadata_block_aligns_streams() {
        let template = MetadataRoot {
            major_version: 1,
            minor_version: 1,
            reserved: 0,
            version: "v4.0.30319".to_string(),
            flags: 0,
            streams: Vec::new(),
        };
        let block = build_metadata_block(
            &template,
            &[(StreamHeader::STRINGS, b"\0abc\0"), (StreamHeader::USER_STRINGS, &[0])],
        );
        let root = MetadataRoot::parse(&block).unwrap();
        let strings = root.find_stream(StreamHeader::STRINGS).unwrap();
        let us = root.find_stream(StreamHeader::USER_STRINGS).unwrap();
        assert_eq!(strings.offset as usize, root.header_size());
        assert_eq!(strings.size, 8);
        assert_eq!(us.offset, strings.offset + 8);
        assert_eq!(block.len(), us.offset as usize + 4);
        assert_eq!(&block[strings.offset as usize..][..5], b"\0abc\0");
    }
}
