//! CLI runtime header (`IMAGE_COR20_HEADER`, ECMA-335 II.25.3.3).

use crate::error::Result;
use crate::pe::DataDirectory;
use crate::reader::Reader;

/// Size of the header in bytes.
pub const CLI_HEADER_SIZE: usize = 72;

/// The module was signed with a strong name.
pub const COMIMAGE_FLAGS_STRONGNAMESIGNED: u32 = 0x0000_0008;

/// Offset of the metadata directory within the header.
const METADATA_DIRECTORY_OFFSET: usize = 8;

/// The CLI header of a managed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliHeader {
    /// Header size in bytes, normally [`CLI_HEADER_SIZE`].
    pub cb: u32,
    pub major_runtime_version: u16,
    pub minor_runtime_version: u16,
    /// Location of the BSJB metadata root.
    pub metadata: DataDirectory,
    /// `COMIMAGE_FLAGS_*`.
    pub flags: u32,
    /// Entry point MethodDef/File token, or native entry RVA.
    pub entry_point_token: u32,
    /// Managed resources.
    pub resources: DataDirectory,
    /// Strong-name signature blob; patched modules no longer verify against it.
    pub strong_name_signature: DataDirectory,
    /// Always zero.
    pub code_manager_table: DataDirectory,
    pub vtable_fixups: DataDirectory,
    /// Always zero.
    pub export_address_table_jumps: DataDirectory,
    /// Zero except for precompiled images.
    pub managed_native_header: DataDirectory,
    /// File offset of the header, for in-place updates.
    pub file_offset: usize,
}

impl CliHeader {
    /// Parse the header located at `file_offset` in `image`.
    pub fn parse(image: &[u8], file_offset: usize) -> Result<Self> {
        let mut reader = Reader::at(image, file_offset)?;
        let directory = |reader: &mut Reader<'_>| -> Result<DataDirectory> {
            Ok(DataDirectory {
                rva: reader.read_u32()?,
                size: reader.read_u32()?,
            })
        };
        Ok(Self {
            cb: reader.read_u32()?,
            major_runtime_version: reader.read_u16()?,
            minor_runtime_version: reader.read_u16()?,
            metadata: directory(&mut reader)?,
            flags: reader.read_u32()?,
            entry_point_token: reader.read_u32()?,
            resources: directory(&mut reader)?,
            strong_name_signature: directory(&mut reader)?,
            code_manager_table: directory(&mut reader)?,
            vtable_fixups: directory(&mut reader)?,
            export_address_table_jumps: directory(&mut reader)?,
            managed_native_header: directory(&mut reader)?,
            file_offset,
        })
    }

    /// Whether a strong-name signature is present.
    #[must_use]
    pub fn is_strong_name_signed(&self) -> bool {
        self.flags & COMIMAGE_FLAGS_STRONGNAMESIGNED != 0
            || self.strong_name_signature.is_present()
    }

    /// File offset of the metadata directory entry.
    #[must_use]
    pub fn metadata_directory_offset(&self) -> usize {
        self.file_offset + METADATA_DIRECTORY_OFFSET
    }
}
