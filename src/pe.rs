//! PE/COFF container: headers, data directories and the section table.
//!
//! Only what a managed module needs is parsed. Header fields that change when a
//! section is appended are patched in place in the image bytes.

use crate::error::{Error, Result};
use crate::reader::Reader;

const DOS_SIGNATURE: u16 = 0x5A4D;
const PE_SIGNATURE: u32 = 0x0000_4550;
const PE32_MAGIC: u16 = 0x010B;
const PE32_PLUS_MAGIC: u16 = 0x020B;
const COFF_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;

/// Data directory index of the Authenticode certificate table.
pub const SECURITY_DIRECTORY: usize = 4;
/// Data directory index of the CLR runtime header.
pub const CLR_RUNTIME_DIRECTORY: usize = 14;

/// Initialized data, readable.
const PATCH_SECTION_CHARACTERISTICS: u32 = 0x4000_0040;
/// Name of the section appended for relocated bodies and metadata.
pub const PATCH_SECTION_NAME: [u8; 8] = *b".patch\0\0";

/// An RVA and size pair from the optional header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    /// Relative virtual address, 0 when absent.
    pub rva: u32,
    /// Size in bytes.
    pub size: u32,
}

impl DataDirectory {
    /// Whether the directory is populated.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.rva != 0 && self.size != 0
    }
}

/// A section table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// NUL-padded section name.
    pub name: [u8; 8],
    /// Size when mapped; may be 0 in old linkers' output.
    pub virtual_size: u32,
    /// RVA of the first mapped byte.
    pub virtual_address: u32,
    /// Size of the initialized data on disk.
    pub size_of_raw_data: u32,
    /// File offset of the section data.
    pub pointer_to_raw_data: u32,
    /// `IMAGE_SCN_*` flags.
    pub characteristics: u32,
}

impl SectionHeader {
    fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let name = reader.read_array::<8>()?;
        let virtual_size = reader.read_u32()?;
        let virtual_address = reader.read_u32()?;
        let size_of_raw_data = reader.read_u32()?;
        let pointer_to_raw_data = reader.read_u32()?;
        // relocations, line numbers and their counts
        reader.skip(12)?;
        let characteristics = reader.read_u32()?;
        Ok(Self {
            name,
            virtual_size,
            virtual_address,
            size_of_raw_data,
            pointer_to_raw_data,
            characteristics,
        })
    }

    fn write(&self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.name);
        out[8..12].copy_from_slice(&self.virtual_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.virtual_address.to_le_bytes());
        out[16..20].copy_from_slice(&self.size_of_raw_data.to_le_bytes());
        out[20..24].copy_from_slice(&self.pointer_to_raw_data.to_le_bytes());
        out[24..36].fill(0);
        out[36..40].copy_from_slice(&self.characteristics.to_le_bytes());
    }

    /// Display name with trailing NULs removed.
    #[must_use]
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Extent in memory; falls back to the raw size for linkers that leave VirtualSize at 0.
    fn mapped_size(&self) -> u32 {
        if self.virtual_size == 0 {
            self.size_of_raw_data
        } else {
            self.virtual_size
        }
    }
}

/// Parsed PE headers of a module image.
#[derive(Debug, Clone)]
pub struct PeImage {
    /// File offset of the `PE\0\0` signature.
    pub e_lfanew: u32,
    /// Optional header magic is 0x20B.
    pub is_pe32_plus: bool,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    /// Size of all headers, rounded up to `file_alignment`.
    pub size_of_headers: u32,
    pub size_of_initialized_data: u32,
    /// Stored checksum; 0 when the linker left it unset.
    pub checksum: u32,
    /// Optional header data directories, in index order.
    pub data_directories: Vec<DataDirectory>,
    /// Section table, in file order.
    pub sections: Vec<SectionHeader>,
    optional_header_offset: usize,
    section_table_offset: usize,
}

impl PeImage {
    /// Parse the DOS, COFF and optional headers plus the section table.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        if reader.read_u16().ok() != Some(DOS_SIGNATURE) {
            return Err(Error::InvalidDosHeader);
        }
        reader.seek(0x3C).map_err(|_| Error::InvalidDosHeader)?;
        let e_lfanew = reader.read_u32().map_err(|_| Error::InvalidDosHeader)?;

        let pe_offset = e_lfanew as usize;
        let mut reader = Reader::at(data, pe_offset).map_err(|_| Error::InvalidPeSignature(pe_offset))?;
        if reader.read_u32().ok() != Some(PE_SIGNATURE) {
            return Err(Error::InvalidPeSignature(pe_offset));
        }

        // COFF file header
        let _machine = reader.read_u16()?;
        let number_of_sections = reader.read_u16()?;
        reader.skip(12)?;
        let size_of_optional_header = reader.read_u16()?;
        let _characteristics = reader.read_u16()?;

        let optional_header_offset = pe_offset + 4 + COFF_HEADER_SIZE;
        let magic = reader.read_u16()?;
        let is_pe32_plus = match magic {
            PE32_MAGIC => false,
            PE32_PLUS_MAGIC => true,
            other => return Err(Error::InvalidOptionalHeaderMagic(other)),
        };

        let field = |offset: usize| -> Result<u32> {
            Reader::at(data, optional_header_offset + offset)?.read_u32()
        };
        let size_of_initialized_data = field(8)?;
        let section_alignment = field(32)?;
        let file_alignment = field(36)?;
        let size_of_image = field(56)?;
        let size_of_headers = field(60)?;
        let checksum = field(64)?;

        let (rva_count_offset, directories_offset) = if is_pe32_plus { (108, 112) } else { (92, 96) };
        let number_of_rva_and_sizes = field(rva_count_offset)?;
        let mut reader = Reader::at(data, optional_header_offset + directories_offset)?;
        let directory_count = number_of_rva_and_sizes.min(16) as usize;
        let mut data_directories = Vec::with_capacity(directory_count);
        for _ in 0..directory_count {
            data_directories.push(DataDirectory {
                rva: reader.read_u32()?,
                size: reader.read_u32()?,
            });
        }

        let section_table_offset = optional_header_offset + size_of_optional_header as usize;
        let mut reader = Reader::at(data, section_table_offset)?;
        let mut sections = Vec::with_capacity(usize::from(number_of_sections));
        for _ in 0..number_of_sections {
            sections.push(SectionHeader::parse(&mut reader)?);
        }

        Ok(Self {
            e_lfanew,
            is_pe32_plus,
            section_alignment,
            file_alignment,
            size_of_image,
            size_of_headers,
            size_of_initialized_data,
            checksum,
            data_directories,
            sections,
            optional_header_offset,
            section_table_offset,
        })
    }

    /// The CLR runtime header directory; absent for native images.
    pub fn clr_directory(&self) -> Result<DataDirectory> {
        self.data_directories
            .get(CLR_RUNTIME_DIRECTORY)
            .copied()
            .filter(DataDirectory::is_present)
            .ok_or(Error::MissingCliHeader)
    }

    /// Whether the image carries an Authenticode certificate table.
    #[must_use]
    pub fn has_authenticode(&self) -> bool {
        self.data_directories
            .get(SECURITY_DIRECTORY)
            .is_some_and(DataDirectory::is_present)
    }

    /// Translate an RVA to a file offset.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        if rva < self.size_of_headers && self.sections.iter().all(|s| rva < s.virtual_address) {
            return Ok(rva as usize);
        }
        self.sections
            .iter()
            .find(|s| rva >= s.virtual_address && rva - s.virtual_address < s.mapped_size())
            .map(|s| (s, rva - s.virtual_address))
            .filter(|&(s, delta)| delta < s.size_of_raw_data)
            .and_then(|(s, delta)| s.pointer_to_raw_data.checked_add(delta))
            .map(|offset| offset as usize)
            .ok_or(Error::UnmappedRva(rva))
    }

    /// File bytes backing `len` bytes at `rva`.
    pub fn slice<'a>(&self, data: &'a [u8], rva: u32, len: usize) -> Result<&'a [u8]> {
        let offset = self.rva_to_offset(rva)?;
        data.get(offset..offset.saturating_add(len))
            .ok_or(Error::UnexpectedEof { offset, needed: len })
    }

    /// RVA the next appended section will receive.
    #[must_use]
    pub fn next_section_rva(&self) -> u32 {
        let end = self
            .sections
            .iter()
            .map(|s| s.virtual_address.saturating_add(s.mapped_size()))
            .max()
            .unwrap_or(self.size_of_headers);
        align_up(end, self.section_alignment)
    }

    /// Fail unless the header area has room for one more section header.
    pub fn check_section_header_space(&self) -> Result<()> {
        let table_end = self.section_table_offset + (self.sections.len() + 1) * SECTION_HEADER_SIZE;
        let first_raw = self
            .sections
            .iter()
            .map(|s| s.pointer_to_raw_data)
            .filter(|&p| p != 0)
            .min()
            .unwrap_or(self.size_of_headers);
        if table_end > self.size_of_headers as usize || table_end > first_raw as usize {
            return Err(Error::NoSectionHeaderSpace(self.size_of_headers));
        }
        Ok(())
    }

    /// Append an initialized-data section holding `contents` and update the headers in `image`.
    ///
    /// Returns the RVA of the new section, which equals [`PeImage::next_section_rva`].
    pub fn append_section(&mut self, image: &mut Vec<u8>, contents: &[u8]) -> Result<u32> {
        self.check_section_header_space()?;

        let virtual_address = self.next_section_rva();
        let pointer_to_raw_data = align_up(image.len() as u32, self.file_alignment);
        let size_of_raw_data = align_up(contents.len() as u32, self.file_alignment);
        let section = SectionHeader {
            name: PATCH_SECTION_NAME,
            virtual_size: contents.len() as u32,
            virtual_address,
            size_of_raw_data,
            pointer_to_raw_data,
            characteristics: PATCH_SECTION_CHARACTERISTICS,
        };

        image.resize(pointer_to_raw_data as usize, 0);
        image.extend_from_slice(contents);
        image.resize((pointer_to_raw_data + size_of_raw_data) as usize, 0);

        let header_offset = self.section_table_offset + self.sections.len() * SECTION_HEADER_SIZE;
        section.write(&mut image[header_offset..header_offset + SECTION_HEADER_SIZE]);
        self.sections.push(section);

        self.size_of_image = align_up(virtual_address + contents.len() as u32, self.section_alignment);
        self.size_of_initialized_data = self.size_of_initialized_data.wrapping_add(size_of_raw_data);

        let coff = self.e_lfanew as usize + 4;
        patch_u16(image, coff + 2, self.sections.len() as u16);
        patch_u32(image, self.optional_header_offset + 8, self.size_of_initialized_data);
        patch_u32(image, self.optional_header_offset + 56, self.size_of_image);

        log::debug!(
            "appended section {} at RVA 0x{virtual_address:08X}, file offset 0x{pointer_to_raw_data:X}, {} bytes",
            String::from_utf8_lossy(&PATCH_SECTION_NAME).trim_end_matches('\0'),
            contents.len()
        );
        Ok(virtual_address)
    }

    /// Recompute the optional-header checksum when the input carried one.
    pub fn refresh_checksum(&mut self, image: &mut [u8]) {
        if self.checksum == 0 {
            return;
        }
        let offset = self.optional_header_offset + 64;
        self.checksum = compute_checksum(image, offset);
        patch_u32(image, offset, self.checksum);
    }
}

/// PE image checksum: 16-bit one's-complement style sum skipping the checksum field, plus the file length.
#[must_use]
pub fn compute_checksum(image: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u64 = 0;
    for (i, chunk) in image.chunks(2).enumerate() {
        let offset = i * 2;
        if offset == checksum_offset || offset == checksum_offset + 2 {
            continue;
        }
        let word = match *chunk {
            [lo, hi] => u16::from_le_bytes([lo, hi]),
            [lo] => u16::from(lo),
            _ => 0,
        };
        sum += u64::from(word);
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum = (sum & 0xFFFF) + (sum >> 16);
    (sum as u32).wrapping_add(image.len() as u32)
}

fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment).saturating_mul(alignment)
    }
}

fn patch_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn patch_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::ImageBuilder;

    #[test]
    fn test_parse_fixture_headers() {
        let image = ImageBuilder::new().build();
        let pe = PeImage::parse(&image).unwrap();
        assert!(!pe.is_pe32_plus);
        assert_eq!(pe.sections.len(), 1);
        assert_eq!(pe.sections[0].name(), ".text");
        assert_eq!(pe.clr_directory().unwrap().rva, 0x2000);
        assert_eq!(pe.rva_to_offset(0x2010).unwrap(), 0x210);
        assert_eq!(pe.rva_to_offset(0x40).unwrap(), 0x40);
    }

    #[test]
    fn test_unmapped_rva() {
        let image = ImageBuilder::new().build();
        let pe = PeImage::parse(&image).unwrap();
        assert!(matches!(pe.rva_to_offset(0x9000_0000), Err(Error::UnmappedRva(0x9000_0000))));
    }

    #[test]
    fn test_rejects_missing_signatures() {
        assert!(matches!(PeImage::parse(b"ZM"), Err(Error::InvalidDosHeader)));

        let mut image = ImageBuilder::new().build();
        image[0x80] = b'X';
        assert!(matches!(PeImage::parse(&image), Err(Error::InvalidPeSignature(0x80))));

        let mut image = ImageBuilder::new().build();
        image[0x98] = 0x07;
        assert!(matches!(
            PeImage::parse(&image),
            Err(Error::InvalidOptionalHeaderMagic(0x0107))
        ));
    }

    #[test]
    fn test_append_section_updates_headers() {
        let mut image = ImageBuilder::new().build();
        let mut pe = PeImage::parse(&image).unwrap();
        let expected_rva = pe.next_section_rva();
        let rva = pe.append_section(&mut image, &[0xAB; 0x30]).unwrap();
        assert_eq!(rva, expected_rva);

        let reparsed = PeImage::parse(&image).unwrap();
        assert_eq!(reparsed.sections.len(), 2);
        let section = &reparsed.sections[1];
        assert_eq!(section.name(), ".patch");
        assert_eq!(section.virtual_size, 0x30);
        assert_eq!(reparsed.size_of_image, pe.size_of_image);
        assert!(reparsed.size_of_image >= rva + 0x30);
        assert_eq!(image.len() % pe.file_alignment as usize, 0);
        let offset = reparsed.rva_to_offset(rva).unwrap();
        assert_eq!(&image[offset..offset + 0x30], &[0xAB; 0x30]);
    }

    #[test]
    fn test_no_section_header_space() {
        let mut image = ImageBuilder::new().tight_headers().build();
        let mut pe = PeImage::parse(&image).unwrap();
        let before = image.clone();
        assert!(matches!(
            pe.append_section(&mut image, &[0; 4]),
            Err(Error::NoSectionHeaderSpace(_))
        ));
        assert_eq!(image, before);
    }

    #[test]
    fn test_checksum_skips_its_own_field() {
        let mut image = vec![0u8; 16];
        image[0] = 0x01;
        let base = compute_checksum(&image, 8);
        image[8] = 0xFF;
        assert_eq!(compute_checksum(&image, 8), base);
        assert_eq!(base, 1 + 16);
    }
}
