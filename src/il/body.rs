//! Method bodies: tiny/fat headers, IL code and extra data sections (ECMA-335 II.25.4).

use crate::error::{Error, Result};
use crate::heaps::UserStringsHeap;
use crate::il::instruction::Instruction;
use crate::reader::Reader;
use crate::token::Token;
use crate::writer::Writer;

const TINY_FORMAT: u8 = 0x02;
const FAT_FORMAT: u8 = 0x03;
const MORE_SECTS: u16 = 0x08;
const INIT_LOCALS: u16 = 0x10;
/// Fat header size in dwords, stored in the top nibble of the flags word.
const FAT_HEADER_DWORDS: u16 = 3;
const FAT_HEADER_SIZE: usize = 12;

const SECTION_FAT_FORMAT: u8 = 0x40;
const SECTION_MORE_SECTS: u8 = 0x80;

/// Largest code size a tiny header can describe.
const TINY_MAX_CODE_SIZE: usize = 63;
/// Max stack implied by a tiny header.
const TINY_MAX_STACK: u16 = 8;

/// A decoded method body.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Maximum evaluation stack depth.
    pub max_stack: u16,
    /// Zero-initialize locals on entry.
    pub init_locals: bool,
    /// StandAloneSig token of the locals signature, null when there are no locals.
    pub local_var_sig: Token,
    /// The instruction stream.
    pub instructions: Vec<Instruction>,
    /// Extra data sections (exception clauses) exactly as stored, starting 4-byte aligned.
    pub extra_sections: Vec<u8>,
    /// Whether the body was read with a fat header.
    pub is_fat: bool,
}

impl MethodBody {
    /// A body with the given instructions and nothing else.
    #[must_use]
    pub fn with_instructions(instructions: Vec<Instruction>) -> Self {
        Self {
            max_stack: TINY_MAX_STACK,
            init_locals: false,
            local_var_sig: Token(0),
            instructions,
            extra_sections: Vec::new(),
            is_fat: false,
        }
    }

    /// Decode the body at the start of `data`; returns the body and its encoded size.
    ///
    /// `rva` is only used for error reporting.
    pub fn parse(data: &[u8], rva: u32, user_strings: &UserStringsHeap) -> Result<(Self, usize)> {
        let mut reader = Reader::new(data);
        let header = reader.read_u8()?;

        let (max_stack, init_locals, local_var_sig, code_size, more_sects, is_fat) =
            match header & 0x03 {
                TINY_FORMAT => (TINY_MAX_STACK, false, Token(0), usize::from(header >> 2), false, false),
                FAT_FORMAT => {
                    let flags = u16::from(header) | (u16::from(reader.read_u8()?) << 8);
                    if flags >> 12 != FAT_HEADER_DWORDS {
                        return Err(Error::InvalidMethodHeader { rva, header });
                    }
                    let max_stack = reader.read_u16()?;
                    let code_size = reader.read_u32()? as usize;
                    let local_var_sig = Token(reader.read_u32()?);
                    (
                        max_stack,
                        flags & INIT_LOCALS != 0,
                        local_var_sig,
                        code_size,
                        flags & MORE_SECTS != 0,
                        true,
                    )
                }
                _ => return Err(Error::InvalidMethodHeader { rva, header }),
            };

        let code_start = reader.position();
        let code = reader.read_bytes(code_size)?;
        let mut code_reader = Reader::new(code);
        let mut instructions = Vec::new();
        while !code_reader.is_empty() {
            instructions.push(Instruction::decode(&mut code_reader, user_strings)?);
        }

        let mut end = code_start + code_size;
        let mut extra_sections = Vec::new();
        if more_sects {
            let sections_start = end.next_multiple_of(4);
            let mut cursor = sections_start;
            loop {
                let mut section = Reader::at(data, cursor)?;
                let kind = section.read_u8()?;
                let size = if kind & SECTION_FAT_FORMAT != 0 {
                    let bytes = section.read_bytes(3)?;
                    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) as usize
                } else {
                    usize::from(section.read_u8()?)
                };
                if size < 4 {
                    return Err(Error::InvalidMethodHeader { rva, header: kind });
                }
                // Bounds check; the clauses themselves are kept raw.
                Reader::at(data, cursor)?.skip(size)?;
                cursor += size;
                if kind & SECTION_MORE_SECTS == 0 {
                    break;
                }
                cursor = cursor.next_multiple_of(4);
            }
            extra_sections = data[sections_start..cursor].to_vec();
            end = cursor;
        }

        let body = Self {
            max_stack,
            init_locals,
            local_var_sig,
            instructions,
            extra_sections,
            is_fat,
        };
        Ok((body, end))
    }

    /// Whether the body needs a fat header.
    #[must_use]
    pub fn needs_fat_header(&self, code_size: usize) -> bool {
        code_size > TINY_MAX_CODE_SIZE
            || self.max_stack > TINY_MAX_STACK
            || self.init_locals
            || !self.local_var_sig.is_null()
            || !self.extra_sections.is_empty()
    }

    /// Encode header, code and extra sections. A fat body must be placed 4-byte aligned.
    pub fn encode(&self, intern: &mut dyn FnMut(&str) -> Result<Token>) -> Result<Vec<u8>> {
        let mut code = Writer::new();
        for instruction in &self.instructions {
            instruction.encode(&mut code, intern)?;
        }
        let code = code.into_inner();

        let mut writer = Writer::with_capacity(FAT_HEADER_SIZE + code.len() + self.extra_sections.len());
        if !self.needs_fat_header(code.len()) {
            writer.write_u8(((code.len() as u8) << 2) | TINY_FORMAT);
            writer.write_bytes(&code);
            return Ok(writer.into_inner());
        }

        let mut flags = (FAT_HEADER_DWORDS << 12) | u16::from(FAT_FORMAT);
        if self.init_locals {
            flags |= INIT_LOCALS;
        }
        if !self.extra_sections.is_empty() {
            flags |= MORE_SECTS;
        }
        writer.write_u16(flags);
        writer.write_u16(self.max_stack);
        writer.write_u32(code.len() as u32);
        writer.write_u32(self.local_var_sig.0);
        writer.write_bytes(&code);
        if !self.extra_sections.is_empty() {
            writer.align(4);
            writer.write_bytes(&self.extra_sections);
        }
        Ok(writer.into_inner())
    }
}

/// Whether the body header at the start of `data` is fat.
#[must_use]
pub fn is_fat_header(data: &[u8]) -> bool {
    data.first().is_some_and(|&b| b & 0x03 == FAT_FORMAT)
}
