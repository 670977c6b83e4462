//! CIL instructions and their operand encoding.

use std::fmt;

use crate::error::{Error, Result};
use crate::heaps::UserStringsHeap;
use crate::il::opcode::{self, OpCode, OperandKind};
use crate::reader::Reader;
use crate::token::{Token, USER_STRING_TOKEN_TYPE};
use crate::writer::Writer;

/// An inline operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int8(i8),
    UInt8(u8),
    UInt16(u16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Token(Token),
    /// String literal, resolved from or interned into `#US`.
    String(String),
    /// Branch displacement relative to the next instruction.
    Branch(i32),
    /// Switch displacements relative to the end of the instruction.
    Switch(Vec<i32>),
}

/// A single CIL instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Operand,
}

impl Instruction {
    /// Create an instruction.
    #[must_use]
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Self { opcode, operand }
    }

    /// An instruction without an operand.
    #[must_use]
    pub fn simple(opcode: OpCode) -> Self {
        Self::new(opcode, Operand::None)
    }

    /// `ret`.
    #[must_use]
    pub fn ret() -> Self {
        Self::simple(opcode::RET)
    }

    /// `ldstr` with a literal.
    #[must_use]
    pub fn ldstr(value: impl Into<String>) -> Self {
        Self::new(opcode::LDSTR, Operand::String(value.into()))
    }

    /// Shortest `ldc.i4` form loading `value`.
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        match value {
            -1..=8 => {
                let opcode = OpCode::from_value((i32::from(opcode::LDC_I4_0.value) + value) as u16)
                    .unwrap_or(opcode::LDC_I4_M1);
                Self::simple(opcode)
            }
            v if i8::try_from(v).is_ok() => Self::new(opcode::LDC_I4_S, Operand::Int8(v as i8)),
            v => Self::new(opcode::LDC_I4, Operand::Int32(v)),
        }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        let operand = match (&self.operand, self.opcode.operand.size()) {
            (Operand::Switch(targets), None) => 4 + targets.len() * 4,
            (_, Some(size)) => size,
            (_, None) => 4,
        };
        self.opcode.size() + operand
    }

    /// Decode one instruction, resolving `ldstr` literals against `user_strings`.
    pub fn decode(reader: &mut Reader<'_>, user_strings: &UserStringsHeap) -> Result<Self> {
        let offset = reader.position();
        let first = reader.read_u8()?;
        let value = if first == 0xFE {
            0xFE00 | u16::from(reader.read_u8()?)
        } else {
            u16::from(first)
        };
        let opcode = OpCode::from_value(value).ok_or(Error::InvalidOpcode {
            offset,
            opcode: value,
        })?;

        let operand = match opcode.operand {
            OperandKind::None => Operand::None,
            OperandKind::Int8 => Operand::Int8(reader.read_i8()?),
            OperandKind::UInt8 => Operand::UInt8(reader.read_u8()?),
            OperandKind::UInt16 => Operand::UInt16(reader.read_u16()?),
            OperandKind::Int32 => Operand::Int32(reader.read_i32()?),
            OperandKind::Int64 => Operand::Int64(reader.read_i64()?),
            OperandKind::Float32 => Operand::Float32(reader.read_f32()?),
            OperandKind::Float64 => Operand::Float64(reader.read_f64()?),
            OperandKind::Token => Operand::Token(Token(reader.read_u32()?)),
            OperandKind::String => {
                let token = Token(reader.read_u32()?);
                if token.table_byte() != USER_STRING_TOKEN_TYPE {
                    return Err(Error::InvalidUserString(token.row() as usize));
                }
                Operand::String(user_strings.get(token.row())?)
            }
            OperandKind::ShortBranch => Operand::Branch(i32::from(reader.read_i8()?)),
            OperandKind::Branch => Operand::Branch(reader.read_i32()?),
            OperandKind::Switch => {
                let count = reader.read_u32()? as usize;
                // Each target is 4 bytes; reject counts the code cannot hold before allocating.
                if count > reader.remaining() / 4 {
                    return Err(Error::UnexpectedEof {
                        offset: reader.position(),
                        needed: count.saturating_mul(4),
                    });
                }
                let targets = (0..count)
                    .map(|_| reader.read_i32())
                    .collect::<Result<Vec<_>>>()?;
                Operand::Switch(targets)
            }
        };

        Ok(Self { opcode, operand })
    }

    /// Encode the instruction; `intern` maps a string literal to its `#US` token.
    pub fn encode(
        &self,
        writer: &mut Writer,
        intern: &mut dyn FnMut(&str) -> Result<Token>,
    ) -> Result<()> {
        if self.opcode.is_two_byte() {
            writer.write_u8(0xFE);
        }
        writer.write_u8(self.opcode.value as u8);

        match (self.opcode.operand, &self.operand) {
            (OperandKind::None, Operand::None) => {}
            (OperandKind::Int8, &Operand::Int8(v)) => writer.write_u8(v as u8),
            (OperandKind::UInt8, &Operand::UInt8(v)) => writer.write_u8(v),
            (OperandKind::UInt16, &Operand::UInt16(v)) => writer.write_u16(v),
            (OperandKind::Int32, &Operand::Int32(v)) => writer.write_i32(v),
            (OperandKind::Int64, &Operand::Int64(v)) => writer.write_i64(v),
            (OperandKind::Float32, &Operand::Float32(v)) => writer.write_f32(v),
            (OperandKind::Float64, &Operand::Float64(v)) => writer.write_f64(v),
            (OperandKind::Token, &Operand::Token(token)) => writer.write_u32(token.0),
            (OperandKind::String, Operand::String(s)) => writer.write_u32(intern(s)?.0),
            (OperandKind::ShortBranch, &Operand::Branch(v)) => {
                let v = i8::try_from(v).map_err(|_| self.unencodable())?;
                writer.write_u8(v as u8);
            }
            (OperandKind::Branch, &Operand::Branch(v)) => writer.write_i32(v),
            (OperandKind::Switch, Operand::Switch(targets)) => {
                writer.write_u32(targets.len() as u32);
                for &target in targets {
                    writer.write_i32(target);
                }
            }
            _ => return Err(self.unencodable()),
        }
        Ok(())
    }

    fn unencodable(&self) -> Error {
        Error::UnencodableOperand {
            opcode: self.opcode.name,
            operand: format!("{:?}", self.operand),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int8(v) => write!(f, " {v}"),
            Operand::UInt8(v) => write!(f, " {v}"),
            Operand::UInt16(v) => write!(f, " {v}"),
            Operand::Int32(v) => write!(f, " {v}"),
            Operand::Int64(v) => write!(f, " {v}"),
            Operand::Float32(v) => write!(f, " {v}"),
            Operand::Float64(v) => write!(f, " {v}"),
            Operand::Token(token) => write!(f, " {token}"),
            Operand::String(s) => write!(f, " {s:?}"),
            Operand::Branch(v) => write!(f, " {v:+}"),
            Operand::Switch(targets) => write!(f, " {targets:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_strings(_: &str) -> Result<Token> {
        Ok(Token(0x7000_0001))
    }

    fn encode(instruction: &Instruction) -> Result<Vec<u8>> {
        let mut writer = Writer::new();
        instruction.encode(&mut writer, &mut no_strings)?;
        Ok(writer.into_inner())
    }

    #[test]
    fn test_ldc_i4_picks_shortest_form() {
        assert_eq!(Instruction::ldc_i4(1).opcode.name, "ldc.i4.1");
        assert_eq!(Instruction::ldc_i4(0).opcode.name, "ldc.i4.0");
        assert_eq!(Instruction::ldc_i4(-1).opcode.name, "ldc.i4.m1");
        assert_eq!(Instruction::ldc_i4(8).opcode.name, "ldc.i4.8");
        assert_eq!(Instruction::ldc_i4(9).operand, Operand::Int8(9));
        assert_eq!(Instruction::ldc_i4(-128).operand, Operand::Int8(-128));
        assert_eq!(Instruction::ldc_i4(1000).operand, Operand::Int32(1000));
        assert_eq!(encode(&Instruction::ldc_i4(1000)).unwrap(), [0x20, 0xE8, 0x03, 0, 0]);
    }

    #[test]
    fn test_decode_resolves_ldstr() {
        let mut heap = UserStringsHeap::new();
        let offset = heap.add("Licensed");
        let mut writer = Writer::new();
        writer.write_u8(0x72);
        writer.write_u32(0x7000_0000 | offset);
        let code = writer.into_inner();

        let instruction = Instruction::decode(&mut Reader::new(&code), &heap).unwrap();
        assert_eq!(instruction, Instruction::ldstr("Licensed"));
        assert_eq!(instruction.size(), 5);
    }

    #[test]
    fn test_decode_two_byte_and_switch() {
        let heap = UserStringsHeap::new();
        let code = [0xFE, 0x0C, 0x02, 0x00, 0x45, 0x02, 0, 0, 0, 0x0A, 0, 0, 0, 0xF6, 0xFF, 0xFF, 0xFF];
        let mut reader = Reader::new(&code);
        let ldloc = Instruction::decode(&mut reader, &heap).unwrap();
        assert_eq!(ldloc.to_string(), "ldloc 2");
        let switch = Instruction::decode(&mut reader, &heap).unwrap();
        assert_eq!(switch.operand, Operand::Switch(vec![10, -10]));
        assert_eq!(switch.size(), 13);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_decode_rejects_reserved_opcode() {
        let heap = UserStringsHeap::new();
        let mut reader = Reader::new(&[0x00, 0xA6]);
        Instruction::decode(&mut reader, &heap).unwrap();
        assert!(matches!(
            Instruction::decode(&mut reader, &heap),
            Err(Error::InvalidOpcode { offset: 1, opcode: 0xA6 })
        ));
    }

    #[test]
    fn test_encode_rejects_mismatched_operand() {
        let bad = Instruction::new(opcode::LDC_I4, Operand::String("x".to_string()));
        assert!(matches!(encode(&bad), Err(Error::UnencodableOperand { opcode: "ldc.i4", .. })));

        let br_s = Instruction::new(OpCode::from_name("br.s").unwrap(), Operand::Branch(300));
        assert!(matches!(encode(&br_s), Err(Error::UnencodableOperand { .. })));
    }

    #[test]
    fn test_encode_ldstr_uses_interned_token() {
        assert_eq!(
            encode(&Instruction::ldstr("x")).unwrap(),
            [0x72, 0x01, 0x00, 0x00, 0x70]
        );
    }
}
