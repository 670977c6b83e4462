//! CIL opcode table (ECMA-335 Partition III).

use std::fmt;

/// Inline operand carried by an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Int8,
    UInt8,
    UInt16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Metadata token.
    Token,
    /// `#US` token of a string literal.
    String,
    /// 1-byte signed displacement.
    ShortBranch,
    /// 4-byte signed displacement.
    Branch,
    /// Count followed by 4-byte displacements.
    Switch,
}

impl OperandKind {
    /// Encoded size of the operand, `None` for the variable-length switch table.
    #[must_use]
    pub const fn size(self) -> Option<usize> {
        match self {
            Self::None => Some(0),
            Self::Int8 | Self::UInt8 | Self::ShortBranch => Some(1),
            Self::UInt16 => Some(2),
            Self::Int32 | Self::Float32 | Self::Token | Self::String | Self::Branch => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::Switch => None,
        }
    }
}

/// A CIL opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCode {
    /// Opcode value; two-byte opcodes are `0xFExx`.
    pub value: u16,
    /// Mnemonic.
    pub name: &'static str,
    /// Inline operand.
    pub operand: OperandKind,
}

impl OpCode {
    const fn new(value: u16, name: &'static str, operand: OperandKind) -> Self {
        Self {
            value,
            name,
            operand,
        }
    }

    /// Look up an opcode by value.
    #[must_use]
    pub fn from_value(value: u16) -> Option<Self> {
        OPCODES
            .binary_search_by_key(&value, |op| op.value)
            .ok()
            .map(|i| OPCODES[i])
    }

    /// Look up an opcode by mnemonic.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        OPCODES.iter().find(|op| op.name == name).copied()
    }

    /// Whether the opcode is encoded with the `0xFE` prefix.
    #[must_use]
    pub const fn is_two_byte(self) -> bool {
        self.value > 0xFF
    }

    /// Encoded size of the opcode bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        if self.is_two_byte() { 2 } else { 1 }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub const NOP: OpCode = OpCode::new(0x00, "nop", OperandKind::None);
pub const LDNULL: OpCode = OpCode::new(0x14, "ldnull", OperandKind::None);
pub const LDC_I4_M1: OpCode = OpCode::new(0x15, "ldc.i4.m1", OperandKind::None);
pub const LDC_I4_0: OpCode = OpCode::new(0x16, "ldc.i4.0", OperandKind::None);
pub const LDC_I4_1: OpCode = OpCode::new(0x17, "ldc.i4.1", OperandKind::None);
pub const LDC_I4_S: OpCode = OpCode::new(0x1F, "ldc.i4.s", OperandKind::Int8);
pub const LDC_I4: OpCode = OpCode::new(0x20, "ldc.i4", OperandKind::Int32);
pub const RET: OpCode = OpCode::new(0x2A, "ret", OperandKind::None);
pub const LDSTR: OpCode = OpCode::new(0x72, "ldstr", OperandKind::String);

/// Every defined opcode, sorted by value.
static OPCODES: &[OpCode] = &[
    OpCode::new(0x00, "nop", OperandKind::None),
    OpCode::new(0x01, "break", OperandKind::None),
    OpCode::new(0x02, "ldarg.0", OperandKind::None),
    OpCode::new(0x03, "ldarg.1", OperandKind::None),
    OpCode::new(0x04, "ldarg.2", OperandKind::None),
    OpCode::new(0x05, "ldarg.3", OperandKind::None),
    OpCode::new(0x06, "ldloc.0", OperandKind::None),
    OpCode::new(0x07, "ldloc.1", OperandKind::None),
    OpCode::new(0x08, "ldloc.2", OperandKind::None),
    OpCode::new(0x09, "ldloc.3", OperandKind::None),
    OpCode::new(0x0A, "stloc.0", OperandKind::None),
    OpCode::new(0x0B, "stloc.1", OperandKind::None),
    OpCode::new(0x0C, "stloc.2", OperandKind::None),
    OpCode::new(0x0D, "stloc.3", OperandKind::None),
    OpCode::new(0x0E, "ldarg.s", OperandKind::UInt8),
    OpCode::new(0x0F, "ldarga.s", OperandKind::UInt8),
    OpCode::new(0x10, "starg.s", OperandKind::UInt8),
    OpCode::new(0x11, "ldloc.s", OperandKind::UInt8),
    OpCode::new(0x12, "ldloca.s", OperandKind::UInt8),
    OpCode::new(0x13, "stloc.s", OperandKind::UInt8),
    OpCode::new(0x14, "ldnull", OperandKind::None),
    OpCode::new(0x15, "ldc.i4.m1", OperandKind::None),
    OpCode::new(0x16, "ldc.i4.0", OperandKind::None),
    OpCode::new(0x17, "ldc.i4.1", OperandKind::None),
    OpCode::new(0x18, "ldc.i4.2", OperandKind::None),
    OpCode::new(0x19, "ldc.i4.3", OperandKind::None),
    OpCode::new(0x1A, "ldc.i4.4", OperandKind::None),
    OpCode::new(0x1B, "ldc.i4.5", OperandKind::None),
    OpCode::new(0x1C, "ldc.i4.6", OperandKind::None),
    OpCode::new(0x1D, "ldc.i4.7", OperandKind::None),
    OpCode::new(0x1E, "ldc.i4.8", OperandKind::None),
    OpCode::new(0x1F, "ldc.i4.s", OperandKind::Int8),
    OpCode::new(0x20, "ldc.i4", OperandKind::Int32),
    OpCode::new(0x21, "ldc.i8", OperandKind::Int64),
    OpCode::new(0x22, "ldc.r4", OperandKind::Float32),
    OpCode::new(0x23, "ldc.r8", OperandKind::Float64),
    OpCode::new(0x25, "dup", OperandKind::None),
    OpCode::new(0x26, "pop", OperandKind::None),
    OpCode::new(0x27, "jmp", OperandKind::Token),
    OpCode::new(0x28, "call", OperandKind::Token),
    OpCode::new(0x29, "calli", OperandKind::Token),
    OpCode::new(0x2A, "ret", OperandKind::None),
    OpCode::new(0x2B, "br.s", OperandKind::ShortBranch),
    OpCode::new(0x2C, "brfalse.s", OperandKind::ShortBranch),
    OpCode::new(0x2D, "brtrue.s", OperandKind::ShortBranch),
    OpCode::new(0x2E, "beq.s", OperandKind::ShortBranch),
    OpCode::new(0x2F, "bge.s", OperandKind::ShortBranch),
    OpCode::new(0x30, "bgt.s", OperandKind::ShortBranch),
    OpCode::new(0x31, "ble.s", OperandKind::ShortBranch),
    OpCode::new(0x32, "blt.s", OperandKind::ShortBranch),
    OpCode::new(0x33, "bne.un.s", OperandKind::ShortBranch),
    OpCode::new(0x34, "bge.un.s", OperandKind::ShortBranch),
    OpCode::new(0x35, "bgt.un.s", OperandKind::ShortBranch),
    OpCode::new(0x36, "ble.un.s", OperandKind::ShortBranch),
    OpCode::new(0x37, "blt.un.s", OperandKind::ShortBranch),
    OpCode::new(0x38, "br", OperandKind::Branch),
    OpCode::new(0x39, "brfalse", OperandKind::Branch),
    OpCode::new(0x3A, "brtrue", OperandKind::Branch),
    OpCode::new(0x3B, "beq", OperandKind::Branch),
    OpCode::new(0x3C, "bge", OperandKind::Branch),
    OpCode::new(0x3D, "bgt", OperandKind::Branch),
    OpCode::new(0x3E, "ble", OperandKind::Branch),
    OpCode::new(0x3F, "blt", OperandKind::Branch),
    OpCode::new(0x40, "bne.un", OperandKind::Branch),
    OpCode::new(0x41, "bge.un", OperandKind::Branch),
    OpCode::new(0x42, "bgt.un", OperandKind::Branch),
    OpCode::new(0x43, "ble.un", OperandKind::Branch),
    OpCode::new(0x44, "blt.un", OperandKind::Branch),
    OpCode::new(0x45, "switch", OperandKind::Switch),
    OpCode::new(0x46, "ldind.i1", OperandKind::None),
    OpCode::new(0x47, "ldind.u1", OperandKind::None),
    OpCode::new(0x48, "ldind.i2", OperandKind::None),
    OpCode::new(0x49, "ldind.u2", OperandKind::None),
    OpCode::new(0x4A, "ldind.i4", OperandKind::None),
    OpCode::new(0x4B, "ldind.u4", OperandKind::None),
    OpCode::new(0x4C, "ldind.i8", OperandKind::None),
    OpCode::new(0x4D, "ldind.i", OperandKind::None),
    OpCode::new(0x4E, "ldind.r4", OperandKind::None),
    OpCode::new(0x4F, "ldind.r8", OperandKind::None),
    OpCode::new(0x50, "ldind.ref", OperandKind::None),
    OpCode::new(0x51, "stind.ref", OperandKind::None),
    OpCode::new(0x52, "stind.i1", OperandKind::None),
    OpCode::new(0x53, "stind.i2", OperandKind::None),
    OpCode::new(0x54, "stind.i4", OperandKind::None),
    OpCode::new(0x55, "stind.i8", OperandKind::None),
    OpCode::new(0x56, "stind.r4", OperandKind::None),
    OpCode::new(0x57, "stind.r8", OperandKind::None),
    OpCode::new(0x58, "add", OperandKind::None),
    OpCode::new(0x59, "sub", OperandKind::None),
    OpCode::new(0x5A, "mul", OperandKind::None),
    OpCode::new(0x5B, "div", OperandKind::None),
    OpCode::new(0x5C, "div.un", OperandKind::None),
    OpCode::new(0x5D, "rem", OperandKind::None),
    OpCode::new(0x5E, "rem.un", OperandKind::None),
    OpCode::new(0x5F, "and", OperandKind::None),
    OpCode::new(0x60, "or", OperandKind::None),
    OpCode::new(0x61, "xor", OperandKind::None),
    OpCode::new(0x62, "shl", OperandKind::None),
    OpCode::new(0x63, "shr", OperandKind::None),
    OpCode::new(0x64, "shr.un", OperandKind::None),
    OpCode::new(0x65, "neg", OperandKind::None),
    OpCode::new(0x66, "not", OperandKind::None),
    OpCode::new(0x67, "conv.i1", OperandKind::None),
    OpCode::new(0x68, "conv.i2", OperandKind::None),
    OpCode::new(0x69, "conv.i4", OperandKind::None),
    OpCode::new(0x6A, "conv.i8", OperandKind::None),
    OpCode::new(0x6B, "conv.r4", OperandKind::None),
    OpCode::new(0x6C, "conv.r8", OperandKind::None),
    OpCode::new(0x6D, "conv.u4", OperandKind::None),
    OpCode::new(0x6E, "conv.u8", OperandKind::None),
    OpCode::new(0x6F, "callvirt", OperandKind::Token),
    OpCode::new(0x70, "cpobj", OperandKind::Token),
    OpCode::new(0x71, "ldobj", OperandKind::Token),
    OpCode::new(0x72, "ldstr", OperandKind::String),
    OpCode::new(0x73, "newobj", OperandKind::Token),
    OpCode::new(0x74, "castclass", OperandKind::Token),
    OpCode::new(0x75, "isinst", OperandKind::Token),
    OpCode::new(0x76, "conv.r.un", OperandKind::None),
    OpCode::new(0x79, "unbox", OperandKind::Token),
    OpCode::new(0x7A, "throw", OperandKind::None),
    OpCode::new(0x7B, "ldfld", OperandKind::Token),
    OpCode::new(0x7C, "ldflda", OperandKind::Token),
    OpCode::new(0x7D, "stfld", OperandKind::Token),
    OpCode::new(0x7E, "ldsfld", OperandKind::Token),
    OpCode::new(0x7F, "ldsflda", OperandKind::Token),
    OpCode::new(0x80, "stsfld", OperandKind::Token),
    OpCode::new(0x81, "stobj", OperandKind::Token),
    OpCode::new(0x82, "conv.ovf.i1.un", OperandKind::None),
    OpCode::new(0x83, "conv.ovf.i2.un", OperandKind::None),
    OpCode::new(0x84, "conv.ovf.i4.un", OperandKind::None),
    OpCode::new(0x85, "conv.ovf.i8.un", OperandKind::None),
    OpCode::new(0x86, "conv.ovf.u1.un", OperandKind::None),
    OpCode::new(0x87, "conv.ovf.u2.un", OperandKind::None),
    OpCode::new(0x88, "conv.ovf.u4.un", OperandKind::None),
    OpCode::new(0x89, "conv.ovf.u8.un", OperandKind::None),
    OpCode::new(0x8A, "conv.ovf.i.un", OperandKind::None),
    OpCode::new(0x8B, "conv.ovf.u.un", OperandKind::None),
    OpCode::new(0x8C, "box", OperandKind::Token),
    OpCode::new(0x8D, "newarr", OperandKind::Token),
    OpCode::new(0x8E, "ldlen", OperandKind::None),
    OpCode::new(0x8F, "ldelema", OperandKind::Token),
    OpCode::new(0x90, "ldelem.i1", OperandKind::None),
    OpCode::new(0x91, "ldelem.u1", OperandKind::None),
    OpCode::new(0x92, "ldelem.i2", OperandKind::None),
    OpCode::new(0x93, "ldelem.u2", OperandKind::None),
    OpCode::new(0x94, "ldelem.i4", OperandKind::None),
    OpCode::new(0x95, "ldelem.u4", OperandKind::None),
    OpCode::new(0x96, "ldelem.i8", OperandKind::None),
    OpCode::new(0x97, "ldelem.i", OperandKind::None),
    OpCode::new(0x98, "ldelem.r4", OperandKind::None),
    OpCode::new(0x99, "ldelem.r8", OperandKind::None),
    OpCode::new(0x9A, "ldelem.ref", OperandKind::None),
    OpCode::new(0x9B, "stelem.i", OperandKind::None),
    OpCode::new(0x9C, "stelem.i1", OperandKind::None),
    OpCode::new(0x9D, "stelem.i2", OperandKind::None),
    OpCode::new(0x9E, "stelem.i4", OperandKind::None),
    OpCode::new(0x9F, "stelem.i8", OperandKind::None),
    OpCode::new(0xA0, "stelem.r4", OperandKind::None),
    OpCode::new(0xA1, "stelem.r8", OperandKind::None),
    OpCode::new(0xA2, "stelem.ref", OperandKind::None),
    OpCode::new(0xA3, "ldelem", OperandKind::Token),
    OpCode::new(0xA4, "stelem", OperandKind::Token),
    OpCode::new(0xA5, "unbox.any", OperandKind::Token),
    OpCode::new(0xB3, "conv.ovf.i1", OperandKind::None),
    OpCode::new(0xB4, "conv.ovf.u1", OperandKind::None),
    OpCode::new(0xB5, "conv.ovf.i2", OperandKind::None),
    OpCode::new(0xB6, "conv.ovf.u2", OperandKind::None),
    OpCode::new(0xB7, "conv.ovf.i4", OperandKind::None),
    OpCode::new(0xB8, "conv.ovf.u4", OperandKind::None),
    OpCode::new(0xB9, "conv.ovf.i8", OperandKind::None),
    OpCode::new(0xBA, "conv.ovf.u8", OperandKind::None),
    OpCode::new(0xC2, "refanyval", OperandKind::Token),
    OpCode::new(0xC3, "ckfinite", OperandKind::None),
    OpCode::new(0xC6, "mkrefany", OperandKind::Token),
    OpCode::new(0xD0, "ldtoken", OperandKind::Token),
    OpCode::new(0xD1, "conv.u2", OperandKind::None),
    OpCode::new(0xD2, "conv.u1", OperandKind::None),
    OpCode::new(0xD3, "conv.i", OperandKind::None),
    OpCode::new(0xD4, "conv.ovf.i", OperandKind::None),
    OpCode::new(0xD5, "conv.ovf.u", OperandKind::None),
    OpCode::new(0xD6, "add.ovf", OperandKind::None),
    OpCode::new(0xD7, "add.ovf.un", OperandKind::None),
    OpCode::new(0xD8, "mul.ovf", OperandKind::None),
    OpCode::new(0xD9, "mul.ovf.un", OperandKind::None),
    OpCode::new(0xDA, "sub.ovf", OperandKind::None),
    OpCode::new(0xDB, "sub.ovf.un", OperandKind::None),
    OpCode::new(0xDC, "endfinally", OperandKind::None),
    OpCode::new(0xDD, "leave", OperandKind::Branch),
    OpCode::new(0xDE, "leave.s", OperandKind::ShortBranch),
    OpCode::new(0xDF, "stind.i", OperandKind::None),
    OpCode::new(0xE0, "conv.u", OperandKind::None),
    OpCode::new(0xFE00, "arglist", OperandKind::None),
    OpCode::new(0xFE01, "ceq", OperandKind::None),
    OpCode::new(0xFE02, "cgt", OperandKind::None),
    OpCode::new(0xFE03, "cgt.un", OperandKind::None),
    OpCode::new(0xFE04, "clt", OperandKind::None),
    OpCode::new(0xFE05, "clt.un", OperandKind::None),
    OpCode::new(0xFE06, "ldftn", OperandKind::Token),
    OpCode::new(0xFE07, "ldvirtftn", OperandKind::Token),
    OpCode::new(0xFE09, "ldarg", OperandKind::UInt16),
    OpCode::new(0xFE0A, "ldarga", OperandKind::UInt16),
    OpCode::new(0xFE0B, "starg", OperandKind::UInt16),
    OpCode::new(0xFE0C, "ldloc", OperandKind::UInt16),
    OpCode::new(0xFE0D, "ldloca", OperandKind::UInt16),
    OpCode::new(0xFE0E, "stloc", OperandKind::UInt16),
    OpCode::new(0xFE0F, "localloc", OperandKind::None),
    OpCode::new(0xFE11, "endfilter", OperandKind::None),
    OpCode::new(0xFE12, "unaligned.", OperandKind::UInt8),
    OpCode::new(0xFE13, "volatile.", OperandKind::None),
    OpCode::new(0xFE14, "tail.", OperandKind::None),
    OpCode::new(0xFE15, "initobj", OperandKind::Token),
    OpCode::new(0xFE16, "constrained.", OperandKind::Token),
    OpCode::new(0xFE17, "cpblk", OperandKind::None),
    OpCode::new(0xFE18, "initblk", OperandKind::None),
    OpCode::new(0xFE19, "no.", OperandKind::UInt8),
    OpCode::new(0xFE1A, "rethrow", OperandKind::None),
    OpCode::new(0xFE1C, "sizeof", OperandKind::Token),
    OpCode::new(0xFE1D, "refanytype", OperandKind::None),
    OpCode::new(0xFE1E, "readonly.", OperandKind::None),
];
