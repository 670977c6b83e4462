//! Common Intermediate Language: opcodes, instructions and method bodies.

mod body;
mod instruction;
pub mod opcode;

pub use body::{MethodBody, is_fat_header};
pub use instruction::{Instruction, Operand};
pub use opcode::{OpCode, OperandKind};
