//! Method signature parsing.
//!
//! ECMA-335 II.23.2 defines the blob signature format. Only method signatures are
//! decoded; the patcher needs the parameter count and the class of the return type.

use crate::error::{Error, Result};
use crate::reader::Reader;

/// Element type codes (ECMA-335 II.23.1.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    Void = 0x01,
    Boolean = 0x02,
    Char = 0x03,
    I1 = 0x04,
    U1 = 0x05,
    I2 = 0x06,
    U2 = 0x07,
    I4 = 0x08,
    U4 = 0x09,
    I8 = 0x0A,
    U8 = 0x0B,
    R4 = 0x0C,
    R8 = 0x0D,
    String = 0x0E,
    TypedByRef = 0x16,
    IntPtr = 0x18,
    UIntPtr = 0x19,
    Object = 0x1C,
}

impl ElementType {
    /// Parse a primitive element type from its byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::Void,
            0x02 => Self::Boolean,
            0x03 => Self::Char,
            0x04 => Self::I1,
            0x05 => Self::U1,
            0x06 => Self::I2,
            0x07 => Self::U2,
            0x08 => Self::I4,
            0x09 => Self::U4,
            0x0A => Self::I8,
            0x0B => Self::U8,
            0x0C => Self::R4,
            0x0D => Self::R8,
            0x0E => Self::String,
            0x16 => Self::TypedByRef,
            0x18 => Self::IntPtr,
            0x19 => Self::UIntPtr,
            0x1C => Self::Object,
            _ => return None,
        })
    }
}

/// Calling convention flags (ECMA-335 II.23.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallingConvention(pub u8);

impl CallingConvention {
    pub const DEFAULT: u8 = 0x00;
    pub const VARARG: u8 = 0x05;
    pub const GENERIC: u8 = 0x10;
    pub const HAS_THIS: u8 = 0x20;
    pub const EXPLICIT_THIS: u8 = 0x40;

    /// Check if the method has an instance pointer (this).
    #[must_use]
    pub fn has_this(self) -> bool {
        (self.0 & Self::HAS_THIS) != 0
    }

    /// Check if this is a generic method.
    #[must_use]
    pub fn is_generic(self) -> bool {
        (self.0 & Self::GENERIC) != 0
    }
}

/// A parsed type from a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSig {
    /// Primitive type (void, bool, char, i1, u1, etc.).
    Primitive(ElementType),
    /// Class or interface reference (TypeDefOrRef coded index).
    Class(u32),
    /// Value type reference (TypeDefOrRef coded index).
    ValueType(u32),
    /// Single-dimensional zero-based array.
    SzArray(Box<TypeSig>),
    /// Multi-dimensional array; only the element type is kept.
    Array(Box<TypeSig>),
    /// Pointer to type.
    Ptr(Box<TypeSig>),
    /// By-reference parameter.
    ByRef(Box<TypeSig>),
    /// Generic type instantiation.
    GenericInst {
        is_value_type: bool,
        type_ref: u32,
        type_args: Vec<TypeSig>,
    },
    /// Generic type parameter (T).
    Var(u32),
    /// Generic method parameter (TMethod).
    MVar(u32),
    /// Function pointer.
    FnPtr(Box<MethodSig>),
    /// Modified type (modreq/modopt).
    Modified {
        required: bool,
        modifier: u32,
        inner: Box<TypeSig>,
    },
}

impl TypeSig {
    /// Parse a type from a signature blob.
    pub fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let start = reader.position();
        let elem = reader.read_u8()?;
        if let Some(primitive) = ElementType::from_u8(elem) {
            return Ok(Self::Primitive(primitive));
        }

        match elem {
            0x0F => Ok(Self::Ptr(Box::new(Self::parse(reader)?))),
            0x10 => Ok(Self::ByRef(Box::new(Self::parse(reader)?))),
            0x11 => Ok(Self::ValueType(reader.read_compressed_uint()?)),
            0x12 => Ok(Self::Class(reader.read_compressed_uint()?)),
            0x13 => Ok(Self::Var(reader.read_compressed_uint()?)),
            0x14 => {
                let element_type = Self::parse(reader)?;
                let _rank = reader.read_compressed_uint()?;
                let num_sizes = reader.read_compressed_uint()?;
                for _ in 0..num_sizes {
                    reader.read_compressed_uint()?;
                }
                let num_lo_bounds = reader.read_compressed_uint()?;
                for _ in 0..num_lo_bounds {
                    reader.read_compressed_int()?;
                }
                Ok(Self::Array(Box::new(element_type)))
            }
            0x15 => {
                let is_value_type = reader.read_u8()? == 0x11;
                let type_ref = reader.read_compressed_uint()?;
                let gen_arg_count = reader.read_compressed_uint()?;
                let type_args = (0..gen_arg_count)
                    .map(|_| Self::parse(reader))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::GenericInst {
                    is_value_type,
                    type_ref,
                    type_args,
                })
            }
            0x1B => Ok(Self::FnPtr(Box::new(MethodSig::parse(reader)?))),
            0x1D => Ok(Self::SzArray(Box::new(Self::parse(reader)?))),
            0x1E => Ok(Self::MVar(reader.read_compressed_uint()?)),
            0x1F | 0x20 => {
                let modifier = reader.read_compressed_uint()?;
                let inner = Self::parse(reader)?;
                Ok(Self::Modified {
                    required: elem == 0x1F,
                    modifier,
                    inner: Box::new(inner),
                })
            }
            _ => Err(Error::InvalidBlob(start)),
        }
    }

    /// Classify this type as a method return type.
    #[must_use]
    pub fn return_kind(&self) -> ReturnKind {
        match self {
            Self::Primitive(ElementType::Void) => ReturnKind::Void,
            Self::Primitive(ElementType::String) => ReturnKind::String,
            Self::Primitive(
                ElementType::Boolean
                | ElementType::Char
                | ElementType::I1
                | ElementType::U1
                | ElementType::I2
                | ElementType::U2
                | ElementType::I4
                | ElementType::U4,
            ) => ReturnKind::Integer,
            Self::Primitive(
                ElementType::I8 | ElementType::U8 | ElementType::IntPtr | ElementType::UIntPtr,
            ) => ReturnKind::WideInteger,
            Self::Modified { inner, .. } => inner.return_kind(),
            _ => ReturnKind::Other,
        }
    }
}

/// Broad class of a method's return type, as far as replacement bodies care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// `void`.
    Void,
    /// `bool`, `char` or an integer of at most 32 bits; `ldc.i4` returns it as is.
    Integer,
    /// `long`, `ulong`, `nint` or `nuint`; an `ldc.i4` result needs a widening conversion.
    WideInteger,
    /// `string`.
    String,
    /// Anything else (objects, floats, value types, generics).
    Other,
}

/// A parsed method signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    /// Calling convention flags.
    pub calling_convention: CallingConvention,
    /// Number of generic parameters (0 if not generic).
    pub generic_param_count: u32,
    /// Return type.
    pub return_type: TypeSig,
    /// Parameter types.
    pub params: Vec<TypeSig>,
    /// Sentinel index for vararg methods (None if not vararg).
    pub sentinel: Option<usize>,
}

impl MethodSig {
    /// Parse a method signature from a blob.
    pub fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let cc = reader.read_u8()?;
        let calling_convention = CallingConvention(cc);

        let generic_param_count = if calling_convention.is_generic() {
            reader.read_compressed_uint()?
        } else {
            0
        };

        let param_count = reader.read_compressed_uint()?;
        let return_type = TypeSig::parse(reader)?;

        // Every parameter takes at least one byte.
        let mut params = Vec::with_capacity((param_count as usize).min(reader.remaining()));
        let mut sentinel = None;

        for i in 0..param_count as usize {
            // Vararg boundary
            if reader.peek_u8()? == 0x41 {
                reader.read_u8()?;
                sentinel = Some(i);
            }
            params.push(TypeSig::parse(reader)?);
        }

        Ok(Self {
            calling_convention,
            generic_param_count,
            return_type,
            params,
            sentinel,
        })
    }

    /// Parse a method signature from raw bytes.
    pub fn parse_blob(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        Self::parse(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_bool_string() {
        // instance bool (string)
        let sig = MethodSig::parse_blob(&[0x20, 0x01, 0x02, 0x0E]).unwrap();
        assert!(sig.calling_convention.has_this());
        assert_eq!(sig.params, vec![TypeSig::Primitive(ElementType::String)]);
        assert_eq!(sig.return_type.return_kind(), ReturnKind::Integer);
    }

    #[test]
    fn test_generic_method_with_class_params() {
        // static !!0 <1> (class 0x05, int32[])
        let sig = MethodSig::parse_blob(&[0x10, 0x01, 0x02, 0x1E, 0x00, 0x12, 0x05, 0x1D, 0x08])
            .unwrap();
        assert_eq!(sig.generic_param_count, 1);
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.return_type.return_kind(), ReturnKind::Other);
    }

    #[test]
    fn test_modified_return_type() {
        // void modreq(IsVolatile) ... resolves to the inner type
        let sig = MethodSig::parse_blob(&[0x00, 0x00, 0x1F, 0x09, 0x01]).unwrap();
        assert_eq!(sig.return_type.return_kind(), ReturnKind::Void);
        let sig = MethodSig::parse_blob(&[0x00, 0x00, 0x0E]).unwrap();
        assert_eq!(sig.return_type.return_kind(), ReturnKind::String);
    }

    #[test]
    fn test_wide_integer_returns() {
        // static int64 (), uint64 (), native int (), native uint ()
        for element in [0x0A, 0x0B, 0x18, 0x19] {
            let sig = MethodSig::parse_blob(&[0x00, 0x00, element]).unwrap();
            assert_eq!(sig.return_type.return_kind(), ReturnKind::WideInteger);
        }
        // uint32 stays in the ldc.i4 class
        let sig = MethodSig::parse_blob(&[0x00, 0x00, 0x09]).unwrap();
        assert_eq!(sig.return_type.return_kind(), ReturnKind::Integer);
    }

    #[test]
    fn test_truncated_signature() {
        assert!(MethodSig::parse_blob(&[0x20, 0x02, 0x02, 0x0E]).is_err());
        assert!(matches!(
            MethodSig::parse_blob(&[0x00, 0x00, 0x17]),
            Err(Error::InvalidBlob(2))
        ));
    }
}
