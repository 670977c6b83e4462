//! Error types for clrpatch.

use thiserror::Error;

/// Result type alias for clrpatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input is not a valid or supported managed module. Nothing was written.
    Format,
    /// The patched module could not be encoded or stored.
    Write,
    /// The rule set is malformed or its rules collide.
    Rule,
}

/// Errors that can occur while parsing, patching or writing a module.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing `MZ` signature at the start of the image.
    #[error("invalid DOS header: expected 'MZ'")]
    InvalidDosHeader,

    /// Missing `PE\0\0` signature at `e_lfanew`.
    #[error("invalid PE signature at offset {0:#x}")]
    InvalidPeSignature(usize),

    /// Optional header magic is neither PE32 nor PE32+.
    #[error("invalid optional header magic 0x{0:04X}, expected 0x010B or 0x020B")]
    InvalidOptionalHeaderMagic(u16),

    /// The image has no CLR runtime header; it is not a managed module.
    #[error("the CLR runtime header was not found")]
    MissingCliHeader,

    /// An RVA does not fall inside any section of the image.
    #[error("RVA 0x{0:08X} is not mapped by any section")]
    UnmappedRva(u32),

    /// Invalid BSJB signature (expected 0x424A5342).
    #[error("invalid metadata signature: expected 0x424A5342, got 0x{0:08X}")]
    InvalidSignature(u32),

    /// Metadata root or tables stream version this crate does not understand.
    #[error("unsupported metadata version {major}.{minor}")]
    UnsupportedMetadataVersion {
        /// Major version found.
        major: u16,
        /// Minor version found.
        minor: u16,
    },

    /// Unexpected end of data while reading.
    #[error("unexpected end of data at offset {offset}, needed {needed} bytes")]
    UnexpectedEof {
        /// Offset where the read was attempted.
        offset: usize,
        /// Number of bytes needed.
        needed: usize,
    },

    /// Stream not found by name.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Invalid UTF-8 string in #Strings heap.
    #[error("invalid UTF-8 string at offset {0}")]
    InvalidString(usize),

    /// Invalid UTF-16 string in #US heap.
    #[error("invalid UTF-16 string at offset {0}")]
    InvalidUserString(usize),

    /// Invalid or unsupported table ID.
    #[error("invalid table ID: {0}")]
    InvalidTableId(u8),

    /// Invalid compressed integer encoding.
    #[error("invalid compressed integer at offset {0}")]
    InvalidCompressedInt(usize),

    /// Invalid blob data.
    #[error("invalid blob at offset {0}")]
    InvalidBlob(usize),

    /// Table row index out of bounds.
    #[error("table {table} row index {index} out of bounds (max {max})")]
    RowIndexOutOfBounds {
        /// Table name.
        table: &'static str,
        /// Requested index.
        index: u32,
        /// Maximum valid index.
        max: u32,
    },

    /// Method body header is neither tiny nor fat.
    #[error("invalid method header 0x{header:02X} at RVA 0x{rva:08X}")]
    InvalidMethodHeader {
        /// RVA of the body.
        rva: u32,
        /// First header byte.
        header: u8,
    },

    /// Unknown or reserved IL opcode.
    #[error("invalid opcode 0x{opcode:04X} at IL offset {offset}")]
    InvalidOpcode {
        /// IL offset inside the method body.
        offset: usize,
        /// Opcode value (0xFExx for two-byte opcodes).
        opcode: u16,
    },

    /// An instruction carries an operand its opcode cannot encode.
    #[error("cannot encode operand {operand} for opcode {opcode}")]
    UnencodableOperand {
        /// Opcode mnemonic.
        opcode: &'static str,
        /// Description of the offending operand.
        operand: String,
    },

    /// The #US heap has outgrown the 24-bit token range.
    #[error("user string heap is full (offset 0x{0:X} exceeds the token range)")]
    UserStringHeapFull(usize),

    /// No free space for one more section header.
    #[error("no room for an additional section header (headers end at 0x{0:X})")]
    NoSectionHeaderSpace(u32),

    /// Two rules matched the same method under [`crate::OverlapPolicy::Reject`].
    #[error("rules '{first}' and '{second}' both match {method}")]
    OverlappingRules {
        /// Full name of the method.
        method: String,
        /// Label of the earlier rule.
        first: String,
        /// Label of the later rule.
        second: String,
    },

    /// A textual rule could not be parsed.
    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule {
        /// The rule text.
        rule: String,
        /// What is wrong with it.
        reason: String,
    },

    /// I/O failure while reading or writing a module.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The temporary output file could not be moved over the destination.
    #[error("failed to replace destination: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnencodableOperand { .. }
            | Self::UserStringHeapFull(_)
            | Self::NoSectionHeaderSpace(_)
            | Self::Io(_)
            | Self::Persist(_) => ErrorKind::Write,
            Self::OverlappingRules { .. } | Self::InvalidRule { .. } => ErrorKind::Rule,
            _ => ErrorKind::Format,
        }
    }

    /// Whether the input was rejected as not a valid managed module.
    #[must_use]
    pub fn is_format_error(&self) -> bool {
        self.kind() == ErrorKind::Format
    }

    pub(crate) fn invalid_rule(rule: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}
