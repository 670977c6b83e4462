//! Metadata tokens.

use std::fmt;

use crate::tables::TableId;

/// Table id of user-string tokens (`ldstr` operands); not a real table.
pub const USER_STRING_TOKEN_TYPE: u8 = 0x70;

/// A 32-bit metadata token: table id in the high byte, 1-based row below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Build a token from a table and a 1-based row.
    #[must_use]
    pub fn new(table: TableId, row: u32) -> Self {
        Self((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// Raw table byte.
    #[must_use]
    pub fn table_byte(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Table this token points into, if it is a table token.
    #[must_use]
    pub fn table(self) -> Option<TableId> {
        TableId::from_u8(self.table_byte()).ok()
    }

    /// 1-based row (or heap offset for user-string tokens).
    #[must_use]
    pub fn row(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Whether this is a null token (row 0).
    #[must_use]
    pub fn is_null(self) -> bool {
        self.row() == 0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parts() {
        let token = Token::new(TableId::MethodDef, 5);
        assert_eq!(token.0, 0x0600_0005);
        assert_eq!(token.table(), Some(TableId::MethodDef));
        assert_eq!(token.row(), 5);
        assert_eq!(token.to_string(), "0x06000005");
    }

    #[test]
    fn test_user_string_token_has_no_table() {
        let token = Token(0x7000_0001);
        assert_eq!(token.table_byte(), USER_STRING_TOKEN_TYPE);
        assert_eq!(token.table(), None);
        assert!(!token.is_null());
    }
}
