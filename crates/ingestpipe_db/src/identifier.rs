//! Identifier-safety guard.
//!
//! Grounded on the read-only query validator in the teacher's
//! `sql_guard` module, but generalized for a different job: our client
//! issues DDL/DML against a warehouse, so the guard's job isn't "read-only",
//! it's "no table/column name ever reaches a query through string
//! concatenation". Every identifier is wrapped in an [`Identifier`] before
//! it can be bound into a statement via the warehouse's `IDENTIFIER(?)`
//! construct.

use crate::error::DbError;

/// A validated SQL identifier (table or column name), safe to bind as a
/// parameter to `IDENTIFIER(?)`. Never interpolated into SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(raw: impl Into<String>) -> Result<Self, DbError> {
        let raw = raw.into();
        if is_valid_identifier(&raw) {
            Ok(Self(raw))
        } else {
            Err(DbError::InvalidIdentifier(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unquoted identifiers: ASCII letters/digits/underscore, not starting with
/// a digit, non-empty, no whitespace or quote characters that could break
/// out of `IDENTIFIER(?)` binding.
fn is_valid_identifier(raw: &str) -> bool {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_identifiers() {
        assert!(Identifier::new("orders").is_ok());
        assert!(Identifier::new("_hidden_table").is_ok());
        assert!(Identifier::new("column_1").is_ok());
    }

    #[test]
    fn rejects_identifiers_that_could_break_out_of_binding() {
        assert!(Identifier::new("orders; DROP TABLE x").is_err());
        assert!(Identifier::new("orders\" OR 1=1").is_err());
        assert!(Identifier::new("1orders").is_err());
        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("order s").is_err());
    }
}
