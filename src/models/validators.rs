use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Regex for validating unquoted SQL identifiers.
/// Examples: "orders", "created_at", "_audit2024"
pub static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Maximum identifier length (PostgreSQL's NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Errors produced when parsing collection or field names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("identifier cannot be empty")]
    Empty,

    #[error("identifier '{0}' exceeds {MAX_IDENTIFIER_LENGTH} characters")]
    TooLong(String),

    #[error("identifier '{0}' must start with a letter or underscore and contain only letters, digits and underscores")]
    InvalidCharacters(String),

    #[error("collection name '{0}' must be 'table' or 'schema.table'")]
    InvalidQualifiedName(String),
}

/// A validated SQL identifier (table, column, schema or index name).
///
/// Identifiers are only ever spliced into statements through [`Identifier::quoted`];
/// values are always bound as parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if raw.len() > MAX_IDENTIFIER_LENGTH {
            return Err(IdentifierError::TooLong(raw.to_string()));
        }
        if !IDENTIFIER_REGEX.is_match(raw) {
            return Err(IdentifierError::InvalidCharacters(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for use in SQL text.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

/// A possibly schema-qualified relation name: `table` or `schema.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionRef {
    pub schema: Option<Identifier>,
    pub name: Identifier,
}

impl CollectionRef {
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let mut parts = raw.split('.');
        let first = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (None, _) => Ok(Self {
                schema: None,
                name: Identifier::parse(first)?,
            }),
            (Some(second), None) => Ok(Self {
                schema: Some(Identifier::parse(first)?),
                name: Identifier::parse(second)?,
            }),
            (Some(_), Some(_)) => Err(IdentifierError::InvalidQualifiedName(raw.to_string())),
        }
    }

    /// Quoted, schema-qualified form: `"schema"."table"` or `"table"`.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema.quoted(), self.name.quoted()),
            None => self.name.quoted(),
        }
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for CollectionRef {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("orders")]
    #[case("created_at")]
    #[case("_private")]
    #[case("Events2024")]
    fn test_valid_identifiers(#[case] raw: &str) {
        let ident = Identifier::parse(raw).unwrap();
        assert_eq!(ident.as_str(), raw);
        assert_eq!(ident.quoted(), format!("\"{raw}\""));
    }

    #[rstest]
    #[case("", IdentifierError::Empty)]
    #[case("1orders", IdentifierError::InvalidCharacters("1orders".into()))]
    #[case("orders; DROP TABLE x", IdentifierError::InvalidCharacters("orders; DROP TABLE x".into()))]
    #[case("or\"ders", IdentifierError::InvalidCharacters("or\"ders".into()))]
    #[case("order-items", IdentifierError::InvalidCharacters("order-items".into()))]
    fn test_invalid_identifiers(#[case] raw: &str, #[case] expected: IdentifierError) {
        assert_eq!(Identifier::parse(raw).unwrap_err(), expected);
    }

    #[test]
    fn test_identifier_too_long() {
        let raw = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        assert!(matches!(
            Identifier::parse(&raw),
            Err(IdentifierError::TooLong(_))
        ));
        assert!(Identifier::parse(&"a".repeat(MAX_IDENTIFIER_LENGTH)).is_ok());
    }

    #[test]
    fn test_collection_ref_unqualified() {
        let collection = CollectionRef::parse("orders").unwrap();
        assert!(collection.schema.is_none());
        assert_eq!(collection.quoted(), "\"orders\"");
        assert_eq!(collection.to_string(), "orders");
    }

    #[test]
    fn test_collection_ref_qualified() {
        let collection = CollectionRef::parse("sales.orders").unwrap();
        assert_eq!(collection.schema.as_ref().unwrap().as_str(), "sales");
        assert_eq!(collection.quoted(), "\"sales\".\"orders\"");
        assert_eq!(collection.to_string(), "sales.orders");
    }

    #[test]
    fn test_collection_ref_rejects_extra_parts() {
        assert!(matches!(
            CollectionRef::parse("db.sales.orders"),
            Err(IdentifierError::InvalidQualifiedName(_))
        ));
        assert!(CollectionRef::parse("sales.").is_err());
        assert!(CollectionRef::parse(".orders").is_err());
    }

    #[test]
    fn test_identifier_serde_validates() {
        let ok: Identifier = serde_json::from_str("\"created_at\"").unwrap();
        assert_eq!(ok.as_str(), "created_at");
        assert!(serde_json::from_str::<Identifier>("\"bad name\"").is_err());
    }
}
