use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

static LEGACY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}[0-9]{4}$").expect("valid plate regex"));
static MERCOSUL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}[0-9][A-Z][0-9]{2}$").expect("valid plate regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("plate is empty")]
    EmptyPlate,
    #[error("invalid plate format: {0} (expected AAA9999 or AAA9A99)")]
    InvalidPlate(String),
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlateFormat {
    Legacy,
    Mercosul,
}

/// A validated, normalized plate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plate {
    value: String,
    format: PlateFormat,
}

impl Plate {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value = normalize(raw);
        if value.is_empty() {
            return Err(ValidationError::EmptyPlate);
        }
        let format = if LEGACY.is_match(&value) {
            PlateFormat::Legacy
        } else if MERCOSUL.is_match(&value) {
            PlateFormat::Mercosul
        } else {
            return Err(ValidationError::InvalidPlate(raw.trim().to_string()));
        };
        Ok(Self { value, format })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn format(&self) -> PlateFormat {
        self.format
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Uppercase and drop whitespace and hyphens. Does not validate.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_formats() {
        let legacy = Plate::parse("abc-1234").unwrap();
        assert_eq!(legacy.as_str(), "ABC1234");
        assert_eq!(legacy.format(), PlateFormat::Legacy);

        let mercosul = Plate::parse(" bra 2e19 ").unwrap();
        assert_eq!(mercosul.as_str(), "BRA2E19");
        assert_eq!(mercosul.format(), PlateFormat::Mercosul);
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["abc-1234", "ABC1234", "bra2e19", "BRA-2E19", " xyz 9a87 "] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
            assert!(Plate::parse(&once).is_ok(), "{} should be valid", once);
        }
    }

    #[test]
    fn rejects_invalid_plates() {
        assert_eq!(Plate::parse("   "), Err(ValidationError::EmptyPlate));
        assert_eq!(Plate::parse("-"), Err(ValidationError::EmptyPlate));
        for raw in ["AB1234", "ABCD123", "1234ABC", "ABC12345", "ABC1A2B", "ÁBC1234", "AB_1234"] {
            assert!(
                matches!(Plate::parse(raw), Err(ValidationError::InvalidPlate(_))),
                "{} should be rejected",
                raw
            );
        }
    }
}
