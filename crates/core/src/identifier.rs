//! Normalized national ID printed on each payslip page.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::account::Credential;
use crate::error::{DomainError, DomainResult};

/// Number of digits in a normalized identifier.
pub const IDENTIFIER_DIGITS: usize = 11;

/// Number of leading digits used as the initial account credential.
pub const INITIAL_CREDENTIAL_DIGITS: usize = 6;

/// An 11-digit national ID.
///
/// Construction strips every non-digit character from the raw input, so the
/// masked form `123.456.789-09` and the bare form `12345678909` normalize to
/// the same value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Normalize and validate a raw identifier string.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != IDENTIFIER_DIGITS {
            return Err(DomainError::invalid_id(format!(
                "expected {IDENTIFIER_DIGITS} digits, found {}",
                digits.len()
            )));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Credential assigned to an account created for this identifier.
    pub fn initial_credential(&self) -> Credential {
        Credential::new(&self.0[..INITIAL_CREDENTIAL_DIGITS])
    }

    /// Log-safe rendering, e.g. `123.***.***-09`.
    pub fn masked(&self) -> String {
        format!("{}.***.***-{}", &self.0[..3], &self.0[9..])
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identifier").field(&self.masked()).finish()
    }
}

impl FromStr for Identifier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn masked_form_normalizes_to_digits() {
        let id = Identifier::parse("123.456.789-09").unwrap();
        assert_eq!(id.as_str(), "12345678909");
    }

    #[test]
    fn masked_and_bare_forms_are_equal() {
        assert_eq!(
            Identifier::parse("123.456.789-09").unwrap(),
            Identifier::parse("12345678909").unwrap()
        );
    }

    #[test]
    fn wrong_digit_count_is_rejected() {
        assert!(Identifier::parse("123.456.789-0").is_err());
        assert!(Identifier::parse("123.456.789-091").is_err());
        assert!(Identifier::parse("").is_err());
    }

    #[test]
    fn initial_credential_is_first_six_digits() {
        let id = Identifier::parse("987.654.321-00").unwrap();
        assert_eq!(id.initial_credential().expose(), "987654");
    }

    #[test]
    fn debug_output_is_masked() {
        let id = Identifier::parse("12345678909").unwrap();
        let rendered = format!("{id:?}");
        assert!(rendered.contains("123.***.***-09"));
        assert!(!rendered.contains("12345678909"));
    }

    #[test]
    fn deserialization_validates() {
        let ok: Identifier = serde_json::from_str("\"123.456.789-09\"").unwrap();
        assert_eq!(ok.as_str(), "12345678909");
        assert!(serde_json::from_str::<Identifier>("\"42\"").is_err());
    }

    proptest! {
        /// Any string whose digit content is not exactly eleven digits is rejected.
        #[test]
        fn rejects_any_other_digit_count(raw in "[0-9.\\- a-z]{0,30}") {
            let digits = raw.chars().filter(|c| c.is_ascii_digit()).count();
            let parsed = Identifier::parse(&raw);
            prop_assert_eq!(parsed.is_ok(), digits == IDENTIFIER_DIGITS);
        }

        /// Punctuation never changes the normalized value.
        #[test]
        fn punctuation_is_ignored(a in "[0-9]{3}", b in "[0-9]{3}", c in "[0-9]{3}", d in "[0-9]{2}") {
            let masked = Identifier::parse(&format!("{a}.{b}.{c}-{d}")).unwrap();
            let bare = Identifier::parse(&format!("{a}{b}{c}{d}")).unwrap();
            prop_assert_eq!(masked, bare);
        }
    }
}
