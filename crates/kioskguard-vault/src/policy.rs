//! Admin password policy.
//!
//! A candidate is compliant when its length (in characters) lies within
//! `min_length..=max_length` and it contains at least one uppercase letter,
//! one lowercase letter, one digit and one symbol. A symbol is any character
//! that is neither a letter nor a digit, whitespace included.
//!
//! [`PasswordPolicy::check`] reports every rule a candidate breaks so the
//! presentation layer can explain the rejection; [`PasswordPolicy::is_compliant`]
//! is the boolean shorthand.

use serde::{Deserialize, Serialize};

/// Minimum admin password length in characters.
pub const MIN_LENGTH: usize = 9;

/// Maximum admin password length in characters.
pub const MAX_LENGTH: usize = 40;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A single policy rule a candidate password failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PolicyRule {
    /// Fewer characters than the policy minimum.
    TooShort { min: usize },
    /// More characters than the policy maximum.
    TooLong { max: usize },
    /// No uppercase letter.
    MissingUppercase,
    /// No lowercase letter.
    MissingLowercase,
    /// No digit.
    MissingDigit,
    /// No character that is neither letter nor digit.
    MissingSymbol,
}

impl std::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort { min } => write!(f, "shorter than {min} characters"),
            Self::TooLong { max } => write!(f, "longer than {max} characters"),
            Self::MissingUppercase => f.write_str("no uppercase letter"),
            Self::MissingLowercase => f.write_str("no lowercase letter"),
            Self::MissingDigit => f.write_str("no digit"),
            Self::MissingSymbol => f.write_str("no symbol"),
        }
    }
}

/// Length bounds and required character classes for admin passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: MIN_LENGTH,
            max_length: MAX_LENGTH,
        }
    }
}

#[derive(Default)]
struct CharClasses {
    upper: bool,
    lower: bool,
    digit: bool,
    symbol: bool,
}

impl CharClasses {
    fn scan(password: &str) -> Self {
        let mut classes = Self::default();
        for c in password.chars() {
            if c.is_uppercase() {
                classes.upper = true;
            } else if c.is_lowercase() {
                classes.lower = true;
            } else if c.is_ascii_digit() {
                classes.digit = true;
            } else if !c.is_alphabetic() {
                // Non-ASCII numerics such as `²` or `½` land here.
                classes.symbol = true;
            }
        }
        classes
    }
}

impl PasswordPolicy {
    /// Every rule `password` breaks, in a stable order: length first, then
    /// uppercase, lowercase, digit, symbol. Empty when compliant.
    pub fn check(&self, password: &str) -> Vec<PolicyRule> {
        let mut violations = Vec::new();

        let len = password.chars().count();
        if len < self.min_length {
            violations.push(PolicyRule::TooShort {
                min: self.min_length,
            });
        } else if len > self.max_length {
            violations.push(PolicyRule::TooLong {
                max: self.max_length,
            });
        }

        let classes = CharClasses::scan(password);
        if !classes.upper {
            violations.push(PolicyRule::MissingUppercase);
        }
        if !classes.lower {
            violations.push(PolicyRule::MissingLowercase);
        }
        if !classes.digit {
            violations.push(PolicyRule::MissingDigit);
        }
        if !classes.symbol {
            violations.push(PolicyRule::MissingSymbol);
        }

        violations
    }

    /// Whether `password` satisfies every rule. Pure and deterministic.
    pub fn is_compliant(&self, password: &str) -> bool {
        self.check(password).is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PasswordPolicy {
        PasswordPolicy::default()
    }

    #[test]
    fn defaults_are_compliant() {
        assert!(policy().is_compliant("KhsDefault@123"));
        assert!(policy().is_compliant("Secondary@456"));
        assert!(policy().is_compliant("NewPass@789"));
    }

    #[test]
    fn length_bounds() {
        // Exactly 9 and exactly 40 characters pass.
        assert!(policy().is_compliant("Abcdef1!x"));
        let forty = format!("Ab1!{}", "x".repeat(36));
        assert_eq!(forty.chars().count(), 40);
        assert!(policy().is_compliant(&forty));

        // 8 and 41 characters fail.
        assert_eq!(
            policy().check("Abcde1!x"),
            vec![PolicyRule::TooShort { min: 9 }]
        );
        let forty_one = format!("{forty}y");
        assert_eq!(
            policy().check(&forty_one),
            vec![PolicyRule::TooLong { max: 40 }]
        );
    }

    #[test]
    fn short_inputs_never_comply() {
        for len in 0..MIN_LENGTH {
            let candidate: String = "Aa1!Aa1!Aa1!".chars().take(len).collect();
            assert!(!policy().is_compliant(&candidate), "len {len}");
        }
    }

    #[test]
    fn long_inputs_never_comply() {
        for extra in 1..5 {
            let candidate = format!("Aa1!{}", "z".repeat(MAX_LENGTH - 4 + extra));
            assert!(!policy().is_compliant(&candidate));
        }
    }

    #[test]
    fn each_missing_class_is_reported() {
        assert_eq!(
            policy().check("khsdefault@123"),
            vec![PolicyRule::MissingUppercase]
        );
        assert_eq!(
            policy().check("KHSDEFAULT@123"),
            vec![PolicyRule::MissingLowercase]
        );
        assert_eq!(
            policy().check("KhsDefault@abc"),
            vec![PolicyRule::MissingDigit]
        );
        assert_eq!(
            policy().check("KhsDefault0123"),
            vec![PolicyRule::MissingSymbol]
        );
    }

    #[test]
    fn short_and_classless_reports_everything() {
        assert_eq!(
            policy().check("short"),
            vec![
                PolicyRule::TooShort { min: 9 },
                PolicyRule::MissingUppercase,
                PolicyRule::MissingDigit,
                PolicyRule::MissingSymbol,
            ]
        );
    }

    #[test]
    fn whitespace_and_non_ascii_count_as_symbols() {
        assert!(policy().is_compliant("Kiosk Mode 1"));
        assert!(policy().is_compliant("Grüße€Ab12"));
    }

    #[test]
    fn only_ascii_digits_count_as_digits() {
        assert_eq!(policy().check("Abcdefgh!²"), vec![PolicyRule::MissingDigit]);
        assert!(!policy().is_compliant("Abcdefgh!½"));
        assert!(!policy().is_compliant("Abcdefgh!Ⅻ"));
        assert!(!policy().is_compliant("Abcdefgh!٣"));
        assert!(policy().is_compliant("Abcdefgh!3"));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // 9 characters, 12 bytes.
        let candidate = "Äbcdéf1!ü";
        assert_eq!(candidate.chars().count(), 9);
        assert!(policy().is_compliant(candidate));
    }

    #[test]
    fn rules_serialize_with_tag() {
        let json = serde_json::to_string(&PolicyRule::TooShort { min: 9 }).unwrap();
        assert_eq!(json, r#"{"rule":"too_short","min":9}"#);
    }
}
