//! Human-typed session codes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::MAX_CODE_LEN;

/// A normalized session code.
///
/// Codes are trimmed and uppercased on construction so that `blue-fox-42`
/// typed by hand matches `BLUE-FOX-42` generated on the other side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Normalizes and validates a raw code.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ProtocolError> {
        let normalized = raw.as_ref().trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(ProtocolError::InvalidCode("empty".into()));
        }
        if normalized.len() > MAX_CODE_LEN {
            return Err(ProtocolError::InvalidCode(format!(
                "too long ({} > {MAX_CODE_LEN})",
                normalized.len()
            )));
        }
        if let Some(c) = normalized
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        {
            return Err(ProtocolError::InvalidCode(format!(
                "unexpected character {c:?}"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionCode {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        let code = SessionCode::new("  blue-Fox-42 ").unwrap();
        assert_eq!(code.as_str(), "BLUE-FOX-42");
        assert_eq!(code, SessionCode::new("BLUE-FOX-42").unwrap());
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            SessionCode::new("   "),
            Err(ProtocolError::InvalidCode(_))
        ));
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(SessionCode::new("blue fox").is_err());
        assert!(SessionCode::new("room/1").is_err());
    }

    #[test]
    fn rejects_overlong() {
        assert!(SessionCode::new("A".repeat(MAX_CODE_LEN)).is_ok());
        assert!(SessionCode::new("A".repeat(MAX_CODE_LEN + 1)).is_err());
    }

    #[test]
    fn deserialization_normalizes() {
        let code: SessionCode = serde_json::from_str("\"red-cat-7\"").unwrap();
        assert_eq!(code.to_string(), "RED-CAT-7");
        assert!(serde_json::from_str::<SessionCode>("\"\"").is_err());
    }
}
