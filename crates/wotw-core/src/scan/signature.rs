use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A compiled byte pattern; `None` tokens match any byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature {
    tokens: Vec<Option<u8>>,
    /// Index of the first literal token, used to anchor the scan
    anchor: Option<usize>,
}

impl Signature {
    /// Compile a hex pattern such as `"48 8B 05 ?? ?? ?? ??"`.
    ///
    /// Whitespace is ignored; the rest must be pairs of hex digits or `??`.
    pub fn parse(pattern: &str) -> Result<Self> {
        let compact: Vec<u8> = pattern
            .bytes()
            .filter(|byte| !byte.is_ascii_whitespace())
            .collect();

        let malformed = |reason: String| Error::MalformedSignature {
            pattern: pattern.to_string(),
            reason,
        };

        if compact.is_empty() {
            return Err(malformed("pattern is empty".to_string()));
        }
        if compact.len() % 2 != 0 {
            return Err(malformed(format!("odd number of digits ({})", compact.len())));
        }

        let tokens = compact
            .chunks_exact(2)
            .enumerate()
            .map(|(index, pair)| {
                if pair == b"??" {
                    return Ok(None);
                }
                match (hex_value(pair[0]), hex_value(pair[1])) {
                    (Some(high), Some(low)) => Ok(Some(high << 4 | low)),
                    _ => Err(malformed(format!(
                        "invalid token '{}' at position {}",
                        String::from_utf8_lossy(pair),
                        index
                    ))),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_tokens(tokens))
    }

    fn from_tokens(tokens: Vec<Option<u8>>) -> Self {
        let anchor = tokens.iter().position(Option::is_some);
        Self { tokens, anchor }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Option<u8>] {
        &self.tokens
    }

    /// True when every literal token equals the byte at the same position.
    pub fn matches_at(&self, buffer: &[u8], offset: usize) -> bool {
        let Some(window) = offset
            .checked_add(self.tokens.len())
            .and_then(|end| buffer.get(offset..end))
        else {
            return false;
        };

        self.tokens
            .iter()
            .zip(window)
            .all(|(token, byte)| token.is_none_or(|value| value == *byte))
    }

    /// Offset of the first match in `buffer`
    pub fn find_first(&self, buffer: &[u8]) -> Option<usize> {
        let last_start = buffer.len().checked_sub(self.tokens.len())?;

        let Some(anchor) = self.anchor else {
            // all wildcards
            return Some(0);
        };
        let anchor_byte = self.tokens[anchor]?;

        let mut start = 0;
        while start <= last_start {
            let haystack = &buffer[start + anchor..=last_start + anchor];
            let found = memchr::memchr(anchor_byte, haystack)?;
            let candidate = start + found;
            if self.matches_at(buffer, candidate) {
                return Some(candidate);
            }
            start = candidate + 1;
        }
        None
    }
}

fn hex_value(digit: u8) -> Option<u8> {
    (digit as char).to_digit(16).map(|value| value as u8)
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, token) in self.tokens.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            match token {
                Some(value) => write!(f, "{:02X}", value)?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(pattern: &str) -> Result<Self> {
        Self::parse(pattern)
    }
}

impl TryFrom<String> for Signature {
    type Error = Error;

    fn try_from(pattern: String) -> Result<Self> {
        Self::parse(&pattern)
    }
}

impl From<Signature> for String {
    fn from(signature: Signature) -> Self {
        signature.to_string()
    }
}
