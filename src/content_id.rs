//! Validated 36-character content identity.
//!
//! Layout: `UP0001-PCSE00001_00-0000000000000000`
//!   - service id: two letters, four digits
//!   - title id:   four letters, five digits
//!   - two-digit   separator block
//!   - label:      sixteen `[A-Z0-9_]` characters
//!
//! A [`ContentId`] can only be obtained through [`ContentId::parse`] (or its
//! `FromStr`/`TryFrom` equivalents), so holding one means it was validated.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed byte length of a content id field inside PKG headers and RIF records.
pub const CONTENT_ID_LEN: usize = 0x24;

fn grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        Regex::new(r"^[A-Z]{2}[0-9]{4}-[A-Z]{4}[0-9]{5}_[0-9]{2}-[A-Z0-9_]{16}$")
            .expect("content id grammar compiles")
    })
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentIdError {
    #[error("content id is not valid ASCII")]
    NotAscii,
    #[error("'{0}' does not match the content id grammar")]
    Grammar(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    pub fn parse(s: &str) -> Result<Self, ContentIdError> {
        if grammar().is_match(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(ContentIdError::Grammar(s.to_owned()))
        }
    }

    /// Validate a raw fixed-width field as found in PKG headers and RIFs.
    pub fn from_field(bytes: &[u8]) -> Result<Self, ContentIdError> {
        let s = std::str::from_utf8(bytes).map_err(|_| ContentIdError::NotAscii)?;
        Self::parse(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `UP0001`
    pub fn service_id(&self) -> &str {
        &self.0[..6]
    }

    /// `PCSE00001`
    pub fn title_id(&self) -> &str {
        &self.0[7..16]
    }

    /// The sixteen-character label after the last dash.
    pub fn label(&self) -> &str {
        &self.0[20..]
    }

    /// Vita titles use `P` or `V` as the first letter after the title-id
    /// region prefix (`PCSE`, `VCAS`...).
    pub fn is_vita(&self) -> bool {
        matches!(self.0.as_bytes()[7], b'P' | b'V')
    }

    pub fn is_bundle(&self) -> bool {
        &self.0[7..11] == "CUSA"
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentId {
    type Err = ContentIdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentId {
    type Error = ContentIdError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        if grammar().is_match(&s) {
            Ok(Self(s))
        } else {
            Err(ContentIdError::Grammar(s))
        }
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
