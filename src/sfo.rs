//! PARAM.SFO property-list parser.
//!
//! # Layout (all fields little-endian)
//!
//! | Offset | Size | Field                         |
//! |--------|------|-------------------------------|
//! | 0x00   | 4    | magic `00 'P' 'S' 'F'`        |
//! | 0x04   | 4    | version, must be `0x0101`     |
//! | 0x08   | 4    | key table offset              |
//! | 0x0C   | 4    | value table offset            |
//! | 0x10   | 4    | entry count                   |
//! | 0x14   | 16×n | index entries                 |
//!
//! Each index entry is `key_offset: u16, type: u16, len: u32, max_len: u32,
//! value_offset: u32`.  Key offsets are relative to the key table, value
//! offsets to the value table.
//!
//! Lookups are a linear scan; the first entry whose key matches wins.  An
//! absent key is `Ok(None)`, never an error.

use std::fmt;

use thiserror::Error;

use crate::bytes::{ByteView, OutOfBounds};

pub const SFO_MAGIC:   [u8; 4] = [0x00, b'P', b'S', b'F'];
pub const SFO_VERSION: u32     = 0x0000_0101;

const HEADER_SIZE: usize = 0x14;
const ENTRY_SIZE:  usize = 0x10;

// ── Value types ──────────────────────────────────────────────────────────────

/// Declared type of an SFO value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SfoType {
    /// `0x0004`: string of exactly `len` bytes, no terminator.
    FixedString,
    /// `0x0204`: NUL-terminated string.
    String,
    /// `0x0404`: little-endian u32.
    Integer,
    Other(u16),
}

impl SfoType {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0x0004 => SfoType::FixedString,
            0x0204 => SfoType::String,
            0x0404 => SfoType::Integer,
            other  => SfoType::Other(other),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            SfoType::FixedString => 0x0004,
            SfoType::String      => 0x0204,
            SfoType::Integer     => 0x0404,
            SfoType::Other(raw)  => raw,
        }
    }
}

impl fmt::Display for SfoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.raw())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SfoError {
    #[error("not an SFO blob (magic {0:02X?})")]
    UnsupportedFormat([u8; 4]),
    #[error("unsupported SFO version {0:#010x}, only 1.1 is handled")]
    UnsupportedVersion(u32),
    #[error("SFO data truncated: {0}")]
    TruncatedInput(#[from] OutOfBounds),
    /// The declared type (or, for integers, the declared length) does not
    /// fit the requested lookup.
    #[error("SFO key '{key}' has type {found} ({found_len} bytes), expected {expected}")]
    TypeMismatch { key: String, found: SfoType, found_len: u32, expected: &'static str },
}

// ── Parser ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    ty:           SfoType,
    len:          u32,
    value_offset: u32,
}

/// Parsed view over an SFO blob.  Borrowing, immutable.
#[derive(Debug, Clone, Copy)]
pub struct Sfo<'a> {
    view:        ByteView<'a>,
    key_table:   usize,
    value_table: usize,
    count:       u32,
}

impl<'a> Sfo<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, SfoError> {
        let view = ByteView::new(data);
        let magic: [u8; 4] = view.array(0)?;
        if magic != SFO_MAGIC {
            return Err(SfoError::UnsupportedFormat(magic));
        }
        let version = view.le_u32(0x04)?;
        if version != SFO_VERSION {
            return Err(SfoError::UnsupportedVersion(version));
        }
        view.slice(0, HEADER_SIZE)?;
        Ok(Self {
            view,
            key_table:   view.le_u32(0x08)? as usize,
            value_table: view.le_u32(0x0C)? as usize,
            count:       view.le_u32(0x10)?,
        })
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn find(&self, key: &str) -> Result<Option<IndexEntry>, SfoError> {
        for i in 0..self.count as usize {
            let base = HEADER_SIZE + i * ENTRY_SIZE;
            let key_offset = self.view.le_u16(base)? as usize;
            let name = self.view.cstr(self.key_table + key_offset)?;
            if name == key.as_bytes() {
                return Ok(Some(IndexEntry {
                    ty:           SfoType::from_raw(self.view.le_u16(base + 2)?),
                    len:          self.view.le_u32(base + 4)?,
                    value_offset: self.view.le_u32(base + 12)?,
                }));
            }
        }
        Ok(None)
    }

    /// Declared type of `key`, if present.
    pub fn type_of(&self, key: &str) -> Result<Option<SfoType>, SfoError> {
        Ok(self.find(key)?.map(|e| e.ty))
    }

    /// Look up a string value (`0x0204` or `0x0004`).
    pub fn get_str(&self, key: &str) -> Result<Option<String>, SfoError> {
        let Some(entry) = self.find(key)? else {
            return Ok(None);
        };
        let pos = self.value_table + entry.value_offset as usize;
        let raw = match entry.ty {
            SfoType::String => {
                let s = self.view.cstr(pos)?;
                if s.len() as u64 + 1 != entry.len as u64 {
                    tracing::warn!(
                        key,
                        declared = entry.len,
                        actual = s.len() + 1,
                        "SFO string length does not match its declared length"
                    );
                }
                s
            }
            SfoType::FixedString => self.view.slice(pos, entry.len as usize)?,
            found => {
                return Err(SfoError::TypeMismatch {
                    key: key.to_owned(),
                    found,
                    found_len: entry.len,
                    expected: "string",
                })
            }
        };
        Ok(Some(String::from_utf8_lossy(raw).into_owned()))
    }

    /// Look up an integer value (`0x0404`, exactly four bytes).
    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, SfoError> {
        let Some(entry) = self.find(key)? else {
            return Ok(None);
        };
        if entry.ty != SfoType::Integer {
            return Err(SfoError::TypeMismatch {
                key: key.to_owned(),
                found: entry.ty,
                found_len: entry.len,
                expected: "integer",
            });
        }
        if entry.len != 4 {
            return Err(SfoError::TypeMismatch {
                key: key.to_owned(),
                found: entry.ty,
                found_len: entry.len,
                expected: "4-byte integer",
            });
        }
        Ok(Some(self.view.le_u32(self.value_table + entry.value_offset as usize)?))
    }
}

// ── Title metadata ───────────────────────────────────────────────────────────

/// The SFO fields the catalog cares about, normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SfoMetadata {
    pub category:       Option<String>,
    pub title:          Option<String>,
    pub title_id:       Option<String>,
    pub content_id:     Option<String>,
    /// `major * 100 + minor`
    pub app_version:    Option<u32>,
    /// `major * 100 + minor`
    pub system_version: Option<u32>,
    /// `YYYYMMDD`
    pub creation_date:  Option<u32>,
}

impl SfoMetadata {
    pub fn from_sfo(sfo: &Sfo<'_>) -> Result<Self, SfoError> {
        let app_version = sfo
            .get_str("APP_VER")?
            .and_then(|v| version_from_string(&v))
            .filter(|&v| v != 0);
        let system_version = sfo
            .get_u32("PSP2_SYSTEM_VER")?
            .map(version_from_bcd)
            .filter(|&v| v != 0);
        let creation_date = sfo
            .get_str("PUBTOOLINFO")?
            .and_then(|info| creation_date(&info));

        Ok(Self {
            category:   sfo.get_str("CATEGORY")?,
            title:      sfo.get_str("TITLE")?,
            title_id:   sfo.get_str("TITLE_ID")?,
            content_id: sfo.get_str("CONTENT_ID")?,
            app_version,
            system_version,
            creation_date,
        })
    }
}

/// `"01.05"` → `105`.
pub fn version_from_string(version: &str) -> Option<u32> {
    let parsed = match version.as_bytes() {
        [_, _, b'.', _, _, ..] => version
            .get(0..2)
            .zip(version.get(3..5))
            .and_then(|(major, minor)| Some(major.parse::<u32>().ok()? * 100 + minor.parse::<u32>().ok()?)),
        _ => None,
    };
    if parsed.is_none() {
        tracing::warn!(version, "unexpected version format");
    }
    parsed
}

/// BCD system version (`0x03600011`) → `360`.  Only the upper 16 bits are
/// significant.
pub fn version_from_bcd(version: u32) -> u32 {
    let v = version >> 16;
    ((v >> 12) & 0xF) * 1000 + ((v >> 8) & 0xF) * 100 + ((v >> 4) & 0xF) * 10 + (v & 0xF)
}

/// Extract `c_date=YYYYMMDD` from a PUBTOOLINFO string.
pub fn creation_date(pubtoolinfo: &str) -> Option<u32> {
    const TAG: &str = "c_date=";
    let start = pubtoolinfo.find(TAG)? + TAG.len();
    let date = pubtoolinfo.get(start..start + 8).and_then(|d| d.parse::<u32>().ok());
    if date.is_none() {
        tracing::warn!(pubtoolinfo, "malformed c_date in PUBTOOLINFO");
    }
    date
}

// ── Builder (tests) ──────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::test_support::{build, Value};
    use super::*;

    fn sample() -> Vec<u8> {
        build(&[
            ("APP_VER", Value::Str("01.05")),
            ("CATEGORY", Value::Str("gd")),
            ("PSP2_SYSTEM_VER", Value::Int(0x0360_0011)),
            ("PUBTOOLINFO", Value::Str("c_date=20171012,sdk_ver=03550011")),
            ("TITLE_ID", Value::Fixed(b"PCSE00001")),
        ])
    }

    #[test]
    fn typed_lookups() {
        let data = sample();
        let sfo = Sfo::parse(&data).unwrap();
        assert_eq!(sfo.len(), 5);
        assert_eq!(sfo.get_str("CATEGORY").unwrap().as_deref(), Some("gd"));
        assert_eq!(sfo.get_str("TITLE_ID").unwrap().as_deref(), Some("PCSE00001"));
        assert_eq!(sfo.get_u32("PSP2_SYSTEM_VER").unwrap(), Some(0x0360_0011));
        assert_eq!(sfo.type_of("APP_VER").unwrap(), Some(SfoType::String));
    }

    #[test]
    fn absent_key_is_not_an_error() {
        let data = sample();
        let sfo = Sfo::parse(&data).unwrap();
        assert_eq!(sfo.get_str("TITLE").unwrap(), None);
        assert_eq!(sfo.get_u32("PARENTAL_LEVEL").unwrap(), None);
    }

    #[test]
    fn integer_requested_as_string_is_a_type_mismatch() {
        let data = sample();
        let sfo = Sfo::parse(&data).unwrap();
        let err = sfo.get_str("PSP2_SYSTEM_VER").unwrap_err();
        assert!(matches!(
            err,
            SfoError::TypeMismatch { found: SfoType::Integer, expected: "string", .. }
        ));
        let err = sfo.get_u32("CATEGORY").unwrap_err();
        assert!(matches!(err, SfoError::TypeMismatch { found: SfoType::String, .. }));
    }

    #[test]
    fn integer_with_wrong_length_is_rejected() {
        let data = build(&[("ATTRIBUTE", Value::Raw(0x0404, &[1, 2]))]);
        let sfo = Sfo::parse(&data).unwrap();
        assert_eq!(
            sfo.get_u32("ATTRIBUTE").unwrap_err(),
            SfoError::TypeMismatch {
                key: "ATTRIBUTE".into(),
                found: SfoType::Integer,
                found_len: 2,
                expected: "4-byte integer",
            }
        );
    }

    #[test]
    fn unknown_type_is_a_mismatch() {
        let data = build(&[("ODD", Value::Raw(0x0104, b"x"))]);
        let sfo = Sfo::parse(&data).unwrap();
        assert!(matches!(
            sfo.get_str("ODD").unwrap_err(),
            SfoError::TypeMismatch { found: SfoType::Other(0x0104), .. }
        ));
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut data = sample();
        data[1] = b'X';
        assert!(matches!(Sfo::parse(&data), Err(SfoError::UnsupportedFormat(_))));

        let mut data = sample();
        data[4] = 0x00;
        data[5] = 0x02;
        assert_eq!(Sfo::parse(&data).unwrap_err(), SfoError::UnsupportedVersion(0x0200));

        assert!(matches!(Sfo::parse(&SFO_MAGIC), Err(SfoError::TruncatedInput(_))));
    }

    #[test]
    fn offsets_past_the_end_are_truncation() {
        let mut data = sample();
        // Point the value table beyond the buffer.
        data[0x0C..0x10].copy_from_slice(&0xFFFFu32.to_le_bytes());
        let sfo = Sfo::parse(&data).unwrap();
        assert!(matches!(sfo.get_str("CATEGORY"), Err(SfoError::TruncatedInput(_))));

        let mut data = sample();
        // Claim more entries than the blob holds.
        data[0x10..0x14].copy_from_slice(&1000u32.to_le_bytes());
        let sfo = Sfo::parse(&data).unwrap();
        assert!(matches!(sfo.get_str("MISSING"), Err(SfoError::TruncatedInput(_))));
    }

    #[test]
    fn metadata_is_normalized() {
        let data = sample();
        let meta = SfoMetadata::from_sfo(&Sfo::parse(&data).unwrap()).unwrap();
        assert_eq!(meta.category.as_deref(), Some("gd"));
        assert_eq!(meta.app_version, Some(105));
        assert_eq!(meta.system_version, Some(360));
        assert_eq!(meta.creation_date, Some(20171012));
        assert_eq!(meta.title, None);
    }

    #[test]
    fn zero_versions_become_none() {
        let data = build(&[
            ("APP_VER", Value::Str("00.00")),
            ("PSP2_SYSTEM_VER", Value::Int(0)),
        ]);
        let meta = SfoMetadata::from_sfo(&Sfo::parse(&data).unwrap()).unwrap();
        assert_eq!(meta.app_version, None);
        assert_eq!(meta.system_version, None);
    }

    #[test]
    fn version_helpers() {
        assert_eq!(version_from_string("01.00"), Some(100));
        assert_eq!(version_from_string("12.34"), Some(1234));
        assert_eq!(version_from_string("1.0"), None);
        assert_eq!(version_from_string("ab.cd"), None);
        assert_eq!(version_from_bcd(0x0365_0011), 365);
        assert_eq!(version_from_bcd(0x1000_0000), 1000);
        assert_eq!(creation_date("sdk_ver=1,c_date=20180101"), Some(20180101));
        assert_eq!(creation_date("c_date=2018"), None);
        assert_eq!(creation_date("sdk_ver=1"), None);
    }
}
