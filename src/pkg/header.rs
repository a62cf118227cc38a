//! Fixed-offset PKG header and the info table that follows it.
//!
//! ```text
//!  0x00  magic        7F 'P' 'K' 'G'
//!  0x08  info_offset  u32 BE
//!  0x0C  info_count   u32 BE
//!  0x14  item_count   u32 BE
//!  0x18  total_size   u64 BE
//!  0x20  data_offset  u64 BE
//!  0x30  content_id   36 bytes ASCII
//!  0x70  iv           16 bytes
//!  0xE7  key_type     low 3 bits
//! ```
//!
//! All multi-byte fields are big-endian.

use std::fmt;

use crate::bytes::{ByteView, OutOfBounds};
use crate::content_id::{ContentId, ContentIdError, CONTENT_ID_LEN};

use super::PkgError;

pub const PKG_MAGIC: [u8; 4] = [0x7F, b'P', b'K', b'G'];

pub const PKG_HEADER_SIZE:     usize = 0xC0;
pub const PKG_EXT_HEADER_SIZE: usize = 0x40;

pub const INFO_OFFSET_OFFSET: usize = 0x08;
pub const INFO_COUNT_OFFSET:  usize = 0x0C;
pub const ITEM_COUNT_OFFSET:  usize = 0x14;
pub const TOTAL_SIZE_OFFSET:  usize = 0x18;
pub const DATA_OFFSET_OFFSET: usize = 0x20;
pub const CONTENT_ID_OFFSET:  usize = 0x30;
pub const IV_OFFSET:          usize = 0x70;
pub const KEY_TYPE_OFFSET:    usize = 0xE7;

/// Info entry carrying the content type scalar.
pub const INFO_CONTENT_TYPE: u32 = 0x02;
/// Info entry locating the embedded SFO.
pub const INFO_SFO: u32 = 0x0E;

const INFO_ENTRY_HEADER: usize = 8;

// ── Key type ─────────────────────────────────────────────────────────────────

/// Which key family the package body is encrypted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Psp,
    Vita2,
    Vita3,
    Vita4,
    Unknown(u8),
}

impl KeyType {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x07 {
            1 => KeyType::Psp,
            2 => KeyType::Vita2,
            3 => KeyType::Vita3,
            4 => KeyType::Vita4,
            n => KeyType::Unknown(n),
        }
    }

    pub fn is_vita(self) -> bool {
        matches!(self, KeyType::Vita2 | KeyType::Vita3 | KeyType::Vita4)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Psp        => f.write_str("psp"),
            KeyType::Vita2      => f.write_str("vita2"),
            KeyType::Vita3      => f.write_str("vita3"),
            KeyType::Vita4      => f.write_str("vita4"),
            KeyType::Unknown(n) => write!(f, "unknown({n})"),
        }
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgHeader {
    pub info_offset: u32,
    pub info_count:  u32,
    pub item_count:  u32,
    pub total_size:  u64,
    pub data_offset: u64,
    /// Raw identity field; validate with [`PkgHeader::content_id`].
    pub content_id:  [u8; CONTENT_ID_LEN],
    pub iv:          [u8; 16],
    pub key_type:    KeyType,
}

impl PkgHeader {
    /// Bytes that must be fetched to decode a header.
    pub const FETCH_LEN: usize = PKG_HEADER_SIZE + PKG_EXT_HEADER_SIZE;

    /// Decode a header from the first [`PkgHeader::FETCH_LEN`] bytes of a
    /// package.  The magic is checked before anything else is read.
    pub fn parse(data: &[u8]) -> Result<Self, PkgError> {
        let view = ByteView::new(data);
        let magic: [u8; 4] = view.array(0)?;
        if magic != PKG_MAGIC {
            return Err(PkgError::FormatMismatch(format!(
                "bad magic {}",
                hex::encode_upper(magic)
            )));
        }
        // The key-type byte is the last field read; insisting on it up front
        // keeps a truncated buffer from half-parsing.
        view.slice(0, Self::FETCH_LEN)?;

        Ok(Self {
            info_offset: view.be_u32(INFO_OFFSET_OFFSET)?,
            info_count:  view.be_u32(INFO_COUNT_OFFSET)?,
            item_count:  view.be_u32(ITEM_COUNT_OFFSET)?,
            total_size:  view.be_u64(TOTAL_SIZE_OFFSET)?,
            data_offset: view.be_u64(DATA_OFFSET_OFFSET)?,
            content_id:  view.array(CONTENT_ID_OFFSET)?,
            iv:          view.array(IV_OFFSET)?,
            key_type:    KeyType::from_raw(view.u8(KEY_TYPE_OFFSET)?),
        })
    }

    pub fn content_id(&self) -> Result<ContentId, ContentIdError> {
        ContentId::from_field(&self.content_id)
    }

    /// Length of the info table, `[info_offset, data_offset)`.
    pub fn info_table_len(&self) -> Result<u32, PkgError> {
        let len = self
            .data_offset
            .checked_sub(self.info_offset as u64)
            .ok_or_else(|| {
                PkgError::FormatMismatch(format!(
                    "data offset {:#x} precedes info offset {:#x}",
                    self.data_offset, self.info_offset
                ))
            })?;
        u32::try_from(len)
            .map_err(|_| PkgError::FormatMismatch(format!("info table of {len:#x} bytes")))
    }
}

// ── Info table ───────────────────────────────────────────────────────────────

/// Where the SFO lives, as an absolute offset into the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfoLocation {
    pub offset: u32,
    pub size:   u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InfoScan {
    /// Last content-type scalar seen.
    pub content_type: Option<u32>,
    pub sfo:          Option<SfoLocation>,
    pub entries_read: u32,
}

/// Walk up to `info_count` entries of an info table.
///
/// Scanning stops at the SFO entry.  An entry whose declared size runs past
/// the end of `table` fails; nothing past it could be trusted.
pub fn scan_info_table(table: &[u8], info_count: u32) -> Result<InfoScan, OutOfBounds> {
    let view = ByteView::new(table);
    let mut scan = InfoScan::default();
    let mut pos = 0usize;

    while scan.entries_read < info_count && pos < view.len() {
        let kind = view.be_u32(pos)?;
        let size = view.be_u32(pos + 4)? as usize;
        pos += INFO_ENTRY_HEADER;
        let payload = ByteView::new(view.slice(pos, size)?);

        match kind {
            INFO_CONTENT_TYPE => scan.content_type = Some(payload.be_u32(0)?),
            INFO_SFO => {
                scan.sfo = Some(SfoLocation { offset: payload.be_u32(0)?, size: payload.be_u32(4)? });
                scan.entries_read += 1;
                break;
            }
            other => tracing::trace!(kind = other, size, "skipping info entry"),
        }

        pos += size;
        scan.entries_read += 1;
    }
    Ok(scan)
}
