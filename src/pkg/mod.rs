//! Remote PKG metadata reader.
//!
//! [`PkgReader`] never downloads a package.  It issues a handful of small
//! range reads through a [`ByteRangeFetcher`]:
//!
//! 1. the header (`0x100` bytes at 0)
//! 2. the info table, `[info_offset, data_offset)`
//! 3. the SFO, only when it lies outside the info table
//! 4. the declared length (8 bytes at `0x18`) and the SHA-1 stored
//!    `0x20` bytes before the end
//!
//! and folds the results into a [`PkgRecord`].  Content ids are memoized per
//! URL in a borrowed [`UrlIdentityCache`].

pub mod header;

use std::borrow::Cow;

use chrono::{Datelike, Local, NaiveDate};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::bytes::{ByteView, OutOfBounds};
use crate::cache::{normalize_url, UrlIdentityCache};
use crate::content_id::{ContentId, ContentIdError, CONTENT_ID_LEN};
use crate::fetch::{ByteRangeFetcher, FetchError};
use crate::sfo::{Sfo, SfoError, SfoMetadata};

pub use header::{scan_info_table, InfoScan, KeyType, PkgHeader, SfoLocation, PKG_MAGIC};

/// Hosts packages are accepted from.
pub const DEFAULT_TRUSTED_PREFIXES: &[&str] = &[
    "http://zeus.dl.playstation.net/",
    "http://ares.dl.playstation.net/",
    "http://gs.ww.np.dl.playstation.net/",
    "http://psm-runtime.np.dl.playstation.net/",
];
pub const PKG_SUFFIX: &str = ".pkg";

/// Bytes between the SHA-1 and the declared end of the package.
const DIGEST_TRAILER: u64 = 0x20;
const DIGEST_LEN: usize = 20;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PkgError {
    #[error("untrusted package URL {url}: {reason}")]
    UntrustedUrl { url: String, reason: &'static str },
    #[error("not a PKG: {0}")]
    FormatMismatch(String),
    /// An offset inside fetched data points past its end.
    #[error("truncated PKG data: {0}")]
    TruncatedInput(#[from] OutOfBounds),
    /// Network-side truncation: the fetcher returned fewer bytes than asked.
    #[error("truncated read at {start:#x}: requested {requested} bytes, got {received}")]
    ShortRead { start: u64, requested: u32, received: usize },
    #[error("invalid content id: {0}")]
    InvalidContentId(#[from] ContentIdError),
    #[error("SFO error: {0}")]
    Sfo(#[from] SfoError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
}

// ── Classification ───────────────────────────────────────────────────────────

/// Category label for a content-type scalar from the info table.
pub fn content_type_category(content_type: u32) -> Option<&'static str> {
    Some(match content_type {
        0x06 => "ps1",
        0x07 => "psp",
        0x09 => "th",
        0x0A => "wdg",
        0x0B => "lic",
        0x0C => "vsh",
        0x0D => "av",
        0x0E => "go",
        0x0F => "min",
        0x10 => "neo",
        0x11 => "vmc",
        0x12 => "ps2",
        0x14 => "psp",
        0x15 => "gd",
        0x16 => "ac",
        0x17 => "la",
        0x18 => "psm",
        0x1D => "psm",
        0x1F => "th",
        _ => return None,
    })
}

/// Catalog bucket for a category label.
pub fn catalog_category(category: &str) -> Option<&'static str> {
    match category {
        "gd"  => Some("downloadable_game"),
        "gdc" => Some("application"),
        "ac"  => Some("add_on"),
        "th"  => Some("theme"),
        "psm" => Some("psm"),
        _     => None,
    }
}

// ── Record ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PkgRecord {
    pub content_id:     ContentId,
    /// Normalized package URL.
    pub url:            String,
    /// Total size declared in the header.
    pub size:           u64,
    #[serde(serialize_with = "serialize_digest")]
    pub sha1:           [u8; DIGEST_LEN],
    pub category:       Option<String>,
    pub app_version:    Option<u32>,
    pub system_version: Option<u32>,
    pub creation_date:  Option<u32>,
    /// `YYYYMMDD` of the read.
    pub verified_date:  u32,
}

impl PkgRecord {
    pub fn sha1_hex(&self) -> String {
        hex::encode_upper(self.sha1)
    }

    pub fn catalog_category(&self) -> Option<&'static str> {
        self.category.as_deref().and_then(catalog_category)
    }
}

fn serialize_digest<S: Serializer>(digest: &[u8; DIGEST_LEN], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode_upper(digest))
}

// ── Reader ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    pub trusted_prefixes: Vec<String>,
    pub suffix:           String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            trusted_prefixes: DEFAULT_TRUSTED_PREFIXES.iter().map(|p| p.to_string()).collect(),
            suffix:           PKG_SUFFIX.to_owned(),
        }
    }
}

pub struct PkgReader<'c, F> {
    fetcher:     F,
    cache:       &'c mut UrlIdentityCache,
    config:      ReaderConfig,
    verified_on: Option<NaiveDate>,
}

impl<'c, F: ByteRangeFetcher> PkgReader<'c, F> {
    pub fn new(fetcher: F, cache: &'c mut UrlIdentityCache) -> Self {
        Self::with_config(fetcher, cache, ReaderConfig::default())
    }

    pub fn with_config(fetcher: F, cache: &'c mut UrlIdentityCache, config: ReaderConfig) -> Self {
        Self { fetcher, cache, config, verified_on: None }
    }

    /// Stamp every record with `date` instead of today.
    pub fn verified_on(mut self, date: NaiveDate) -> Self {
        self.verified_on = Some(date);
        self
    }

    pub fn cache(&self) -> &UrlIdentityCache {
        &*self.cache
    }

    /// Read everything the catalog needs about the package at `url`.
    pub fn read(&mut self, url: &str) -> Result<PkgRecord, PkgError> {
        let url = self.check_url(url)?;

        let header_bytes = self.fetch(&url, 0, PkgHeader::FETCH_LEN as u32)?;
        let header = PkgHeader::parse(&header_bytes)?;
        let content_id = self
            .cache
            .get_or_compute(&url, |_| header.content_id().map_err(PkgError::from))?;
        tracing::debug!(%url, %content_id, key_type = %header.key_type, "read PKG header");

        let table = self.fetch(&url, header.info_offset as u64, header.info_table_len()?)?;
        let scan = scan_info_table(&table, header.info_count)?;
        let default_category = scan
            .content_type
            .and_then(content_type_category)
            .map(str::to_owned);
        if default_category.is_none() {
            tracing::debug!(%url, content_type = ?scan.content_type, "no category for content type");
        }

        let metadata = match scan.sfo {
            Some(location) => {
                let blob = self.sfo_blob(&url, &header, &table, location)?;
                Some(SfoMetadata::from_sfo(&Sfo::parse(&blob)?)?)
            }
            None => None,
        };

        let sha1 = self.fetch_digest(&url)?;

        let mut record = PkgRecord {
            content_id,
            url,
            size: header.total_size,
            sha1,
            category: default_category,
            app_version: None,
            system_version: None,
            creation_date: None,
            verified_date: self.verified_date(),
        };
        if let Some(meta) = metadata {
            record.category = meta.category.or(record.category);
            record.app_version = meta.app_version;
            record.system_version = meta.system_version;
            record.creation_date = meta.creation_date;
        }
        tracing::info!(url = %record.url, content_id = %record.content_id, size = record.size, "verified PKG");
        Ok(record)
    }

    /// Content id of the package at `url`, from the cache or a single
    /// 0x24-byte read of the header field.
    pub fn content_id(&mut self, url: &str) -> Result<ContentId, PkgError> {
        let url = self.check_url(url)?;
        let fetcher = &self.fetcher;
        self.cache.get_or_compute(&url, |key| {
            let field = fetch_exact(fetcher, key, header::CONTENT_ID_OFFSET as u64, CONTENT_ID_LEN as u32)?;
            Ok(ContentId::from_field(&field)?)
        })
    }

    /// SHA-1 stored at the tail of the package at `url`.
    pub fn sha1(&self, url: &str) -> Result<[u8; DIGEST_LEN], PkgError> {
        let url = self.check_url(url)?;
        self.fetch_digest(&url)
    }

    fn check_url(&self, url: &str) -> Result<String, PkgError> {
        let url = normalize_url(url);
        if !self.config.trusted_prefixes.iter().any(|p| url.starts_with(p.as_str())) {
            return Err(PkgError::UntrustedUrl { url: url.to_owned(), reason: "host is not trusted" });
        }
        if !url.ends_with(self.config.suffix.as_str()) {
            return Err(PkgError::UntrustedUrl { url: url.to_owned(), reason: "not a package file" });
        }
        Ok(url.to_owned())
    }

    fn fetch(&self, url: &str, start: u64, length: u32) -> Result<Vec<u8>, PkgError> {
        fetch_exact(&self.fetcher, url, start, length)
    }

    fn sfo_blob<'t>(
        &self,
        url: &str,
        header: &PkgHeader,
        table: &'t [u8],
        location: SfoLocation,
    ) -> Result<Cow<'t, [u8]>, PkgError> {
        let local = (location.offset as u64)
            .checked_sub(header.info_offset as u64)
            .and_then(|rel| ByteView::new(table).slice(rel as usize, location.size as usize).ok());
        match local {
            Some(blob) => Ok(Cow::Borrowed(blob)),
            None => {
                tracing::debug!(url, offset = location.offset, size = location.size, "SFO outside info table");
                Ok(Cow::Owned(self.fetch(url, location.offset as u64, location.size)?))
            }
        }
    }

    fn fetch_digest(&self, url: &str) -> Result<[u8; DIGEST_LEN], PkgError> {
        let size_field = self.fetch(url, header::TOTAL_SIZE_OFFSET as u64, 8)?;
        let declared = ByteView::new(&size_field).be_u64(0)?;
        let start = declared.checked_sub(DIGEST_TRAILER).ok_or_else(|| {
            PkgError::FormatMismatch(format!("declared length {declared:#x} leaves no room for a digest"))
        })?;
        let digest = self.fetch(url, start, DIGEST_LEN as u32)?;
        Ok(ByteView::new(&digest).array(0)?)
    }

    fn verified_date(&self) -> u32 {
        let date = self.verified_on.unwrap_or_else(|| Local::now().date_naive());
        date.year() as u32 * 10_000 + date.month() * 100 + date.day()
    }
}

/// Fetch exactly `length` bytes; extra bytes are dropped, fewer fail.
fn fetch_exact<F: ByteRangeFetcher + ?Sized>(
    fetcher: &F,
    url: &str,
    start: u64,
    length: u32,
) -> Result<Vec<u8>, PkgError> {
    let mut data = fetcher.fetch(url, start, length)?;
    if data.len() < length as usize {
        return Err(PkgError::ShortRead { start, requested: length, received: data.len() });
    }
    data.truncate(length as usize);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfo::test_support::{build, Value};
    use std::cell::RefCell;

    const URL: &str = "http://zeus.dl.playstation.net/cdn/UP0001/PCSE00001_00/game.pkg";
    const ID: &str = "UP0001-PCSE00001_00-0000000000000000";
    const FILE_SIZE: usize = 0x1000;

    /// Serves one in-memory file and records every request.
    struct FakeFetcher {
        file:     Vec<u8>,
        requests: RefCell<Vec<(u64, u32)>>,
    }

    impl FakeFetcher {
        fn new(file: Vec<u8>) -> Self {
            Self { file, requests: RefCell::new(Vec::new()) }
        }
        fn count(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl ByteRangeFetcher for FakeFetcher {
        fn fetch(&self, _url: &str, start: u64, length: u32) -> Result<Vec<u8>, FetchError> {
            self.requests.borrow_mut().push((start, length));
            let start = (start as usize).min(self.file.len());
            let end = (start + length as usize).min(self.file.len());
            Ok(self.file[start..end].to_vec())
        }
    }

    fn entry(kind: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = kind.to_be_bytes().to_vec();
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn sfo_entry(offset: u32, size: u32) -> Vec<u8> {
        let mut payload = offset.to_be_bytes().to_vec();
        payload.extend_from_slice(&size.to_be_bytes());
        payload.extend_from_slice(&[0; 8]);
        entry(0x0E, &payload)
    }

    /// Package of `FILE_SIZE` bytes with `table` at `info_offset`.
    fn package(info_offset: u32, info_count: u32, table: &[u8]) -> Vec<u8> {
        let mut file = vec![0u8; FILE_SIZE];
        file[..4].copy_from_slice(&PKG_MAGIC);
        file[0x08..0x0C].copy_from_slice(&info_offset.to_be_bytes());
        file[0x0C..0x10].copy_from_slice(&info_count.to_be_bytes());
        file[0x18..0x20].copy_from_slice(&(FILE_SIZE as u64).to_be_bytes());
        let data_offset = info_offset as u64 + table.len() as u64;
        file[0x20..0x28].copy_from_slice(&data_offset.to_be_bytes());
        file[0x30..0x54].copy_from_slice(ID.as_bytes());
        let at = info_offset as usize;
        file[at..at + table.len()].copy_from_slice(table);
        let digest = FILE_SIZE - 0x20;
        for (i, b) in file[digest..digest + 20].iter_mut().enumerate() {
            *b = 0xA0 + i as u8;
        }
        file
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    fn sample_sfo() -> Vec<u8> {
        build(&[
            ("APP_VER", Value::Str("01.05")),
            ("CATEGORY", Value::Str("gdc")),
            ("PSP2_SYSTEM_VER", Value::Int(0x0360_0011)),
            ("PUBTOOLINFO", Value::Str("c_date=20120315,sdk_ver=01700000")),
            ("TITLE", Value::Str("Sample")),
        ])
    }

    #[test]
    fn content_type_without_sfo() {
        let mut table = entry(0x02, &0x15u32.to_be_bytes());
        table.extend(entry(0x01, &[0; 8]));
        let fetcher = FakeFetcher::new(package(0xC0, 2, &table));
        let mut cache = UrlIdentityCache::new();
        let record = PkgReader::new(&fetcher, &mut cache).verified_on(date()).read(URL).unwrap();

        assert_eq!(record.content_id.as_str(), ID);
        assert_eq!(record.size, 0x1000);
        assert_eq!(record.category.as_deref(), Some("gd"));
        assert_eq!(record.catalog_category(), Some("downloadable_game"));
        assert_eq!(record.app_version, None);
        assert_eq!(record.system_version, None);
        assert_eq!(record.creation_date, None);
        assert_eq!(record.verified_date, 20240309);
        assert_eq!(record.sha1_hex(), "A0A1A2A3A4A5A6A7A8A9AAABACADAEAFB0B1B2B3");
        // header, info table, size field, digest
        assert_eq!(fetcher.count(), 4);
    }

    #[test]
    fn sfo_inside_info_table_is_sliced_locally() {
        let sfo = sample_sfo();
        let info_offset = 0x200u32;
        let mut table = entry(0x02, &0x15u32.to_be_bytes());
        // Header (8) + payload (16) of the SFO entry come before the blob.
        let sfo_at = info_offset + table.len() as u32 + 24;
        table.extend(sfo_entry(sfo_at, sfo.len() as u32));
        table.extend_from_slice(&sfo);

        let fetcher = FakeFetcher::new(package(info_offset, 4, &table));
        let mut cache = UrlIdentityCache::new();
        let record = PkgReader::new(&fetcher, &mut cache).verified_on(date()).read(URL).unwrap();

        assert_eq!(record.category.as_deref(), Some("gdc"));
        assert_eq!(record.catalog_category(), Some("application"));
        assert_eq!(record.app_version, Some(105));
        assert_eq!(record.system_version, Some(360));
        assert_eq!(record.creation_date, Some(20120315));
        assert_eq!(fetcher.count(), 4);
    }

    #[test]
    fn sfo_outside_info_table_is_fetched() {
        let sfo = sample_sfo();
        let mut table = entry(0x02, &0x16u32.to_be_bytes());
        table.extend(sfo_entry(0x800, sfo.len() as u32));
        let mut file = package(0x200, 2, &table);
        file[0x800..0x800 + sfo.len()].copy_from_slice(&sfo);

        let fetcher = FakeFetcher::new(file);
        let mut cache = UrlIdentityCache::new();
        let record = PkgReader::new(&fetcher, &mut cache).verified_on(date()).read(URL).unwrap();

        assert_eq!(record.category.as_deref(), Some("gdc"));
        assert_eq!(fetcher.count(), 5);
        assert!(fetcher.requests.borrow().contains(&(0x800, sfo.len() as u32)));
    }

    #[test]
    fn bad_magic_issues_one_fetch() {
        let mut file = package(0xC0, 0, &[]);
        file[1] = b'X';
        let fetcher = FakeFetcher::new(file);
        let mut cache = UrlIdentityCache::new();
        let err = PkgReader::new(&fetcher, &mut cache).read(URL).unwrap_err();
        assert!(matches!(err, PkgError::FormatMismatch(_)));
        assert_eq!(fetcher.count(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn untrusted_urls_never_fetch() {
        let fetcher = FakeFetcher::new(package(0xC0, 0, &[]));
        let mut cache = UrlIdentityCache::new();
        let mut reader = PkgReader::new(&fetcher, &mut cache);
        for url in [
            "http://evil.example.com/game.pkg",
            "https://zeus.dl.playstation.net/game.pkg",
            "http://zeus.dl.playstation.net/game.zip",
            "http://zeus.dl.playstation.net/game.zip?x=.pkg",
        ] {
            assert!(matches!(reader.read(url), Err(PkgError::UntrustedUrl { .. })), "{url}");
        }
        assert_eq!(fetcher.count(), 0);
    }

    #[test]
    fn query_string_is_ignored() {
        let fetcher = FakeFetcher::new(package(0xC0, 0, &[]));
        let mut cache = UrlIdentityCache::new();
        let record = PkgReader::new(&fetcher, &mut cache)
            .read(&format!("{URL}?country=us"))
            .unwrap();
        assert_eq!(record.url, URL);
        assert!(cache.get(URL).is_some());
    }

    #[test]
    fn short_header_read_is_reported() {
        let fetcher = FakeFetcher::new(package(0xC0, 0, &[])[..0x80].to_vec());
        let mut cache = UrlIdentityCache::new();
        let err = PkgReader::new(&fetcher, &mut cache).read(URL).unwrap_err();
        assert!(err.to_string().starts_with("truncated read at 0x0"), "{err}");
        assert!(matches!(err, PkgError::ShortRead { start: 0, requested: 0x100, received: 0x80 }));
    }

    #[test]
    fn oversized_info_entry_fails() {
        let mut table = 0x01u32.to_be_bytes().to_vec();
        table.extend_from_slice(&0x1000u32.to_be_bytes());
        table.extend_from_slice(&[0; 8]);
        let fetcher = FakeFetcher::new(package(0xC0, 2, &table));
        let mut cache = UrlIdentityCache::new();
        let err = PkgReader::new(&fetcher, &mut cache).read(URL).unwrap_err();
        assert!(matches!(err, PkgError::TruncatedInput(_)));
    }

    #[test]
    fn invalid_header_identity() {
        let mut file = package(0xC0, 0, &[]);
        file[0x30..0x54].copy_from_slice(&[b'?'; 0x24]);
        let fetcher = FakeFetcher::new(file);
        let mut cache = UrlIdentityCache::new();
        let err = PkgReader::new(&fetcher, &mut cache).read(URL).unwrap_err();
        assert!(matches!(err, PkgError::InvalidContentId(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn broken_sfo_aborts_read() {
        let mut table = sfo_entry(0x800, 0x40);
        table.extend(entry(0x02, &0x15u32.to_be_bytes()));
        let fetcher = FakeFetcher::new(package(0x200, 2, &table));
        let mut cache = UrlIdentityCache::new();
        let err = PkgReader::new(&fetcher, &mut cache).read(URL).unwrap_err();
        assert!(matches!(err, PkgError::Sfo(SfoError::UnsupportedFormat(_))));
    }

    #[test]
    fn cached_identity_short_circuits() {
        let fetcher = FakeFetcher::new(package(0xC0, 0, &[]));
        let mut cache = UrlIdentityCache::new();
        let mut reader = PkgReader::new(&fetcher, &mut cache);

        let id = reader.content_id(URL).unwrap();
        assert_eq!(id.as_str(), ID);
        assert_eq!(*fetcher.requests.borrow(), vec![(0x30u64, 0x24u32)]);

        // A hit issues no fetch at all.
        reader.content_id(&format!("{URL}?country=gb")).unwrap();
        assert_eq!(fetcher.count(), 1);
        assert_eq!(reader.cache().len(), 1);
    }

    #[test]
    fn cached_identity_wins_over_header() {
        let other = ContentId::parse("EP9000-PCSF00178_00-WIPEOUT2048_____").unwrap();
        let mut cache = UrlIdentityCache::new();
        cache.get_or_compute(URL, |_| Ok::<_, PkgError>(other.clone())).unwrap();

        let fetcher = FakeFetcher::new(package(0xC0, 0, &[]));
        let record = PkgReader::new(&fetcher, &mut cache).read(URL).unwrap();
        assert_eq!(record.content_id, other);
    }

    #[test]
    fn digest_needs_room_for_trailer() {
        let mut file = package(0xC0, 0, &[]);
        file[0x18..0x20].copy_from_slice(&0x10u64.to_be_bytes());
        let fetcher = FakeFetcher::new(file);
        let mut cache = UrlIdentityCache::new();
        let reader = PkgReader::new(&fetcher, &mut cache);
        assert!(matches!(reader.sha1(URL), Err(PkgError::FormatMismatch(_))));
    }

    #[test]
    fn record_serializes_with_hex_digest() {
        let fetcher = FakeFetcher::new(package(0xC0, 0, &[]));
        let mut cache = UrlIdentityCache::new();
        let record = PkgReader::new(&fetcher, &mut cache).verified_on(date()).read(URL).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["content_id"], ID);
        assert_eq!(json["sha1"], "A0A1A2A3A4A5A6A7A8A9AAABACADAEAFB0B1B2B3");
        assert_eq!(json["verified_date"], 20240309);
        assert!(json["category"].is_null());
    }

    #[test]
    fn category_tables() {
        assert_eq!(content_type_category(0x15), Some("gd"));
        assert_eq!(content_type_category(0x1D), Some("psm"));
        assert_eq!(content_type_category(0x13), None);
        assert_eq!(catalog_category("th"), Some("theme"));
        assert_eq!(catalog_category("gp"), None);
    }
}
