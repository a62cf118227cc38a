//! RIF license records: zRIF text codec and on-disk file naming.
//!
//! A RIF is an opaque 512-byte record.  Two things about it are interpreted
//! here:
//!   - the content id at `0x10..0x34`
//!   - its storage name, `AES-128-ECB(mode_le64 || aid_le64)` in lowercase
//!     hex with a `.rif` extension
//!
//! The name is a deterministic ciphertext, so a license can be located by
//! recomputing the name from the account id instead of scanning a
//! directory, and the account id can be recovered from an existing name.

pub mod zrif;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use thiserror::Error;

use crate::content_id::{ContentId, ContentIdError, CONTENT_ID_LEN};

pub use zrif::{decode as decode_zrif, encode as encode_zrif};

/// Size of a RIF license record.
pub const RIF_SIZE: usize = 512;
/// Offset of the content id inside a RIF.
pub const RIF_CONTENT_ID_OFFSET: usize = 0x10;
pub const RIF_EXTENSION: &str = "rif";

const RIF_NAME_KEY: [u8; 16] = [
    0x19, 0xDD, 0x4F, 0xB9, 0x89, 0x48, 0x2B, 0xD4,
    0xCB, 0x9E, 0xC9, 0xC7, 0x9A, 0x2E, 0xFB, 0xD0,
];

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RifError {
    #[error("RIF must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("zRIF is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("zRIF truncated: need {needed} bytes, got {actual}")]
    TruncatedInput { needed: usize, actual: usize },
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("'{0}' is not a RIF file name")]
    InvalidName(String),
    #[error("RIF content id: {0}")]
    ContentId(#[from] ContentIdError),
}

// ── License mode ─────────────────────────────────────────────────────────────

/// How a license is bound, as encoded in the low byte of the name's mode
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RifMode {
    /// Bound to one account.
    Bounded = 0,
    /// Valid for any account.
    Fixed = 1,
}

impl RifMode {
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(RifMode::Bounded),
            1 => Some(RifMode::Fixed),
            _ => None,
        }
    }
}

impl From<RifMode> for u64 {
    fn from(mode: RifMode) -> Self {
        mode as u64
    }
}

// ── Names ────────────────────────────────────────────────────────────────────

fn cipher() -> Aes128 {
    Aes128::new(&GenericArray::from(RIF_NAME_KEY))
}

/// Storage file name for a license issued to `aid` under `mode`.
///
/// Both values are laid out little-endian whatever the host byte order.
pub fn rif_name(mode: u64, aid: u64) -> String {
    let mut block = GenericArray::from([0u8; 16]);
    block[..8].copy_from_slice(&mode.to_le_bytes());
    block[8..].copy_from_slice(&aid.to_le_bytes());
    cipher().encrypt_block(&mut block);
    format!("{}.{RIF_EXTENSION}", hex::encode(block))
}

/// Recover `(mode, aid)` from a name produced by [`rif_name`].
///
/// A name whose plaintext mode is not 0 or 1 was not produced by
/// [`rif_name`] (or was produced with a different key); that is reported as
/// an integrity violation.
pub fn account_id_from_rif_name(name: &str) -> Result<(RifMode, u64), RifError> {
    let stem = name.split('.').next().unwrap_or_default();
    let raw = hex::decode(stem).map_err(|_| RifError::InvalidName(name.to_owned()))?;
    if raw.len() != 16 {
        return Err(RifError::InvalidName(name.to_owned()));
    }

    let mut block = GenericArray::clone_from_slice(&raw);
    cipher().decrypt_block(&mut block);

    let mut mode_bytes = [0u8; 8];
    mode_bytes.copy_from_slice(&block[..8]);
    let mode_raw = u64::from_le_bytes(mode_bytes);
    let mode = RifMode::from_raw(mode_raw).ok_or_else(|| {
        RifError::IntegrityViolation(format!(
            "decoded RIF mode {mode_raw:#018x} is neither 0 nor 1"
        ))
    })?;

    let mut aid_bytes = [0u8; 8];
    aid_bytes.copy_from_slice(&block[8..]);
    Ok((mode, u64::from_le_bytes(aid_bytes)))
}

// ── Content id ───────────────────────────────────────────────────────────────

/// Validated content id stored in a RIF.
pub fn content_id_from_rif(rif: &[u8]) -> Result<ContentId, RifError> {
    if rif.len() != RIF_SIZE {
        return Err(RifError::InvalidLength { expected: RIF_SIZE, actual: rif.len() });
    }
    let field = &rif[RIF_CONTENT_ID_OFFSET..RIF_CONTENT_ID_OFFSET + CONTENT_ID_LEN];
    Ok(ContentId::from_field(field)?)
}

/// Validated content id of the RIF a zRIF token expands to.
pub fn content_id_from_zrif(zrif: &str) -> Result<ContentId, RifError> {
    content_id_from_rif(&zrif::decode(zrif)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const AID: u64 = 0x0123_4567_89AB_CDEF;

    #[test]
    fn known_names() {
        assert_eq!(rif_name(0, AID), "27c9783aef960c9e137aec8dd853bf79.rif");
        assert_eq!(rif_name(1, AID), "d607a34fa87599c6a484915563b57096.rif");
        assert_eq!(rif_name(0, 0), "79ca736d94b8c1765938daee39ce80ba.rif");
    }

    #[test]
    fn recovers_account_id() {
        assert_eq!(
            account_id_from_rif_name("27c9783aef960c9e137aec8dd853bf79.rif").unwrap(),
            (RifMode::Bounded, AID)
        );
        // Hex case and a missing extension are tolerated.
        assert_eq!(
            account_id_from_rif_name("D607A34FA87599C6A484915563B57096").unwrap(),
            (RifMode::Fixed, AID)
        );
    }

    #[test]
    fn mode_outside_zero_or_one_is_an_integrity_violation() {
        // Plaintext mode = 2.
        let err = account_id_from_rif_name("3a472e31919c65012b9bd1358c57b9c6.rif").unwrap_err();
        assert!(matches!(err, RifError::IntegrityViolation(_)));
        // Plaintext mode = 0x100: low byte is 0 but byte 1 is not.
        let err = account_id_from_rif_name("65868129f095773c9c202c8b6c5aedb5.rif").unwrap_err();
        assert!(matches!(err, RifError::IntegrityViolation(_)));
    }

    #[test]
    fn malformed_names() {
        for bad in ["", "zz.rif", "27c9783aef960c9e.rif", "27c9783aef960c9e137aec8dd853bf7.rif"] {
            assert!(
                matches!(account_id_from_rif_name(bad), Err(RifError::InvalidName(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn content_id_from_record_and_token() {
        let rif = zrif::tests::sample_rif();
        assert_eq!(
            content_id_from_rif(&rif).unwrap().as_str(),
            "UP0001-PCSE00001_00-0000000000000000"
        );
        assert_eq!(
            content_id_from_zrif(zrif::tests::SAMPLE_ZRIF).unwrap().as_str(),
            "UP0001-PCSE00001_00-0000000000000000"
        );
        assert!(matches!(
            content_id_from_rif(&[0u8; RIF_SIZE]),
            Err(RifError::ContentId(_))
        ));
        assert!(matches!(
            content_id_from_rif(&rif[..100]),
            Err(RifError::InvalidLength { .. })
        ));
    }

    proptest! {
        #[test]
        fn name_roundtrip(fixed in any::<bool>(), aid in any::<u64>()) {
            let mode = if fixed { RifMode::Fixed } else { RifMode::Bounded };
            let name = rif_name(mode.into(), aid);
            prop_assert_eq!(name.len(), 32 + 4);
            prop_assert!(name.ends_with(".rif"));
            prop_assert_eq!(account_id_from_rif_name(&name).unwrap(), (mode, aid));
        }

        #[test]
        fn foreign_modes_never_decode(mode in 2u64.., aid in any::<u64>()) {
            let name = rif_name(mode, aid);
            let rejected = matches!(
                account_id_from_rif_name(&name),
                Err(RifError::IntegrityViolation(_))
            );
            prop_assert!(rejected);
        }
    }
}
