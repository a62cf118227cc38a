//! zRIF: the compact text form of a 512-byte RIF license record.
//!
//! Encoding is zlib DEFLATE at maximum compression, seeded with a fixed
//! 1024-byte dictionary built from the strings that recur in every RIF
//! (content-id prefixes, the record header, the account id placeholder).
//! A typical record shrinks to about 60 bytes, i.e. an 80-character token.
//!
//! # Header marker
//! zlib always writes a 32 KiB window in the stream header (`78 F9` with the
//! dictionary flag set).  Tokens in circulation carry a 1 KiB window marker
//! instead (`28 EE`), so the encoder rewrites it.  Both markers satisfy the
//! zlib `% 31` header check and both are accepted on decode.
//!
//! # Padding
//! The compressed stream is zero-extended to a multiple of 3 bytes before
//! base64 encoding so the token never ends in `=`.  The extra zeros trail
//! the zlib checksum and are ignored by the inflater.  On decode the token
//! is `=`-padded back to a multiple of 4.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::Engine;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::{RifError, RIF_SIZE};

/// Adler-32 of [`ZRIF_DICT`], as declared in every zRIF stream header.
pub const ZRIF_DICT_ID: u32 = 0x627D_1D5D;

/// zlib header for a 32 KiB window, max compression, preset dictionary.
pub const ZLIB_MARKER: [u8; 2] = [0x78, 0xF9];
/// The same header with a 1 KiB window, as found in published tokens.
pub const ZRIF_MARKER: [u8; 2] = [0x28, 0xEE];

/// Shortest decoded token that can hold a header and a dictionary id.
const MIN_DECODED_LEN: usize = 6;

/// Decoding tolerates non-zero unused bits in the final symbol.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

const DICT_TAIL: &[u8; 144] = b"00009\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00000060000700008\x000000300004000050_00-ADDCONT00002-PCSG00000000001-PCSE000-PCSF000-PCSC000-PCSD000-PCSA000-PCSB000\x00\x01\x00\x01\x00\x01\x00\x02\xef\xcd\xab\x89gE#\x01";

/// Preset dictionary: 880 zero bytes followed by [`DICT_TAIL`].
pub static ZRIF_DICT: [u8; 1024] = build_dict();

const fn build_dict() -> [u8; 1024] {
    let mut dict = [0u8; 1024];
    let start = dict.len() - DICT_TAIL.len();
    let mut i = 0;
    while i < DICT_TAIL.len() {
        dict[start + i] = DICT_TAIL[i];
        i += 1;
    }
    dict
}

/// Compress a 512-byte RIF into a zRIF token.
pub fn encode(rif: &[u8]) -> Result<String, RifError> {
    let mut out = deflate(rif)?;
    out.resize(out.len().div_ceil(3) * 3, 0);
    Ok(STANDARD.encode(&out))
}

/// Dictionary-seeded zlib stream for `rif`, header already rewritten.
fn deflate(rif: &[u8]) -> Result<Vec<u8>, RifError> {
    if rif.len() != RIF_SIZE {
        return Err(RifError::InvalidLength { expected: RIF_SIZE, actual: rif.len() });
    }

    let mut deflater = Compress::new(Compression::best(), true);
    deflater
        .set_dictionary(&ZRIF_DICT)
        .map_err(|e| RifError::Compression(e.to_string()))?;

    // Incompressible input can grow slightly past its own size.
    let mut out = Vec::with_capacity(RIF_SIZE * 2);
    let status = deflater
        .compress_vec(rif, &mut out, FlushCompress::Finish)
        .map_err(|e| RifError::Compression(e.to_string()))?;
    if status != Status::StreamEnd {
        return Err(RifError::Compression(format!("deflate stopped early ({status:?})")));
    }

    if out.starts_with(&ZLIB_MARKER) {
        out[..2].copy_from_slice(&ZRIF_MARKER);
    }
    Ok(out)
}

/// Expand a zRIF token into its 512-byte RIF.
///
/// The token is taken as-is; callers trim surrounding whitespace.
pub fn decode(zrif: &str) -> Result<Vec<u8>, RifError> {
    let mut padded = zrif.to_owned();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let mut input = LENIENT.decode(padded.as_bytes())?;

    if input.len() < MIN_DECODED_LEN {
        return Err(RifError::TruncatedInput { needed: MIN_DECODED_LEN, actual: input.len() });
    }
    let header = u16::from_be_bytes([input[0], input[1]]);
    if header % 31 != 0 {
        return Err(RifError::IntegrityViolation(format!(
            "zRIF header {header:#06x} fails the zlib check"
        )));
    }
    // Back-references into the dictionary reach further than the 1 KiB
    // window the marker advertises.
    if input.starts_with(&ZRIF_MARKER) {
        input[..2].copy_from_slice(&ZLIB_MARKER);
    }

    inflate(&input)
}

fn inflate(input: &[u8]) -> Result<Vec<u8>, RifError> {
    let mut inflater = Decompress::new(true);
    let mut out = vec![0u8; RIF_SIZE];
    let mut dictionary_set = false;

    loop {
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out() as usize;
        if produced == RIF_SIZE {
            break;
        }
        match inflater.decompress(&input[consumed..], &mut out[produced..], FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => break,
            Ok(_) => {
                let stalled = inflater.total_in() as usize == consumed
                    && inflater.total_out() as usize == produced;
                if stalled {
                    break;
                }
            }
            Err(e) if !dictionary_set && e.needs_dictionary().is_some() => {
                if e.needs_dictionary() != Some(ZRIF_DICT_ID) {
                    tracing::debug!(
                        requested = ?e.needs_dictionary(),
                        "zRIF stream asks for an unexpected dictionary id"
                    );
                }
                inflater
                    .set_dictionary(&ZRIF_DICT)
                    .map_err(|e| RifError::Decompression(e.to_string()))?;
                dictionary_set = true;
            }
            Err(e) => return Err(RifError::Decompression(e.to_string())),
        }
    }

    let produced = inflater.total_out() as usize;
    if produced != RIF_SIZE {
        return Err(RifError::TruncatedInput { needed: RIF_SIZE, actual: produced });
    }
    Ok(out)
}
