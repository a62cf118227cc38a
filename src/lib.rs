pub mod bytes;
pub mod cache;
pub mod config;
pub mod content_id;
pub mod fetch;
pub mod pkg;
pub mod rif;
pub mod sfo;

pub use cache::{CacheStore, JsonFileStore, UrlIdentityCache};
pub use config::Settings;
pub use content_id::ContentId;
pub use fetch::{ByteRangeFetcher, HttpRangeFetcher};
pub use pkg::{PkgHeader, PkgReader, PkgRecord};
pub use rif::{account_id_from_rif_name, decode_zrif, encode_zrif, rif_name, RifMode};
pub use sfo::{Sfo, SfoMetadata};
