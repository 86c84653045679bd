//! Table encodings.
//!
//! JSON tables are a plain pretty-printed object keyed by canonical call key. Values holding NaN
//! or infinite floats cannot be written as JSON and are left out of the file. Binary tables use
//! the layout below, so truncated or bit-flipped files are rejected before `bincode` sees them:
//!
//! - Header: magic `CDSK`, version `u8`
//! - Payload: `bincode` encoding of the key → value map
//! - Footer: `blake3` hash of header and payload

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::config::StorageFormat;
use crate::error::CacheError;
use crate::key::CallKey;
use crate::shape;

use super::Result;

pub const TABLE_MAGIC: [u8; 4] = *b"CDSK";
pub const TABLE_VERSION: u8 = 1;

const HEADER_LEN: usize = TABLE_MAGIC.len() + 1;
const CHECKSUM_LEN: usize = blake3::OUT_LEN;

/// Serialize the full table in `format`. Keys are written in sorted order.
pub fn encode<'a, V, I>(format: StorageFormat, entries: I) -> Result<Vec<u8>>
where
    V: Serialize + 'a,
    I: IntoIterator<Item = (&'a CallKey, &'a V)>,
{
    let mut map: BTreeMap<&str, &V> =
        entries.into_iter().map(|(key, value)| (key.as_str(), value)).collect();
    let encode_err = |message: String| CacheError::Encode { format, message };

    match format {
        StorageFormat::Json => {
            let before = map.len();
            map.retain(|_, value| !shape::inspect(*value).is_ok_and(|shape| shape.non_finite));
            if map.len() < before {
                warn!(skipped = before - map.len(), "non-finite float results kept in memory only");
            }
            serde_json::to_vec_pretty(&map).map_err(|err| encode_err(err.to_string()))
        }
        StorageFormat::Binary => {
            let payload = bincode::serialize(&map).map_err(|err| encode_err(err.to_string()))?;
            let mut data = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
            data.extend_from_slice(&TABLE_MAGIC);
            data.push(TABLE_VERSION);
            data.extend_from_slice(&payload);
            let checksum = blake3::hash(&data);
            data.extend_from_slice(checksum.as_bytes());
            Ok(data)
        }
    }
}

/// Decode a table previously written by [`encode`]. `path` only labels errors.
pub fn decode<V: DeserializeOwned>(
    format: StorageFormat,
    path: &Path,
    bytes: &[u8],
) -> Result<Vec<(CallKey, V)>> {
    let decode_err = |message: String| CacheError::Decode { path: path.to_path_buf(), message };

    let map: BTreeMap<String, V> = match format {
        StorageFormat::Json => {
            serde_json::from_slice(bytes).map_err(|err| decode_err(err.to_string()))?
        }
        StorageFormat::Binary => {
            if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
                return Err(decode_err(format!("file too small ({} bytes)", bytes.len())));
            }

            let (body, stored) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
            let computed = blake3::hash(body);
            if computed.as_bytes().as_slice() != stored {
                return Err(decode_err("checksum mismatch".to_string()));
            }
            if body[..TABLE_MAGIC.len()] != TABLE_MAGIC {
                return Err(decode_err("invalid magic bytes".to_string()));
            }
            let version = body[TABLE_MAGIC.len()];
            if version != TABLE_VERSION {
                return Err(decode_err(format!(
                    "unsupported version {version} (expected {TABLE_VERSION})"
                )));
            }

            bincode::deserialize(&body[HEADER_LEN..]).map_err(|err| decode_err(err.to_string()))?
        }
    };

    Ok(map.into_iter().map(|(key, value)| (CallKey::from_persisted(key), value)).collect())
}
