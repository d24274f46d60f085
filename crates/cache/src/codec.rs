//! On-disk artifact encoding
//!
//! ```text
//! +----------+-----------+------------------+---------------------------+
//! | magic(8) | rev(4 LE) | sha256(payload)  | zstd(bincode(artifact))   |
//! +----------+-----------+------------------+---------------------------+
//! ```
//!
//! The digest is verified before anything is deserialized, so truncated or
//! overwritten files surface as [`Error::Corrupt`] instead of garbage values.

use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

const MAGIC: &[u8; 8] = b"EEGFLOW\0";
const FORMAT_REVISION: u32 = 1;
const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + 4 + DIGEST_LEN;
const ZSTD_LEVEL: i32 = 3;

/// Encode an artifact into its on-disk representation
pub fn encode<T: Serialize + ?Sized>(artifact: &T) -> Result<Vec<u8>> {
    let raw = bincode::serialize(artifact)
        .map_err(|e| Error::serialization(format!("Failed to encode artifact: {e}")))?;
    let payload = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)
        .map_err(|e| Error::serialization(format!("zstd encoder error: {e}")))?;
    let digest = Sha256::digest(&payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_REVISION.to_le_bytes());
    out.extend_from_slice(digest.as_slice());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode an artifact, verifying header and payload digest first
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::corrupt(format!(
            "truncated header ({} bytes, expected at least {HEADER_LEN})",
            bytes.len()
        )));
    }
    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(Error::corrupt("bad magic"));
    }
    let (revision, rest) = rest.split_at(4);
    let revision = u32::from_le_bytes([revision[0], revision[1], revision[2], revision[3]]);
    if revision != FORMAT_REVISION {
        return Err(Error::corrupt(format!(
            "unsupported format revision {revision}"
        )));
    }
    let (expected, payload) = rest.split_at(DIGEST_LEN);
    let computed = Sha256::digest(payload);
    if computed.as_slice() != expected {
        return Err(Error::corrupt("payload digest mismatch"));
    }

    let raw = zstd::decode_all(payload)
        .map_err(|e| Error::corrupt(format!("zstd decode failed: {e}")))?;
    bincode::deserialize(&raw).map_err(|e| Error::corrupt(format!("decode failed: {e}")))
}
