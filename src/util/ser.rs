//! Helpful serialization tools.
//!
//! Fixed-size binary values show up everywhere in the relay: hashes, tree
//! entries, keys, signatures. We give them one of two text forms, `0x` hex for
//! anything Merkle-shaped (so they line up with ledger tooling) and URL-safe
//! base64 for everything else, and keep the serde glue for both here.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de::DeserializeOwned, Serialize};

/// Convert bytes to base64
pub fn base64_encode<T: AsRef<[u8]>>(bytes: T) -> String {
    URL_SAFE_NO_PAD.encode(bytes.as_ref())
}

/// Convert base64 to bytes
pub fn base64_decode<T: AsRef<[u8]>>(bytes: T) -> Result<Vec<u8>> {
    Ok(URL_SAFE_NO_PAD.decode(bytes.as_ref())?)
}

/// Convert bytes to `0x`-prefixed lowercase hex
pub fn hex_encode<T: AsRef<[u8]>>(bytes: T) -> String {
    format!("0x{}", hex::encode(bytes.as_ref()))
}

/// Convert hex (with or without `0x`) to bytes
pub fn hex_decode(string: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(string.strip_prefix("0x").unwrap_or(string))?)
}

/// Decode hex into a fixed-size array.
pub fn hex_decode_array<const N: usize>(string: &str) -> Result<[u8; N]> {
    hex_decode(string)?.try_into().map_err(|_| Error::BadLength)
}

/// Serialize an object to compact json bytes.
pub(crate) fn serialize_json<T: Serialize>(obj: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(obj)?)
}

/// Deserialize an object from json bytes.
pub(crate) fn deserialize_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Implements `Serialize`/`Deserialize` for a type that has a canonical
/// string form via `Display` and `FromStr`.
macro_rules! serde_via_string {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use serde_via_string;
