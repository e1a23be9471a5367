//! Host value conversions.

use crate::error::{BridgeError, BridgeResult};

/// Converts host byte arrays (signed) to and from native bytes.
pub struct ByteArrayCodec;

impl ByteArrayCodec {
    /// Copy a host array into a native buffer.
    pub fn to_native(host: &[i8]) -> Vec<u8> {
        host.iter().map(|&b| b as u8).collect()
    }

    /// Copy native bytes into a new host array.
    pub fn to_host(native: &[u8]) -> Vec<i8> {
        native.iter().map(|&b| b as i8).collect()
    }

    /// Copy at most `len` leading bytes of a host array.
    ///
    /// Mirrors hosts that pass an explicit length alongside the array.
    pub fn to_native_len(host: &[i8], len: usize) -> BridgeResult<Vec<u8>> {
        if len > host.len() {
            return Err(BridgeError::bad_parameter(format!(
                "length {} exceeds array of {}",
                len,
                host.len()
            )));
        }
        Ok(Self::to_native(&host[..len]))
    }
}

/// Converts host strings (UTF-16) to and from native strings.
pub struct StringCodec;

impl StringCodec {
    /// Decode a host string; unpaired surrogates are rejected.
    pub fn to_native(host: &[u16]) -> BridgeResult<String> {
        String::from_utf16(host)
            .map_err(|e| BridgeError::bad_parameter(format!("malformed host string: {}", e)))
    }

    /// Encode a native string for the host.
    pub fn to_host(native: &str) -> Vec<u16> {
        native.encode_utf16().collect()
    }
}
