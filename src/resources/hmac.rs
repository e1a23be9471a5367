//! Keyed message authentication.
//!
//! The state accumulates a key and a message; `get_hmac` and `authenticate`
//! compute over whatever message is current.

use ring::hmac;

use super::{random, Slot};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{self, Handle, NativeObject, Resource, ResourceKind};

/// Digest underlying an HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacDigest {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HmacDigest {
    /// Map a digest size in bits.
    pub fn from_bits(bits: u32) -> BridgeResult<Self> {
        match bits {
            224 => Ok(HmacDigest::Sha224),
            256 => Ok(HmacDigest::Sha256),
            384 => Ok(HmacDigest::Sha384),
            512 => Ok(HmacDigest::Sha512),
            other => Err(BridgeError::bad_parameter(format!(
                "no SHA-2 digest of {} bits",
                other
            ))),
        }
    }

    /// Output length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HmacDigest::Sha224 => 28,
            HmacDigest::Sha256 => 32,
            HmacDigest::Sha384 => 48,
            HmacDigest::Sha512 => 64,
        }
    }

    fn algorithm(&self) -> BridgeResult<hmac::Algorithm> {
        match self {
            HmacDigest::Sha224 => Err(BridgeError::bad_parameter(
                "HMAC-SHA224 is not supported",
            )),
            HmacDigest::Sha256 => Ok(hmac::HMAC_SHA256),
            HmacDigest::Sha384 => Ok(hmac::HMAC_SHA384),
            HmacDigest::Sha512 => Ok(hmac::HMAC_SHA512),
        }
    }
}

struct HmacState {
    key: Option<hmac::Key>,
    message: Vec<u8>,
}

/// HMAC over one SHA-2 digest.
pub struct Hmac {
    digest: HmacDigest,
    algorithm: hmac::Algorithm,
    state: Slot<HmacState>,
}

impl Hmac {
    pub fn new(digest: HmacDigest) -> BridgeResult<Self> {
        Ok(Self {
            digest,
            algorithm: digest.algorithm()?,
            state: Slot::new(
                ResourceKind::Hmac,
                HmacState {
                    key: None,
                    message: Vec::new(),
                },
            ),
        })
    }

    pub fn set_key(&self, key: &[u8]) -> BridgeResult<()> {
        let key = hmac::Key::new(self.algorithm, key);
        self.state.with(|s| {
            s.key = Some(key);
            Ok(())
        })
    }

    pub fn set_message(&self, message: &[u8]) -> BridgeResult<()> {
        self.state.with(|s| {
            s.message = message.to_vec();
            Ok(())
        })
    }

    /// MAC of the current message.
    pub fn get_hmac(&self) -> BridgeResult<Vec<u8>> {
        self.state.with(|s| {
            let key = s.key.as_ref().ok_or_else(missing_key)?;
            Ok(hmac::sign(key, &s.message).as_ref().to_vec())
        })
    }

    /// Compare `tag` with the MAC of the current message in constant time.
    pub fn authenticate(&self, tag: &[u8]) -> BridgeResult<bool> {
        self.state.with(|s| {
            let key = s.key.as_ref().ok_or_else(missing_key)?;
            Ok(hmac::verify(key, &s.message, tag).is_ok())
        })
    }

    /// Fresh random key material of `bits` bits. The key is not installed.
    pub fn generate_key(&self, bits: usize) -> BridgeResult<Vec<u8>> {
        if bits == 0 || bits % 8 != 0 {
            return Err(BridgeError::bad_parameter(format!(
                "key size of {} bits is not a positive multiple of 8",
                bits
            )));
        }
        self.state.with(|_| random::next_bytes(bits / 8))
    }

    pub fn digest_length(&self) -> BridgeResult<usize> {
        self.state.with(|_| Ok(self.digest.output_len()))
    }
}

fn missing_key() -> BridgeError {
    BridgeError::NotInitialized("HMAC key has not been set".to_string())
}

impl NativeObject for Hmac {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Hmac
    }

    fn destroy(&self) {
        self.state.clear();
    }
}

impl Resource for Hmac {
    const KIND: ResourceKind = ResourceKind::Hmac;
}

// =============================================================================
// Dispatch
// =============================================================================

pub fn hmac_initialize(digest: HmacDigest) -> BridgeResult<Handle> {
    Ok(registry::register(Hmac::new(digest)?))
}

pub fn hmac_set_key(handle: Handle, key: &[u8]) -> BridgeResult<()> {
    registry::lookup_as::<Hmac>(handle)?.set_key(key)
}

pub fn hmac_set_message(handle: Handle, message: &[u8]) -> BridgeResult<()> {
    registry::lookup_as::<Hmac>(handle)?.set_message(message)
}

pub fn hmac_get_hmac(handle: Handle) -> BridgeResult<Vec<u8>> {
    registry::lookup_as::<Hmac>(handle)?.get_hmac()
}

pub fn hmac_authenticate(handle: Handle, tag: &[u8]) -> BridgeResult<bool> {
    registry::lookup_as::<Hmac>(handle)?.authenticate(tag)
}

pub fn hmac_generate_key(handle: Handle, bits: usize) -> BridgeResult<Vec<u8>> {
    registry::lookup_as::<Hmac>(handle)?.generate_key(bits)
}

pub fn hmac_digest_length(handle: Handle) -> BridgeResult<usize> {
    registry::lookup_as::<Hmac>(handle)?.digest_length()
}

pub fn hmac_dispose(handle: Handle) {
    registry::release(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2.
    const KEY: &[u8] = b"Jefe";
    const DATA: &[u8] = b"what do ya want for nothing?";

    #[test]
    fn test_rfc4231_case2() {
        let cases = [
            (
                HmacDigest::Sha256,
                "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843",
            ),
            (
                HmacDigest::Sha384,
                "af45d2e376484031617f78d2b58a6b1b9c7ef464f5a01b47e42ec3736322445e8e2240ca5e69e2c78b3239ecfab21649",
            ),
            (
                HmacDigest::Sha512,
                "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea2505549758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737",
            ),
        ];
        for (digest, expected) in cases {
            let h = hmac_initialize(digest).unwrap();
            hmac_set_key(h, KEY).unwrap();
            hmac_set_message(h, DATA).unwrap();
            let mac = hmac_get_hmac(h).unwrap();
            assert_eq!(hex::encode(&mac), expected);
            assert_eq!(hmac_digest_length(h).unwrap(), digest.output_len());
            assert!(hmac_authenticate(h, &mac).unwrap());
            hmac_dispose(h);
        }
    }

    #[test]
    fn test_authenticate_rejects_altered_tag() {
        let h = hmac_initialize(HmacDigest::Sha256).unwrap();
        hmac_set_key(h, KEY).unwrap();
        hmac_set_message(h, DATA).unwrap();
        let mut mac = hmac_get_hmac(h).unwrap();
        mac[31] ^= 0x80;
        assert!(!hmac_authenticate(h, &mac).unwrap());
        assert!(!hmac_authenticate(h, &mac[..16]).unwrap());
    }

    #[test]
    fn test_requires_key() {
        let h = hmac_initialize(HmacDigest::Sha512).unwrap();
        hmac_set_message(h, DATA).unwrap();
        assert!(matches!(
            hmac_get_hmac(h),
            Err(BridgeError::NotInitialized(_))
        ));
        assert!(matches!(
            hmac_authenticate(h, &[0u8; 64]),
            Err(BridgeError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_generate_key() {
        let h = hmac_initialize(HmacDigest::Sha256).unwrap();
        assert_eq!(hmac_generate_key(h, 256).unwrap().len(), 32);
        assert!(hmac_generate_key(h, 0).unwrap_err().is_bad_parameter());
        assert!(hmac_generate_key(h, 12).unwrap_err().is_bad_parameter());
        // Generating does not install a key.
        assert!(hmac_get_hmac(h).is_err());
    }

    #[test]
    fn test_sha224_unsupported() {
        assert_eq!(HmacDigest::from_bits(224).unwrap(), HmacDigest::Sha224);
        assert!(hmac_initialize(HmacDigest::Sha224)
            .unwrap_err()
            .is_bad_parameter());
        assert!(HmacDigest::from_bits(160).is_err());
    }
}
