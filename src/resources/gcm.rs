//! AES-GCM mode over a registered AES engine.
//!
//! The mode holds a reference to the engine it was built from; the key size
//! comes from the engine and the key itself is passed per call, as for the
//! raw block operations.
//!
//! Two tag layouts are supported:
//!
//! - **Appended**: `encrypt` returns `ciphertext || tag` and `decrypt`
//!   expects the same layout.
//! - **Detached**: the tag from `encrypt` is kept on the mode and read with
//!   `gcm_tag`; `decrypt` checks against the tag set with `gcm_set_tag`.

use std::sync::Arc;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM, NONCE_LEN};

use super::cipher::AesCipher;
use super::Slot;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{self, Handle, NativeObject, Resource, ResourceKind};

/// Authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// IV length in bytes.
pub const IV_LEN: usize = NONCE_LEN;

struct GcmState {
    cipher: Arc<AesCipher>,
    append_tag: bool,
    iv: Option<[u8; IV_LEN]>,
    aad: Vec<u8>,
    tag: Option<[u8; TAG_LEN]>,
}

impl GcmState {
    fn key(&self, key: &[u8]) -> BridgeResult<LessSafeKey> {
        let algorithm = match self.cipher.key_size()? {
            16 => &AES_128_GCM,
            32 => &AES_256_GCM,
            other => {
                return Err(BridgeError::bad_parameter(format!(
                    "GCM does not support {}-bit AES",
                    other * 8
                )))
            }
        };
        if key.len() != algorithm.key_len() {
            return Err(BridgeError::bad_parameter(format!(
                "key is {} bytes, cipher expects {}",
                key.len(),
                algorithm.key_len()
            )));
        }
        let unbound = UnboundKey::new(algorithm, key)
            .map_err(|_| BridgeError::bad_parameter("rejected GCM key"))?;
        Ok(LessSafeKey::new(unbound))
    }

    fn nonce(&self) -> BridgeResult<Nonce> {
        let iv = self
            .iv
            .ok_or_else(|| BridgeError::NotInitialized("GCM IV has not been set".to_string()))?;
        Ok(Nonce::assume_unique_for_key(iv))
    }
}

/// Galois/counter mode bound to an AES engine.
pub struct GcmMode {
    state: Slot<GcmState>,
}

impl GcmMode {
    /// Bind a mode to `cipher`.
    pub fn new(cipher: Arc<AesCipher>, append_tag: bool) -> Self {
        Self {
            state: Slot::new(
                ResourceKind::CipherMode,
                GcmState {
                    cipher,
                    append_tag,
                    iv: None,
                    aad: Vec::new(),
                    tag: None,
                },
            ),
        }
    }

    /// Set the 96-bit IV.
    pub fn set_iv(&self, iv: &[u8]) -> BridgeResult<()> {
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| {
            BridgeError::bad_parameter(format!("IV is {} bytes, expected {}", iv.len(), IV_LEN))
        })?;
        self.state.with(|s| {
            s.iv = Some(iv);
            Ok(())
        })
    }

    /// Set additional authenticated data for the following operations.
    pub fn set_authentication_data(&self, aad: &[u8]) -> BridgeResult<()> {
        self.state.with(|s| {
            s.aad = aad.to_vec();
            Ok(())
        })
    }

    /// Set the tag checked by a detached-tag decrypt.
    pub fn set_tag(&self, tag: &[u8]) -> BridgeResult<()> {
        let tag: [u8; TAG_LEN] = tag.try_into().map_err(|_| {
            BridgeError::bad_parameter(format!("tag is {} bytes, expected {}", tag.len(), TAG_LEN))
        })?;
        self.state.with(|s| {
            s.tag = Some(tag);
            Ok(())
        })
    }

    /// Tag produced by the last encrypt (or set explicitly).
    pub fn tag(&self) -> BridgeResult<Vec<u8>> {
        self.state.with(|s| {
            s.tag
                .map(|t| t.to_vec())
                .ok_or_else(|| BridgeError::NotInitialized("no GCM tag available".to_string()))
        })
    }

    /// Encrypt and authenticate `plaintext`.
    pub fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> BridgeResult<Vec<u8>> {
        self.state.with(|s| {
            let sealing = s.key(key)?;
            let nonce = s.nonce()?;
            let mut out = plaintext.to_vec();
            let tag = sealing
                .seal_in_place_separate_tag(nonce, Aad::from(s.aad.as_slice()), &mut out)
                .map_err(|_| BridgeError::bad_parameter("plaintext too long for GCM"))?;

            if s.append_tag {
                out.extend_from_slice(tag.as_ref());
            } else {
                let mut detached = [0u8; TAG_LEN];
                detached.copy_from_slice(tag.as_ref());
                s.tag = Some(detached);
            }
            Ok(out)
        })
    }

    /// Check and decrypt `ciphertext`.
    pub fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> BridgeResult<Vec<u8>> {
        self.state.with(|s| {
            let opening = s.key(key)?;
            let nonce = s.nonce()?;

            let mut in_out = if s.append_tag {
                if ciphertext.len() < TAG_LEN {
                    return Err(BridgeError::bad_parameter(format!(
                        "ciphertext of {} bytes cannot hold a tag",
                        ciphertext.len()
                    )));
                }
                ciphertext.to_vec()
            } else {
                let tag = s.tag.ok_or_else(|| {
                    BridgeError::NotInitialized("GCM tag has not been set".to_string())
                })?;
                let mut joined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
                joined.extend_from_slice(ciphertext);
                joined.extend_from_slice(&tag);
                joined
            };

            let plaintext = opening
                .open_in_place(nonce, Aad::from(s.aad.as_slice()), &mut in_out)
                .map_err(|_| BridgeError::Authentication("GCM tag mismatch".to_string()))?;
            Ok(plaintext.to_vec())
        })
    }
}

impl NativeObject for GcmMode {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CipherMode
    }

    fn destroy(&self) {
        self.state.clear();
    }
}

impl Resource for GcmMode {
    const KIND: ResourceKind = ResourceKind::CipherMode;
}

// =============================================================================
// Dispatch
// =============================================================================

/// Build a GCM mode over the AES engine at `cipher_handle`.
pub fn gcm_initialize(cipher_handle: Handle, append_tag: bool) -> BridgeResult<Handle> {
    let cipher = registry::lookup_as::<AesCipher>(cipher_handle)?;
    Ok(registry::register(GcmMode::new(cipher, append_tag)))
}

pub fn gcm_set_iv(handle: Handle, iv: &[u8]) -> BridgeResult<()> {
    registry::lookup_as::<GcmMode>(handle)?.set_iv(iv)
}

pub fn gcm_set_authentication_data(handle: Handle, aad: &[u8]) -> BridgeResult<()> {
    registry::lookup_as::<GcmMode>(handle)?.set_authentication_data(aad)
}

pub fn gcm_set_tag(handle: Handle, tag: &[u8]) -> BridgeResult<()> {
    registry::lookup_as::<GcmMode>(handle)?.set_tag(tag)
}

pub fn gcm_tag(handle: Handle) -> BridgeResult<Vec<u8>> {
    registry::lookup_as::<GcmMode>(handle)?.tag()
}

pub fn gcm_encrypt(handle: Handle, plaintext: &[u8], key: &[u8]) -> BridgeResult<Vec<u8>> {
    registry::lookup_as::<GcmMode>(handle)?.encrypt(plaintext, key)
}

pub fn gcm_decrypt(handle: Handle, ciphertext: &[u8], key: &[u8]) -> BridgeResult<Vec<u8>> {
    registry::lookup_as::<GcmMode>(handle)?.decrypt(ciphertext, key)
}

pub fn gcm_dispose(handle: Handle) {
    registry::release(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::cipher::{aes_dispose, aes_initialize};
    use crate::resources::hmac::{hmac_dispose, hmac_initialize, HmacDigest};

    #[test]
    fn test_zero_key_vector() {
        // McGrew-Viega GCM test case 2: zero key, zero IV, one zero block.
        let aes = aes_initialize(16).unwrap();
        let gcm = gcm_initialize(aes, true).unwrap();
        gcm_set_iv(gcm, &[0u8; 12]).unwrap();

        let out = gcm_encrypt(gcm, &[0u8; 16], &[0u8; 16]).unwrap();
        assert_eq!(
            hex::encode(&out),
            "0388dace60b6a392f328c2b971b2fe78ab6e47d42cec13bdf53a67b21257bddf"
        );
        assert_eq!(gcm_decrypt(gcm, &out, &[0u8; 16]).unwrap(), vec![0u8; 16]);

        gcm_dispose(gcm);
        aes_dispose(aes);
    }

    #[test]
    fn test_detached_tag() {
        let key = [7u8; 32];
        let aes = aes_initialize(32).unwrap();
        let gcm = gcm_initialize(aes, false).unwrap();
        gcm_set_iv(gcm, &[1u8; 12]).unwrap();
        gcm_set_authentication_data(gcm, b"header").unwrap();

        let ct = gcm_encrypt(gcm, b"attack at dawn", &key).unwrap();
        assert_eq!(ct.len(), 14);
        let tag = gcm_tag(gcm).unwrap();
        assert_eq!(tag.len(), TAG_LEN);

        // A fresh mode needs the tag handed over explicitly.
        let other = gcm_initialize(aes, false).unwrap();
        gcm_set_iv(other, &[1u8; 12]).unwrap();
        gcm_set_authentication_data(other, b"header").unwrap();
        assert!(matches!(
            gcm_decrypt(other, &ct, &key),
            Err(BridgeError::NotInitialized(_))
        ));
        gcm_set_tag(other, &tag).unwrap();
        assert_eq!(gcm_decrypt(other, &ct, &key).unwrap(), b"attack at dawn");
    }

    #[test]
    fn test_tampering_fails_authentication() {
        let key = [3u8; 16];
        let aes = aes_initialize(16).unwrap();
        let gcm = gcm_initialize(aes, true).unwrap();
        gcm_set_iv(gcm, &[9u8; 12]).unwrap();
        gcm_set_authentication_data(gcm, b"aad").unwrap();

        let mut ct = gcm_encrypt(gcm, b"payload", &key).unwrap();
        ct[0] ^= 1;
        assert!(gcm_decrypt(gcm, &ct, &key).unwrap_err().is_authentication());

        ct[0] ^= 1;
        gcm_set_authentication_data(gcm, b"other").unwrap();
        assert!(gcm_decrypt(gcm, &ct, &key).unwrap_err().is_authentication());
    }

    #[test]
    fn test_missing_iv_and_bad_sizes() {
        let aes = aes_initialize(16).unwrap();
        let gcm = gcm_initialize(aes, true).unwrap();
        assert!(matches!(
            gcm_encrypt(gcm, b"x", &[0u8; 16]),
            Err(BridgeError::NotInitialized(_))
        ));
        assert!(gcm_set_iv(gcm, &[0u8; 16]).unwrap_err().is_bad_parameter());

        let aes192 = aes_initialize(24).unwrap();
        let gcm192 = gcm_initialize(aes192, true).unwrap();
        gcm_set_iv(gcm192, &[0u8; 12]).unwrap();
        assert!(gcm_encrypt(gcm192, b"x", &[0u8; 24])
            .unwrap_err()
            .is_bad_parameter());
    }

    #[test]
    fn test_initialize_with_wrong_kind() {
        let hmac = hmac_initialize(HmacDigest::Sha256).unwrap();
        let err = gcm_initialize(hmac, true).unwrap_err();
        assert!(err.is_invalid_state());
        hmac_dispose(hmac);
    }

    #[test]
    fn test_engine_released_under_mode() {
        let aes = aes_initialize(16).unwrap();
        let gcm = gcm_initialize(aes, true).unwrap();
        gcm_set_iv(gcm, &[0u8; 12]).unwrap();
        aes_dispose(aes);

        let err = gcm_encrypt(gcm, b"x", &[0u8; 16]).unwrap_err();
        assert!(matches!(err, BridgeError::Released(ResourceKind::Cipher)));
    }
}
