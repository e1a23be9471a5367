//! AES block cipher.
//!
//! The engine only remembers its key size; the key itself is passed with each
//! block so that no key material stays behind a handle.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};

use super::Slot;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{self, Handle, NativeObject, Resource, ResourceKind};

macro_rules! run_block {
    ($cipher:ty, $key:expr, $block:expr, $encrypt:expr) => {{
        let cipher = <$cipher>::new_from_slice($key)
            .map_err(|e| BridgeError::bad_parameter(e.to_string()))?;
        if $encrypt {
            cipher.encrypt_block($block);
        } else {
            cipher.decrypt_block($block);
        }
    }};
}

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// AES engine bound to one key size.
pub struct AesCipher {
    key_size: Slot<usize>,
}

impl AesCipher {
    /// Create an engine for 16, 24 or 32 byte keys.
    pub fn new(key_size: usize) -> BridgeResult<Self> {
        match key_size {
            16 | 24 | 32 => Ok(Self {
                key_size: Slot::new(ResourceKind::Cipher, key_size),
            }),
            other => Err(BridgeError::bad_parameter(format!(
                "invalid AES key size {}",
                other
            ))),
        }
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> BridgeResult<usize> {
        self.key_size.with(|size| Ok(*size))
    }

    /// Encrypt one block.
    pub fn encrypt_block(&self, block: &[u8], key: &[u8]) -> BridgeResult<Vec<u8>> {
        self.transform(block, key, true)
    }

    /// Decrypt one block.
    pub fn decrypt_block(&self, block: &[u8], key: &[u8]) -> BridgeResult<Vec<u8>> {
        self.transform(block, key, false)
    }

    fn transform(&self, block: &[u8], key: &[u8], encrypt: bool) -> BridgeResult<Vec<u8>> {
        let size = self.key_size()?;
        if key.len() != size {
            return Err(BridgeError::bad_parameter(format!(
                "key is {} bytes, cipher expects {}",
                key.len(),
                size
            )));
        }
        if block.len() != BLOCK_SIZE {
            return Err(BridgeError::bad_parameter(format!(
                "block is {} bytes, expected {}",
                block.len(),
                BLOCK_SIZE
            )));
        }

        let mut out = Block::clone_from_slice(block);
        match size {
            16 => run_block!(Aes128, key, &mut out, encrypt),
            24 => run_block!(Aes192, key, &mut out, encrypt),
            _ => run_block!(Aes256, key, &mut out, encrypt),
        }
        Ok(out.to_vec())
    }
}

impl NativeObject for AesCipher {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Cipher
    }

    fn destroy(&self) {
        self.key_size.clear();
    }
}

impl Resource for AesCipher {
    const KIND: ResourceKind = ResourceKind::Cipher;
}

// =============================================================================
// Dispatch
// =============================================================================

/// Create an AES engine and return its handle.
pub fn aes_initialize(key_size: usize) -> BridgeResult<Handle> {
    let cipher = AesCipher::new(key_size)?;
    Ok(registry::register(cipher))
}

/// Encrypt a single block with `key`.
pub fn aes_encrypt(handle: Handle, block: &[u8], key: &[u8]) -> BridgeResult<Vec<u8>> {
    registry::lookup_as::<AesCipher>(handle)?.encrypt_block(block, key)
}

/// Decrypt a single block with `key`.
pub fn aes_decrypt(handle: Handle, block: &[u8], key: &[u8]) -> BridgeResult<Vec<u8>> {
    registry::lookup_as::<AesCipher>(handle)?.decrypt_block(block, key)
}

/// Block size of the engine.
pub fn aes_block_size(handle: Handle) -> BridgeResult<usize> {
    registry::lookup_as::<AesCipher>(handle)?;
    Ok(BLOCK_SIZE)
}

/// Key size of the engine.
pub fn aes_key_size(handle: Handle) -> BridgeResult<usize> {
    registry::lookup_as::<AesCipher>(handle)?.key_size()
}

/// Release the engine.
pub fn aes_dispose(handle: Handle) {
    registry::release(handle)
}
