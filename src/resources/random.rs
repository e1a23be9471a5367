//! Secure random bytes.

use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{BridgeError, BridgeResult};

/// Largest request [`next_bytes`] serves.
pub const MAX_RANDOM_BYTES: usize = 1 << 20;

/// Fill a new buffer of `len` bytes from the OS generator.
pub fn next_bytes(len: usize) -> BridgeResult<Vec<u8>> {
    if len > MAX_RANDOM_BYTES {
        return Err(BridgeError::bad_parameter(format!(
            "cannot produce {} random bytes (limit {})",
            len, MAX_RANDOM_BYTES
        )));
    }
    let mut buf = vec![0u8; len];
    fill(&mut buf)?;
    Ok(buf)
}

pub(crate) fn fill(buf: &mut [u8]) -> BridgeResult<()> {
    SystemRandom::new().fill(buf).map_err(|_| {
        BridgeError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "system random source failed",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_bytes() {
        let a = next_bytes(32).unwrap();
        let b = next_bytes(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(next_bytes(0).unwrap().is_empty());
    }

    #[test]
    fn test_next_bytes_limit() {
        assert_eq!(next_bytes(MAX_RANDOM_BYTES).unwrap().len(), MAX_RANDOM_BYTES);
        assert!(next_bytes(MAX_RANDOM_BYTES + 1).unwrap_err().is_bad_parameter());
        assert!(next_bytes(usize::MAX).unwrap_err().is_bad_parameter());
    }
}
