//! RSA key pair generation.
//!
//! A generated key is handed back as a set of big-integer handles, one per
//! component, so the host can rebuild public and private keys from them.

use num_bigint_dig::BigUint;
use num_traits::One;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;

use super::bigint::{mod_inverse, BigInteger};
use super::Slot;
use crate::config;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{self, Handle, NativeObject, Resource, ResourceKind};

/// Smallest modulus the generator accepts.
pub const MIN_KEY_SIZE: usize = 512;

/// Handles to the components of a generated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RsaKeyPair {
    pub n: Handle,
    pub e: Handle,
    pub p: Handle,
    pub q: Handle,
    pub d: Handle,
    pub dp: Handle,
    pub dq: Handle,
    pub qinv: Handle,
}

impl RsaKeyPair {
    /// Every handle in the pair.
    pub fn handles(&self) -> [Handle; 8] {
        [
            self.n, self.e, self.p, self.q, self.d, self.dp, self.dq, self.qinv,
        ]
    }

    /// Release every component.
    pub fn dispose(&self) {
        for handle in self.handles() {
            registry::release(handle);
        }
    }
}

/// Generator holding an optional modulus size.
pub struct RsaKeyPairGenerator {
    key_size: Slot<Option<usize>>,
}

impl RsaKeyPairGenerator {
    pub fn new() -> Self {
        Self {
            key_size: Slot::new(ResourceKind::KeyPairGenerator, None),
        }
    }

    pub fn set_key_size(&self, bits: usize) -> BridgeResult<()> {
        if bits < MIN_KEY_SIZE || bits % 8 != 0 {
            return Err(BridgeError::bad_parameter(format!(
                "RSA key size {} must be at least {} and a multiple of 8",
                bits, MIN_KEY_SIZE
            )));
        }
        self.key_size.with(|size| {
            *size = Some(bits);
            Ok(())
        })
    }

    /// Size the next key will have.
    pub fn key_size(&self) -> BridgeResult<usize> {
        self.key_size
            .with(|size| Ok(size.unwrap_or(config::current().rsa.default_key_size)))
    }

    /// Generate a key and register its components.
    pub fn generate(&self) -> BridgeResult<RsaKeyPair> {
        let bits = self.key_size()?;
        log::debug!("generating {}-bit RSA key", bits);

        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| BridgeError::bad_parameter(format!("RSA key generation failed: {}", e)))?;

        let primes = key.primes();
        if primes.len() != 2 {
            return Err(BridgeError::bad_parameter(format!(
                "expected two primes, got {}",
                primes.len()
            )));
        }

        let n = convert(key.n());
        let e = convert(key.e());
        let d = convert(key.d());
        let p = convert(&primes[0]);
        let q = convert(&primes[1]);

        let one = BigUint::one();
        let dp = &d % (&p - &one);
        let dq = &d % (&q - &one);
        let qinv = mod_inverse(q.clone(), &p)?;

        Ok(RsaKeyPair {
            n: register(n),
            e: register(e),
            p: register(p),
            q: register(q),
            d: register(d),
            dp: register(dp),
            dq: register(dq),
            qinv: register(qinv),
        })
    }
}

impl Default for RsaKeyPairGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Go through bytes so this module does not depend on the version of the
/// integer type `rsa` exposes.
fn convert(value: &rsa::BigUint) -> BigUint {
    BigUint::from_bytes_be(&value.to_bytes_be())
}

fn register(value: BigUint) -> Handle {
    registry::register(BigInteger::new(value))
}

impl NativeObject for RsaKeyPairGenerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::KeyPairGenerator
    }

    fn destroy(&self) {
        self.key_size.clear();
    }
}

impl Resource for RsaKeyPairGenerator {
    const KIND: ResourceKind = ResourceKind::KeyPairGenerator;
}

// =============================================================================
// Dispatch
// =============================================================================

pub fn rsa_keygen_initialize() -> Handle {
    registry::register(RsaKeyPairGenerator::new())
}

pub fn rsa_keygen_set_key_size(handle: Handle, bits: usize) -> BridgeResult<()> {
    registry::lookup_as::<RsaKeyPairGenerator>(handle)?.set_key_size(bits)
}

pub fn rsa_keygen_generate(handle: Handle) -> BridgeResult<RsaKeyPair> {
    registry::lookup_as::<RsaKeyPairGenerator>(handle)?.generate()
}

pub fn rsa_keygen_dispose(handle: Handle) {
    registry::release(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::bigint::{
        bigint_compare_to, bigint_from_i64, bigint_mod_pow, bigint_multiply, bigint_to_decimal,
    };

    #[test]
    fn test_generate_small_key() {
        let gen = rsa_keygen_initialize();
        rsa_keygen_set_key_size(gen, 512).unwrap();
        let pair = rsa_keygen_generate(gen).unwrap();

        // n = p * q
        let pq = bigint_multiply(pair.p, pair.q).unwrap();
        assert_eq!(bigint_compare_to(pq, pair.n).unwrap(), 0);
        assert_eq!(bigint_to_decimal(pair.e).unwrap(), "65537");

        // (m^e)^d = m mod n
        let m = bigint_from_i64(42).unwrap();
        let c = bigint_mod_pow(m, pair.e, pair.n).unwrap();
        let back = bigint_mod_pow(c, pair.d, pair.n).unwrap();
        assert_eq!(bigint_to_decimal(back).unwrap(), "42");

        // CRT: m = c^dq mod q recombined via qinv
        let mq = bigint_mod_pow(c, pair.dq, pair.q).unwrap();
        let mp = bigint_mod_pow(c, pair.dp, pair.p).unwrap();
        assert_eq!(bigint_to_decimal(mp).unwrap(), "42");
        assert_eq!(bigint_to_decimal(mq).unwrap(), "42");

        let handles = pair.handles();
        let unique: std::collections::HashSet<_> = handles.iter().collect();
        assert_eq!(unique.len(), 8);
        pair.dispose();
        rsa_keygen_dispose(gen);
    }

    #[test]
    fn test_qinv() {
        let gen = RsaKeyPairGenerator::new();
        gen.set_key_size(512).unwrap();
        let pair = gen.generate().unwrap();
        let q = registry::lookup_as::<BigInteger>(pair.q).unwrap().value().unwrap();
        let p = registry::lookup_as::<BigInteger>(pair.p).unwrap().value().unwrap();
        let qinv = registry::lookup_as::<BigInteger>(pair.qinv)
            .unwrap()
            .value()
            .unwrap();
        assert_eq!((q * qinv) % p, BigUint::one());
    }

    #[test]
    fn test_key_size_rules() {
        let gen = rsa_keygen_initialize();
        assert!(rsa_keygen_set_key_size(gen, 256).unwrap_err().is_bad_parameter());
        assert!(rsa_keygen_set_key_size(gen, 1001).unwrap_err().is_bad_parameter());
        let generator = registry::lookup_as::<RsaKeyPairGenerator>(gen).unwrap();
        assert_eq!(
            generator.key_size().unwrap(),
            config::current().rsa.default_key_size
        );
        rsa_keygen_set_key_size(gen, 1024).unwrap();
        assert_eq!(generator.key_size().unwrap(), 1024);
    }
}
