//! Arbitrary-precision non-negative integers.
//!
//! Values are immutable once registered: every arithmetic operation registers
//! a new integer and returns its handle. Results that would be negative are
//! reported as arithmetic errors.

use std::cmp::Ordering;

use num_bigint_dig::prime::probably_prime;
use num_bigint_dig::{BigInt, BigUint, ModInverse, RandPrime, Sign, ToBigUint};
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};

use super::Slot;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{self, Handle, NativeObject, Resource, ResourceKind};

/// Miller-Rabin rounds used by primality checks.
const PRIME_ROUNDS: usize = 20;

/// Largest bit length `pow` and `shift_left` may produce.
pub const MAX_RESULT_BITS: u64 = 1 << 24;

/// Largest prime `bigint_probable_prime` will search for.
pub const MAX_PRIME_BITS: usize = 16384;

/// Registered integer value.
pub struct BigInteger {
    value: Slot<BigUint>,
}

impl BigInteger {
    pub fn new(value: BigUint) -> Self {
        Self {
            value: Slot::new(ResourceKind::BigInteger, value),
        }
    }

    /// Copy of the value.
    pub fn value(&self) -> BridgeResult<BigUint> {
        self.value.with(|v| Ok(v.clone()))
    }
}

impl NativeObject for BigInteger {
    fn kind(&self) -> ResourceKind {
        ResourceKind::BigInteger
    }

    fn destroy(&self) {
        self.value.clear();
    }
}

impl Resource for BigInteger {
    const KIND: ResourceKind = ResourceKind::BigInteger;
}

fn value_of(handle: Handle) -> BridgeResult<BigUint> {
    registry::lookup_as::<BigInteger>(handle)?.value()
}

fn register_value(value: BigUint) -> Handle {
    registry::register(BigInteger::new(value))
}

/// Resolve both operands before computing, then register the result.
fn binary(
    a: Handle,
    b: Handle,
    op: impl FnOnce(BigUint, BigUint) -> BridgeResult<BigUint>,
) -> BridgeResult<Handle> {
    let lhs = registry::lookup_as::<BigInteger>(a)?;
    let rhs = registry::lookup_as::<BigInteger>(b)?;
    let result = op(lhs.value()?, rhs.value()?)?;
    Ok(register_value(result))
}

fn arithmetic(msg: &str) -> BridgeError {
    BridgeError::Arithmetic(msg.to_string())
}

// =============================================================================
// Constructors
// =============================================================================

pub fn bigint_zero() -> Handle {
    register_value(BigUint::zero())
}

pub fn bigint_from_i64(value: i64) -> BridgeResult<Handle> {
    let value = u64::try_from(value).map_err(|_| arithmetic("negative value"))?;
    Ok(register_value(BigUint::from(value)))
}

/// Build from big-endian magnitude bytes.
pub fn bigint_from_bytes(bytes: &[u8]) -> Handle {
    register_value(BigUint::from_bytes_be(bytes))
}

pub fn bigint_from_decimal(text: &str) -> BridgeResult<Handle> {
    let value = BigUint::parse_bytes(text.trim().as_bytes(), 10)
        .ok_or_else(|| BridgeError::bad_parameter(format!("not a decimal integer: {:?}", text)))?;
    Ok(register_value(value))
}

pub fn bigint_copy(handle: Handle) -> BridgeResult<Handle> {
    Ok(register_value(value_of(handle)?))
}

/// Random probable prime of exactly `bits` bits.
pub fn bigint_probable_prime(bits: usize) -> BridgeResult<Handle> {
    if !(2..=MAX_PRIME_BITS).contains(&bits) {
        return Err(BridgeError::bad_parameter(format!(
            "cannot generate a {}-bit prime",
            bits
        )));
    }
    let mut rng = rand::thread_rng();
    let prime: BigUint = rng.gen_prime(bits);
    Ok(register_value(prime))
}

// =============================================================================
// Arithmetic
// =============================================================================

pub fn bigint_add(a: Handle, b: Handle) -> BridgeResult<Handle> {
    binary(a, b, |x, y| Ok(x + y))
}

pub fn bigint_subtract(a: Handle, b: Handle) -> BridgeResult<Handle> {
    binary(a, b, |x, y| {
        if x < y {
            return Err(arithmetic("subtraction result is negative"));
        }
        Ok(x - y)
    })
}

pub fn bigint_multiply(a: Handle, b: Handle) -> BridgeResult<Handle> {
    binary(a, b, |x, y| Ok(x * y))
}

pub fn bigint_and(a: Handle, b: Handle) -> BridgeResult<Handle> {
    binary(a, b, |x, y| Ok(x & y))
}

pub fn bigint_or(a: Handle, b: Handle) -> BridgeResult<Handle> {
    binary(a, b, |x, y| Ok(x | y))
}

pub fn bigint_gcd(a: Handle, b: Handle) -> BridgeResult<Handle> {
    binary(a, b, |x, y| Ok(x.gcd(&y)))
}

pub fn bigint_mod(a: Handle, m: Handle) -> BridgeResult<Handle> {
    binary(a, m, |x, m| {
        if m.is_zero() {
            return Err(arithmetic("modulus is zero"));
        }
        Ok(x % m)
    })
}

pub fn bigint_mod_inverse(a: Handle, m: Handle) -> BridgeResult<Handle> {
    binary(a, m, |x, m| mod_inverse(x, &m))
}

/// Inverse of `x` modulo `m`, in `[0, m)`.
pub(crate) fn mod_inverse(x: BigUint, m: &BigUint) -> BridgeResult<BigUint> {
    if m.is_zero() {
        return Err(arithmetic("modulus is zero"));
    }
    let inverse: BigInt = x
        .mod_inverse(m)
        .ok_or_else(|| arithmetic("value is not invertible"))?;
    let modulus = BigInt::from_biguint(Sign::Plus, m.clone());
    let normalized = ((inverse % &modulus) + &modulus) % &modulus;
    ToBigUint::to_biguint(&normalized).ok_or_else(|| arithmetic("value is not invertible"))
}

pub fn bigint_mod_pow(base: Handle, exponent: Handle, m: Handle) -> BridgeResult<Handle> {
    let b = registry::lookup_as::<BigInteger>(base)?;
    let e = registry::lookup_as::<BigInteger>(exponent)?;
    let m = registry::lookup_as::<BigInteger>(m)?;
    let modulus = m.value()?;
    if modulus.is_zero() {
        return Err(arithmetic("modulus is zero"));
    }
    let result = b.value()?.modpow(&e.value()?, &modulus);
    Ok(register_value(result))
}

pub fn bigint_pow(base: Handle, exponent: u32) -> BridgeResult<Handle> {
    let value = value_of(base)?;
    // 0 and 1 are fixed points; anything larger grows by its bit length per step.
    if value > BigUint::one() {
        check_result_bits(value.bits() as u64 * u64::from(exponent))?;
    }
    Ok(register_value(num_traits::pow(value, exponent as usize)))
}

pub fn bigint_shift_left(handle: Handle, bits: usize) -> BridgeResult<Handle> {
    let value = value_of(handle)?;
    if !value.is_zero() {
        check_result_bits((value.bits() as u64).saturating_add(bits as u64))?;
    }
    Ok(register_value(value << bits))
}

fn check_result_bits(bits: u64) -> BridgeResult<()> {
    if bits > MAX_RESULT_BITS {
        return Err(arithmetic(&format!(
            "result of {} bits exceeds the {}-bit limit",
            bits, MAX_RESULT_BITS
        )));
    }
    Ok(())
}

pub fn bigint_shift_right(handle: Handle, bits: usize) -> BridgeResult<Handle> {
    Ok(register_value(value_of(handle)? >> bits))
}

// =============================================================================
// Queries
// =============================================================================

pub fn bigint_bit_length(handle: Handle) -> BridgeResult<usize> {
    Ok(value_of(handle)?.bits())
}

/// -1, 0 or 1 as `a` is less than, equal to or greater than `b`.
pub fn bigint_compare_to(a: Handle, b: Handle) -> BridgeResult<i32> {
    let lhs = registry::lookup_as::<BigInteger>(a)?;
    let rhs = registry::lookup_as::<BigInteger>(b)?;
    Ok(match lhs.value()?.cmp(&rhs.value()?) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

/// Big-endian magnitude; zero encodes as a single zero byte.
pub fn bigint_encoded(handle: Handle) -> BridgeResult<Vec<u8>> {
    Ok(value_of(handle)?.to_bytes_be())
}

pub fn bigint_to_decimal(handle: Handle) -> BridgeResult<String> {
    Ok(value_of(handle)?.to_str_radix(10))
}

/// Low 8 bits of the value.
pub fn bigint_byte_value(handle: Handle) -> BridgeResult<u8> {
    let low = value_of(handle)? & BigUint::from(0xffu32);
    Ok(low.to_u8().unwrap_or(0))
}

pub fn bigint_is_probable_prime(handle: Handle) -> BridgeResult<bool> {
    let value = value_of(handle)?;
    if value <= BigUint::one() {
        return Ok(false);
    }
    Ok(probably_prime(&value, PRIME_ROUNDS))
}

pub fn bigint_dispose(handle: Handle) {
    registry::release(handle)
}
