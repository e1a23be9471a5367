//! Integration tests for resource dispatch
//!
//! These tests go through the handle-based API end to end, including host
//! value conversion and exception mapping, and check that handles of one
//! kind are refused by operations of another.

use std::sync::Arc;
use std::thread;

use handlebridge::host::{ByteArrayCodec, ExceptionKind, HostException, StringCodec};
use handlebridge::registry::{self, NativeObject, ResourceKind};
use handlebridge::resources::bigint::*;
use handlebridge::resources::cipher::*;
use handlebridge::resources::gcm::*;
use handlebridge::resources::hmac::*;
use handlebridge::resources::random::next_bytes;
use handlebridge::resources::rsa_keygen::*;
use handlebridge::BridgeError;

fn exception(err: BridgeError) -> ExceptionKind {
    HostException::from(err).kind
}

// === AES / GCM ===

#[test]
fn test_gcm_round_trip_with_host_arrays() {
    let key = next_bytes(32).unwrap();
    let iv = next_bytes(12).unwrap();

    // Host hands over signed arrays.
    let host_plaintext = ByteArrayCodec::to_host(b"a message from the host side");
    let plaintext = ByteArrayCodec::to_native(&host_plaintext);

    let aes = aes_initialize(32).unwrap();
    let gcm = gcm_initialize(aes, true).unwrap();
    gcm_set_iv(gcm, &iv).unwrap();
    gcm_set_authentication_data(gcm, b"v1").unwrap();

    let sealed = gcm_encrypt(gcm, &plaintext, &key).unwrap();
    assert_eq!(sealed.len(), plaintext.len() + TAG_LEN);

    let opened = gcm_decrypt(gcm, &sealed, &key).unwrap();
    assert_eq!(ByteArrayCodec::to_host(&opened), host_plaintext);

    let mut forged = sealed.clone();
    let last = forged.len() - 1;
    forged[last] ^= 0x01;
    assert_eq!(
        exception(gcm_decrypt(gcm, &forged, &key).unwrap_err()),
        ExceptionKind::Authentication
    );

    gcm_dispose(gcm);
    aes_dispose(aes);
}

#[test]
fn test_block_cipher_known_vector() {
    // NIST SP 800-38A F.1.1 (ECB-AES128), first block.
    let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
    let block = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
    let aes = aes_initialize(16).unwrap();
    let out = aes_encrypt(aes, &block, &key).unwrap();
    assert_eq!(hex::encode(out), "3ad77bb40d7a3660a89ecaf32466ef97");
    aes_dispose(aes);
}

// === Kind checks across modules ===

#[test]
fn test_handles_are_not_interchangeable() {
    let aes = aes_initialize(16).unwrap();
    let mac = hmac_initialize(HmacDigest::Sha256).unwrap();
    let num = bigint_from_i64(12).unwrap();
    let gen = rsa_keygen_initialize();

    assert!(hmac_set_key(aes, b"k").unwrap_err().is_invalid_state());
    assert!(aes_key_size(mac).unwrap_err().is_invalid_state());
    assert!(bigint_add(num, mac).unwrap_err().is_invalid_state());
    assert!(rsa_keygen_set_key_size(num, 1024)
        .unwrap_err()
        .is_invalid_state());
    assert!(gcm_initialize(gen, true).unwrap_err().is_invalid_state());

    let err = bigint_to_decimal(aes).unwrap_err();
    match &err {
        BridgeError::WrongKind {
            expected, found, ..
        } => {
            assert_eq!(*expected, ResourceKind::BigInteger);
            assert_eq!(*found, ResourceKind::Cipher);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(exception(err), ExceptionKind::IllegalState);

    // A failed call leaves both resources usable.
    assert_eq!(aes_key_size(aes).unwrap(), 16);
    assert_eq!(bigint_to_decimal(num).unwrap(), "12");

    for h in [aes, mac, num, gen] {
        registry::release(h);
    }
}

#[test]
fn test_released_handles_raise_illegal_state() {
    let mac = hmac_initialize(HmacDigest::Sha384).unwrap();
    hmac_dispose(mac);
    hmac_dispose(mac);
    assert_eq!(
        exception(hmac_digest_length(mac).unwrap_err()),
        ExceptionKind::IllegalState
    );
}

#[test]
fn test_release_during_call_reports_released() {
    let mac = hmac_initialize(HmacDigest::Sha256).unwrap();
    // A binding that resolved the handle just before a concurrent release.
    let resolved = registry::lookup_as::<Hmac>(mac).unwrap();
    let releaser = thread::spawn(move || registry::release(mac));
    releaser.join().unwrap();

    let err = resolved.set_key(b"late").unwrap_err();
    assert!(matches!(err, BridgeError::Released(ResourceKind::Hmac)));
    assert_eq!(exception(err), ExceptionKind::IllegalState);
}

// === Big integers ===

#[test]
fn test_bigint_from_host_string() {
    let text = StringCodec::to_host("340282366920938463463374607431768211456");
    let decimal = StringCodec::to_native(&text).unwrap();
    let big = bigint_from_decimal(&decimal).unwrap();
    assert_eq!(bigint_bit_length(big).unwrap(), 129);

    let one = bigint_from_i64(1).unwrap();
    let below = bigint_subtract(big, one).unwrap();
    assert_eq!(bigint_bit_length(below).unwrap(), 128);
    assert_eq!(bigint_encoded(below).unwrap(), vec![0xff; 16]);

    let back = StringCodec::to_host(&bigint_to_decimal(big).unwrap());
    assert_eq!(back, text);

    assert_eq!(
        exception(bigint_subtract(one, big).unwrap_err()),
        ExceptionKind::Arithmetic
    );
}

#[test]
fn test_bigint_results_are_new_handles() {
    let a = bigint_from_i64(20).unwrap();
    let b = bigint_from_i64(22).unwrap();
    let sum = bigint_add(a, b).unwrap();
    assert!(sum > b);
    bigint_dispose(a);
    bigint_dispose(b);
    // The result does not depend on its operands staying alive.
    assert_eq!(bigint_to_decimal(sum).unwrap(), "42");
}

#[test]
fn test_oversized_requests_are_reported() {
    let one = bigint_from_i64(1).unwrap();
    let seven = bigint_from_i64(7).unwrap();

    let err = bigint_shift_left(one, usize::MAX).unwrap_err();
    assert_eq!(exception(err), ExceptionKind::Arithmetic);
    let err = bigint_pow(seven, u32::MAX).unwrap_err();
    assert_eq!(exception(err), ExceptionKind::Arithmetic);
    let err = next_bytes(usize::MAX).unwrap_err();
    assert_eq!(exception(err), ExceptionKind::BadParameter);

    let mac = hmac_initialize(HmacDigest::Sha256).unwrap();
    let err = hmac_generate_key(mac, usize::MAX - 7).unwrap_err();
    assert_eq!(exception(err), ExceptionKind::BadParameter);

    // The process is still usable afterwards.
    let shifted = bigint_shift_left(one, 64).unwrap();
    assert_eq!(bigint_to_decimal(shifted).unwrap(), "18446744073709551616");
    hmac_dispose(mac);
}

// === RSA ===

#[test]
fn test_rsa_components_are_consistent() {
    let gen = rsa_keygen_initialize();
    rsa_keygen_set_key_size(gen, 768).unwrap();
    let pair = rsa_keygen_generate(gen).unwrap();

    assert_eq!(bigint_bit_length(pair.n).unwrap(), 768);
    assert!(bigint_is_probable_prime(pair.p).unwrap());
    assert!(bigint_is_probable_prime(pair.q).unwrap());

    // e * d = 1 mod lcm(p-1, q-1) implies e * d = 1 mod (p-1).
    let one = bigint_from_i64(1).unwrap();
    let p1 = bigint_subtract(pair.p, one).unwrap();
    let ed = bigint_multiply(pair.e, pair.d).unwrap();
    assert_eq!(bigint_to_decimal(bigint_mod(ed, p1).unwrap()).unwrap(), "1");

    // dP = d mod (p-1)
    let dp = bigint_mod(pair.d, p1).unwrap();
    assert_eq!(bigint_compare_to(dp, pair.dp).unwrap(), 0);

    pair.dispose();
    assert!(bigint_to_decimal(pair.n).unwrap_err().is_invalid_state());
    rsa_keygen_dispose(gen);
}

// === Custom native objects ===

struct Counter(std::sync::atomic::AtomicUsize);

impl NativeObject for Counter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Other
    }

    fn destroy(&self) {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[test]
fn test_embedder_objects_share_the_handle_space() {
    let aes = aes_initialize(16).unwrap();
    let counter = registry::register(Counter(Default::default()));
    assert!(counter > aes);

    let held: Arc<dyn NativeObject> = registry::lookup(counter).unwrap();
    assert_eq!(held.kind(), ResourceKind::Other);
    registry::release(counter);
    registry::release(counter);
    drop(held);

    assert!(aes_key_size(counter).unwrap_err().is_invalid_state());
    aes_dispose(aes);
}
