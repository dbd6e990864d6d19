//! Noise_IKpsk2 primitives: BLAKE2s transcript hash/HMAC/KDF chain and the
//! ChaCha20-Poly1305 AEAD used for both handshake payloads and the
//! transport data channel, per spec.md section 4.4.

use blake2::{
    digest::{FixedOutput, Mac},
    Blake2s256, Blake2sMac256, Digest,
};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::error::{CageError, CageResult};

pub const CONSTRUCTION: &[u8] = b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s";
pub const IDENTIFIER: &[u8] = b"WireGuard v1 zx2c4 Jason@zx2c4.com";
pub const LABEL_MAC1: &[u8] = b"mac1----";
pub const LABEL_COOKIE: &[u8] = b"cookie--";

pub fn hash(data: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2s256::new();
    for d in data {
        Digest::update(&mut hasher, d);
    }
    hasher.finalize_fixed().into()
}

pub fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <Blake2sMac256 as Mac>::new_from_slice(key).expect("HMAC key of any length is valid");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `KDF1`: a single output derived from `hmac(hmac(key, input), 0x1)`.
pub fn kdf1(key: &[u8], input: &[u8]) -> [u8; 32] {
    let t0 = hmac(key, input);
    hmac(&t0, &[0x1])
}

/// `KDF2`: two chained outputs, as used for the handshake's running chain
/// key plus a derived temp key.
pub fn kdf2(key: &[u8], input: &[u8]) -> ([u8; 32], [u8; 32]) {
    let t0 = hmac(key, input);
    let t1 = hmac(&t0, &[0x1]);
    let mut t2_input = t1.to_vec();
    t2_input.push(0x2);
    let t2 = hmac(&t0, &t2_input);
    (t1, t2)
}

/// `KDF3`: three chained outputs, used when deriving the final
/// sending/receiving transport keys.
pub fn kdf3(key: &[u8], input: &[u8]) -> ([u8; 32], [u8; 32], [u8; 32]) {
    let t0 = hmac(key, input);
    let t1 = hmac(&t0, &[0x1]);
    let mut t2_input = t1.to_vec();
    t2_input.push(0x2);
    let t2 = hmac(&t0, &t2_input);
    let mut t3_input = t2.to_vec();
    t3_input.push(0x3);
    let t3 = hmac(&t0, &t3_input);
    (t1, t2, t3)
}

fn nonce_from_counter(counter: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[4..12].copy_from_slice(&counter.to_le_bytes());
    Nonce::clone_from_slice(&bytes)
}

pub fn aead_seal(key: &[u8; 32], counter: u64, plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = nonce_from_counter(counter);
    cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .expect("chacha20poly1305 encryption does not fail for bounded inputs")
}

pub fn aead_open(key: &[u8; 32], counter: u64, ciphertext: &[u8], aad: &[u8]) -> CageResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = nonce_from_counter(counter);
    cipher
        .decrypt(
            &nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CageError::Decode("AEAD authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = hash(&[b"hello", b"world"]);
        let b = hash(&[b"hello", b"world"]);
        assert_eq!(a, b);
    }

    #[test]
    fn kdf2_outputs_differ() {
        let (t1, t2) = kdf2(b"key", b"input");
        assert_ne!(t1, t2);
    }

    #[test]
    fn aead_round_trip() {
        let key = [7u8; 32];
        let sealed = aead_seal(&key, 0, b"hello world", b"aad");
        let opened = aead_open(&key, 0, &sealed, b"aad").unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn aead_rejects_tampered_ciphertext() {
        let key = [7u8; 32];
        let mut sealed = aead_seal(&key, 0, b"hello world", b"aad");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(aead_open(&key, 0, &sealed, b"aad").is_err());
    }

    #[test]
    fn aead_rejects_wrong_counter() {
        let key = [7u8; 32];
        let sealed = aead_seal(&key, 0, b"hello world", b"aad");
        assert!(aead_open(&key, 1, &sealed, b"aad").is_err());
    }
}
