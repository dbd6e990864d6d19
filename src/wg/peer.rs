//! The single remote peer (cage server) a client dials, per spec.md section
//! 4.4: "exactly one configured peer; `inject`/`deliver` is the data-plane
//! contract between the WireGuard layer and the virtual network stack."
//!
//! Implements the Noise_IKpsk2 initiator side only — this crate never acts
//! as a WireGuard responder, matching the client-data-plane scope.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::error::{CageError, CageResult};

use super::cookie::{compute_mac1, mac1_key, ReceivedCookie};
use super::crypto::{aead_open, aead_seal, hash, kdf1, kdf2, kdf3, CONSTRUCTION, IDENTIFIER};
use super::keys::{EphemeralSecret, PresharedKey, PrivateKey, PublicKeyBytes};
use super::messages::{
    HandshakeInitiation, HandshakeResponse, TransportHeader, HANDSHAKE_RESPONSE_LEN,
    TRANSPORT_HEADER_LEN,
};
use super::session::Session;
use super::timers::{PeerState, PeerTimers, COOKIE_TIMEOUT};

/// Accumulated Noise transcript state while an initiation is in flight,
/// discarded once either a response arrives or the attempt times out.
struct PendingHandshake {
    local_index: u32,
    ephemeral: EphemeralSecret,
    ephemeral_public: PublicKeyBytes,
    chaining_key: [u8; 32],
    hash: [u8; 32],
}

pub struct Peer {
    local_private: PrivateKey,
    remote_static: PublicKeyBytes,
    psk: PresharedKey,
    pub endpoint: SocketAddr,
    pending: Option<PendingHandshake>,
    session: Option<Session>,
    pub timers: PeerTimers,
    cookie: Option<ReceivedCookie>,
}

impl Peer {
    pub fn new(
        local_private: PrivateKey,
        remote_static: PublicKeyBytes,
        psk: PresharedKey,
        endpoint: SocketAddr,
    ) -> Self {
        Peer {
            local_private,
            remote_static,
            psk,
            endpoint,
            pending: None,
            session: None,
            timers: PeerTimers::new(),
            cookie: None,
        }
    }

    pub fn is_established(&self) -> bool {
        self.session.is_some() && self.timers.state == PeerState::Transport
    }

    /// Builds a fresh handshake initiation message, starting the timeout
    /// clock for a retry/give-up decision by the caller's tick loop.
    pub fn initiate_handshake(&mut self, now: Instant) -> [u8; super::messages::HANDSHAKE_INITIATION_LEN] {
        let local_index = random_index();
        let ephemeral = EphemeralSecret::random();
        let ephemeral_public = ephemeral.public_key();

        let ci = hash(&[CONSTRUCTION]);
        let mut hi = hash(&[&ci, IDENTIFIER]);
        hi = hash(&[&hi, &self.remote_static.0]);

        let ci = kdf1(&ci, &ephemeral_public.0);
        hi = hash(&[&hi, &ephemeral_public.0]);

        let dh1 = ephemeral.diffie_hellman(&self.remote_static);
        let (ci, key1) = kdf2(&ci, &dh1);
        let local_static_public = self.local_private.public_key();
        let encrypted_static_vec = aead_seal(&key1, 0, &local_static_public.0, &hi);
        let mut encrypted_static = [0u8; 48];
        encrypted_static.copy_from_slice(&encrypted_static_vec);
        hi = hash(&[&hi, &encrypted_static]);

        let dh2 = self.local_private.diffie_hellman(&self.remote_static);
        let (ci, key2) = kdf2(&ci, &dh2);
        let timestamp = tai64n_now();
        let encrypted_timestamp_vec = aead_seal(&key2, 0, &timestamp, &hi);
        let mut encrypted_timestamp = [0u8; 28];
        encrypted_timestamp.copy_from_slice(&encrypted_timestamp_vec);
        hi = hash(&[&hi, &encrypted_timestamp]);

        let mut msg = HandshakeInitiation {
            sender_index: local_index,
            unencrypted_ephemeral: ephemeral_public.0,
            encrypted_static,
            encrypted_timestamp,
            mac1: [0u8; 16],
            mac2: [0u8; 16],
        };
        let partial = msg.encode();
        let mac1_k = mac1_key(&self.remote_static);
        msg.mac1 = compute_mac1(&mac1_k, HandshakeInitiation::mac_input(&partial));
        if let Some(cookie) = self
            .cookie
            .as_ref()
            .filter(|c| c.is_valid(now, COOKIE_TIMEOUT))
        {
            let with_mac1 = {
                let mut b = partial;
                b[116..132].copy_from_slice(&msg.mac1);
                b
            };
            msg.mac2 = super::cookie::compute_mac2(&cookie.value, &with_mac1[..132]);
        }

        self.pending = Some(PendingHandshake {
            local_index,
            ephemeral,
            ephemeral_public,
            chaining_key: ci,
            hash: hi,
        });
        self.timers.begin_handshake(now);

        msg.encode()
    }

    /// Consumes a handshake response addressed to our pending initiation and
    /// derives the transport session.
    pub fn process_handshake_response(&mut self, buf: &[u8], now: Instant) -> CageResult<()> {
        if buf.len() != HANDSHAKE_RESPONSE_LEN {
            return Err(CageError::Decode("unexpected handshake response length".into()));
        }
        let msg = HandshakeResponse::decode(buf)?;

        let pending = self
            .pending
            .take()
            .ok_or_else(|| CageError::Decode("no handshake in flight".into()))?;
        if msg.receiver_index != pending.local_index {
            self.pending = Some(pending);
            return Err(CageError::Decode("handshake response for unknown session".into()));
        }

        let mut cr = pending.chaining_key;
        let mut hr = pending.hash;

        cr = kdf1(&cr, &msg.unencrypted_ephemeral);
        hr = hash(&[&hr, &msg.unencrypted_ephemeral]);

        let remote_ephemeral = PublicKeyBytes(msg.unencrypted_ephemeral);
        let dh1 = pending.ephemeral.diffie_hellman(&remote_ephemeral);
        cr = kdf1(&cr, &dh1);
        let dh2 = self.local_private.diffie_hellman(&remote_ephemeral);
        cr = kdf1(&cr, &dh2);

        let (cr, tau, key) = kdf3(&cr, &*self.psk);
        hr = hash(&[&hr, &tau]);
        let _ = aead_open(&key, 0, &msg.encrypted_nothing, &hr)
            .map_err(|_| CageError::Handshake {
                endpoint: self.endpoint,
                reason: "handshake response decryption failed".into(),
            })?;
        hr = hash(&[&hr, &msg.encrypted_nothing]);

        let (recv_key, send_key) = kdf2(&cr, &[]);
        let _ = hr; // transcript no longer needed once keys are derived

        let session = Session::new(send_key, recv_key, pending.local_index, msg.sender_index);
        self.session = Some(session);
        self.timers.handshake_completed(now);
        Ok(())
    }

    pub fn handshake_timed_out(&self, now: Instant) -> bool {
        self.timers.handshake_attempt_expired(now)
    }

    pub fn remember_cookie(&mut self, value: [u8; 16], now: Instant) {
        self.cookie = Some(ReceivedCookie::new(value, now));
    }

    /// Wraps a plaintext IP packet from the virtual network stack into a
    /// transport data message addressed to this peer's current session.
    pub fn encapsulate(&mut self, plaintext: &[u8], now: Instant) -> CageResult<Vec<u8>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CageError::Decode("no established session".into()))?;
        let counter = session.next_sending_counter();
        let ciphertext = aead_seal(&session.sending_key, counter, plaintext, &[]);

        let mut out = vec![0u8; TRANSPORT_HEADER_LEN + ciphertext.len()];
        TransportHeader {
            receiver_index: session.remote_index,
            counter,
        }
        .encode(&mut out);
        out[TRANSPORT_HEADER_LEN..].copy_from_slice(&ciphertext);
        self.timers.record_sent(now);
        Ok(out)
    }

    /// Unwraps a transport data message, rejecting replays per the sliding
    /// window and returning the plaintext IP packet on success.
    pub fn decapsulate(&mut self, buf: &[u8], now: Instant) -> CageResult<Vec<u8>> {
        let header = TransportHeader::decode(buf)?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CageError::Decode("no established session".into()))?;
        if header.receiver_index != session.local_index {
            return Err(CageError::Decode("transport message for unknown session".into()));
        }
        if !session.replay_window.check_and_update(header.counter) {
            return Err(CageError::Decode("replayed or out-of-window counter".into()));
        }
        let plaintext = aead_open(
            &session.receiving_key,
            header.counter,
            &buf[TRANSPORT_HEADER_LEN..],
            &[],
        )?;
        self.timers.record_received(now);
        Ok(plaintext)
    }
}

fn random_index() -> u32 {
    rand::rngs::OsRng.next_u32()
}

/// TAI64N timestamp as used in the handshake's anti-replay timestamp field;
/// real-time seconds-since-epoch is sufficient here since the responder only
/// compares it against previously seen timestamps, not wall-clock truth.
fn tai64n_now() -> [u8; 12] {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let mut out = [0u8; 12];
    let seconds: u64 = now.as_secs() + (1u64 << 62) + 10;
    out[0..8].copy_from_slice(&seconds.to_be_bytes());
    out[8..12].copy_from_slice(&now.subsec_nanos().to_be_bytes());
    out
}
