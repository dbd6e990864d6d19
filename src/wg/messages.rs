//! Wire encoding for the four WireGuard message types, per spec.md section
//! 6: handshake initiation (type 1), handshake response (type 2), cookie
//! reply (type 3), and transport data (type 4). Field widths match the
//! reference wire format exactly since interop with a real responder depends
//! on it.

use crate::error::{CageError, CageResult};

pub const TYPE_HANDSHAKE_INITIATION: u8 = 1;
pub const TYPE_HANDSHAKE_RESPONSE: u8 = 2;
pub const TYPE_COOKIE_REPLY: u8 = 3;
pub const TYPE_TRANSPORT_DATA: u8 = 4;

pub const HANDSHAKE_INITIATION_LEN: usize = 148;
pub const HANDSHAKE_RESPONSE_LEN: usize = 92;
pub const COOKIE_REPLY_LEN: usize = 64;
pub const TRANSPORT_HEADER_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct HandshakeInitiation {
    pub sender_index: u32,
    pub unencrypted_ephemeral: [u8; 32],
    pub encrypted_static: [u8; 48],
    pub encrypted_timestamp: [u8; 28],
    pub mac1: [u8; 16],
    pub mac2: [u8; 16],
}

impl HandshakeInitiation {
    pub fn encode(&self) -> [u8; HANDSHAKE_INITIATION_LEN] {
        let mut out = [0u8; HANDSHAKE_INITIATION_LEN];
        out[0] = TYPE_HANDSHAKE_INITIATION;
        out[4..8].copy_from_slice(&self.sender_index.to_le_bytes());
        out[8..40].copy_from_slice(&self.unencrypted_ephemeral);
        out[40..88].copy_from_slice(&self.encrypted_static);
        out[88..116].copy_from_slice(&self.encrypted_timestamp);
        out[116..132].copy_from_slice(&self.mac1);
        out[132..148].copy_from_slice(&self.mac2);
        out
    }

    pub fn decode(buf: &[u8]) -> CageResult<Self> {
        if buf.len() != HANDSHAKE_INITIATION_LEN || buf[0] != TYPE_HANDSHAKE_INITIATION {
            return Err(CageError::Decode("malformed handshake initiation".into()));
        }
        Ok(HandshakeInitiation {
            sender_index: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            unencrypted_ephemeral: buf[8..40].try_into().unwrap(),
            encrypted_static: buf[40..88].try_into().unwrap(),
            encrypted_timestamp: buf[88..116].try_into().unwrap(),
            mac1: buf[116..132].try_into().unwrap(),
            mac2: buf[132..148].try_into().unwrap(),
        })
    }

    /// The portion of the message MAC1 is computed over: everything before
    /// the two MAC fields.
    pub fn mac_input(buf: &[u8]) -> &[u8] {
        &buf[0..116]
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub sender_index: u32,
    pub receiver_index: u32,
    pub unencrypted_ephemeral: [u8; 32],
    pub encrypted_nothing: [u8; 16],
    pub mac1: [u8; 16],
    pub mac2: [u8; 16],
}

impl HandshakeResponse {
    pub fn encode(&self) -> [u8; HANDSHAKE_RESPONSE_LEN] {
        let mut out = [0u8; HANDSHAKE_RESPONSE_LEN];
        out[0] = TYPE_HANDSHAKE_RESPONSE;
        out[4..8].copy_from_slice(&self.sender_index.to_le_bytes());
        out[8..12].copy_from_slice(&self.receiver_index.to_le_bytes());
        out[12..44].copy_from_slice(&self.unencrypted_ephemeral);
        out[44..60].copy_from_slice(&self.encrypted_nothing);
        out[60..76].copy_from_slice(&self.mac1);
        out[76..92].copy_from_slice(&self.mac2);
        out
    }

    pub fn decode(buf: &[u8]) -> CageResult<Self> {
        if buf.len() != HANDSHAKE_RESPONSE_LEN || buf[0] != TYPE_HANDSHAKE_RESPONSE {
            return Err(CageError::Decode("malformed handshake response".into()));
        }
        Ok(HandshakeResponse {
            sender_index: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            receiver_index: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            unencrypted_ephemeral: buf[12..44].try_into().unwrap(),
            encrypted_nothing: buf[44..60].try_into().unwrap(),
            mac1: buf[60..76].try_into().unwrap(),
            mac2: buf[76..92].try_into().unwrap(),
        })
    }

    pub fn mac_input(buf: &[u8]) -> &[u8] {
        &buf[0..60]
    }
}

#[derive(Debug, Clone)]
pub struct CookieReply {
    pub receiver_index: u32,
    pub nonce: [u8; 24],
    pub encrypted_cookie: [u8; 32],
}

impl CookieReply {
    pub fn encode(&self) -> [u8; COOKIE_REPLY_LEN] {
        let mut out = [0u8; COOKIE_REPLY_LEN];
        out[0] = TYPE_COOKIE_REPLY;
        out[4..8].copy_from_slice(&self.receiver_index.to_le_bytes());
        out[8..32].copy_from_slice(&self.nonce);
        out[32..64].copy_from_slice(&self.encrypted_cookie);
        out
    }

    pub fn decode(buf: &[u8]) -> CageResult<Self> {
        if buf.len() != COOKIE_REPLY_LEN || buf[0] != TYPE_COOKIE_REPLY {
            return Err(CageError::Decode("malformed cookie reply".into()));
        }
        Ok(CookieReply {
            receiver_index: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            nonce: buf[8..32].try_into().unwrap(),
            encrypted_cookie: buf[32..64].try_into().unwrap(),
        })
    }
}

/// Transport data header; the AEAD ciphertext (datagram plus 16-byte tag)
/// follows immediately in the same packet buffer.
#[derive(Debug, Clone, Copy)]
pub struct TransportHeader {
    pub receiver_index: u32,
    pub counter: u64,
}

impl TransportHeader {
    pub fn encode(&self, out: &mut [u8]) {
        out[0] = TYPE_TRANSPORT_DATA;
        out[4..8].copy_from_slice(&self.receiver_index.to_le_bytes());
        out[8..16].copy_from_slice(&self.counter.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> CageResult<Self> {
        if buf.len() < TRANSPORT_HEADER_LEN || buf[0] != TYPE_TRANSPORT_DATA {
            return Err(CageError::Decode("malformed transport data header".into()));
        }
        Ok(TransportHeader {
            receiver_index: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            counter: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        })
    }
}

/// First byte of any WireGuard message identifies its type; used by the
/// receive path to dispatch before attempting a type-specific decode.
pub fn message_type(buf: &[u8]) -> Option<u8> {
    buf.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_initiation_round_trips() {
        let msg = HandshakeInitiation {
            sender_index: 0xdead_beef,
            unencrypted_ephemeral: [1u8; 32],
            encrypted_static: [2u8; 48],
            encrypted_timestamp: [3u8; 28],
            mac1: [4u8; 16],
            mac2: [5u8; 16],
        };
        let encoded = msg.encode();
        let decoded = HandshakeInitiation::decode(&encoded).unwrap();
        assert_eq!(decoded.sender_index, msg.sender_index);
        assert_eq!(decoded.unencrypted_ephemeral, msg.unencrypted_ephemeral);
        assert_eq!(decoded.encrypted_static, msg.encrypted_static);
    }

    #[test]
    fn handshake_response_round_trips() {
        let msg = HandshakeResponse {
            sender_index: 1,
            receiver_index: 2,
            unencrypted_ephemeral: [9u8; 32],
            encrypted_nothing: [8u8; 16],
            mac1: [7u8; 16],
            mac2: [6u8; 16],
        };
        let encoded = msg.encode();
        let decoded = HandshakeResponse::decode(&encoded).unwrap();
        assert_eq!(decoded.sender_index, 1);
        assert_eq!(decoded.receiver_index, 2);
    }

    #[test]
    fn cookie_reply_round_trips() {
        let msg = CookieReply {
            receiver_index: 42,
            nonce: [1u8; 24],
            encrypted_cookie: [2u8; 32],
        };
        let decoded = CookieReply::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.receiver_index, 42);
    }

    #[test]
    fn transport_header_round_trips() {
        let header = TransportHeader {
            receiver_index: 7,
            counter: 123456,
        };
        let mut buf = [0u8; TRANSPORT_HEADER_LEN];
        header.encode(&mut buf);
        let decoded = TransportHeader::decode(&buf).unwrap();
        assert_eq!(decoded.receiver_index, 7);
        assert_eq!(decoded.counter, 123456);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(HandshakeInitiation::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn decode_rejects_wrong_type() {
        let mut buf = [0u8; HANDSHAKE_INITIATION_LEN];
        buf[0] = TYPE_HANDSHAKE_RESPONSE;
        assert!(HandshakeInitiation::decode(&buf).is_err());
    }

    #[test]
    fn message_type_reads_first_byte() {
        assert_eq!(message_type(&[TYPE_TRANSPORT_DATA, 0, 0]), Some(TYPE_TRANSPORT_DATA));
        assert_eq!(message_type(&[]), None);
    }
}
