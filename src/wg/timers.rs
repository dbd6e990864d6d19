//! Canonical WireGuard timer constants and the peer state machine, per
//! spec.md section 4.4's timer table.

use std::time::{Duration, Instant};

pub const REKEY_AFTER_MESSAGES: u64 = 1 << 60;
pub const REJECT_AFTER_MESSAGES: u64 = u64::MAX - (1 << 13);
pub const REKEY_AFTER_TIME: Duration = Duration::from_secs(120);
pub const REJECT_AFTER_TIME: Duration = Duration::from_secs(180);
pub const REKEY_ATTEMPT_TIME: Duration = Duration::from_secs(90);
pub const REKEY_TIMEOUT: Duration = Duration::from_secs(5);
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);
pub const COOKIE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Handshaking,
    Transport,
    Rekeying,
    Dead,
}

/// Tracks the clocks a single peer needs to decide when to rekey, retry a
/// stalled handshake, or send a keepalive, mirroring wireguard-go's
/// `timers.go` without its NAT-keepalive persistent-interval feature (out of
/// scope per spec.md's Non-goals).
#[derive(Debug)]
pub struct PeerTimers {
    pub state: PeerState,
    handshake_started_at: Option<Instant>,
    handshake_attempts: u32,
    session_established_at: Option<Instant>,
    last_sent_at: Option<Instant>,
    last_received_at: Option<Instant>,
}

impl Default for PeerTimers {
    fn default() -> Self {
        PeerTimers {
            state: PeerState::Idle,
            handshake_started_at: None,
            handshake_attempts: 0,
            session_established_at: None,
            last_sent_at: None,
            last_received_at: None,
        }
    }
}

impl PeerTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_handshake(&mut self, now: Instant) {
        self.state = PeerState::Handshaking;
        self.handshake_started_at = Some(now);
        self.handshake_attempts += 1;
    }

    pub fn handshake_completed(&mut self, now: Instant) {
        self.state = PeerState::Transport;
        self.handshake_started_at = None;
        self.handshake_attempts = 0;
        self.session_established_at = Some(now);
        self.last_received_at = Some(now);
    }

    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent_at = Some(now);
    }

    pub fn record_received(&mut self, now: Instant) {
        self.last_received_at = Some(now);
    }

    /// Whether the handshake attempt has exceeded `REKEY_TIMEOUT` without a
    /// response and should be retried, up to the `REKEY_ATTEMPT_TIME` cutoff
    /// after which the peer is considered unreachable.
    pub fn should_retry_handshake(&self, now: Instant) -> bool {
        match self.handshake_started_at {
            Some(started) => {
                now.duration_since(started) >= REKEY_TIMEOUT
                    && now.duration_since(started) < REKEY_ATTEMPT_TIME
            }
            None => false,
        }
    }

    pub fn handshake_attempt_expired(&self, now: Instant) -> bool {
        match self.handshake_started_at {
            Some(started) => now.duration_since(started) >= REKEY_ATTEMPT_TIME,
            None => false,
        }
    }

    /// A session older than `REKEY_AFTER_TIME` that has sent traffic should
    /// proactively rekey rather than wait for `REJECT_AFTER_TIME`.
    pub fn should_initiate_rekey(&self, now: Instant, sending_counter: u64) -> bool {
        if self.state != PeerState::Transport {
            return false;
        }
        let age_triggers = self
            .session_established_at
            .map(|t| now.duration_since(t) >= REKEY_AFTER_TIME)
            .unwrap_or(false);
        age_triggers || sending_counter >= REKEY_AFTER_MESSAGES
    }

    pub fn session_expired(&self, now: Instant, counter: u64) -> bool {
        let age_expired = self
            .session_established_at
            .map(|t| now.duration_since(t) >= REJECT_AFTER_TIME)
            .unwrap_or(false);
        age_expired || counter >= REJECT_AFTER_MESSAGES
    }

    pub fn needs_keepalive(&self, now: Instant) -> bool {
        if self.state != PeerState::Transport {
            return false;
        }
        match (self.last_sent_at, self.last_received_at) {
            (Some(sent), Some(received)) => {
                received > sent && now.duration_since(sent) >= KEEPALIVE_TIMEOUT
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_timers_start_idle() {
        let t = PeerTimers::new();
        assert_eq!(t.state, PeerState::Idle);
    }

    #[test]
    fn handshake_retry_window() {
        let mut t = PeerTimers::new();
        let start = Instant::now();
        t.begin_handshake(start);
        assert!(!t.should_retry_handshake(start));
        assert!(t.should_retry_handshake(start + REKEY_TIMEOUT));
        assert!(t.handshake_attempt_expired(start + REKEY_ATTEMPT_TIME));
    }

    #[test]
    fn rekey_triggers_after_age() {
        let mut t = PeerTimers::new();
        let start = Instant::now();
        t.handshake_completed(start);
        assert!(!t.should_initiate_rekey(start, 0));
        assert!(t.should_initiate_rekey(start + REKEY_AFTER_TIME, 0));
    }

    #[test]
    fn rekey_triggers_after_message_count() {
        let mut t = PeerTimers::new();
        let start = Instant::now();
        t.handshake_completed(start);
        assert!(t.should_initiate_rekey(start, REKEY_AFTER_MESSAGES));
    }

    #[test]
    fn session_expires_after_reject_time() {
        let mut t = PeerTimers::new();
        let start = Instant::now();
        t.handshake_completed(start);
        assert!(!t.session_expired(start, 0));
        assert!(t.session_expired(start + REJECT_AFTER_TIME, 0));
    }

    #[test]
    fn keepalive_needed_only_after_quiet_send_with_recent_receive() {
        let mut t = PeerTimers::new();
        let start = Instant::now();
        t.handshake_completed(start);
        t.record_sent(start);
        t.record_received(start + Duration::from_secs(1));
        assert!(!t.needs_keepalive(start + Duration::from_secs(5)));
        assert!(t.needs_keepalive(start + KEEPALIVE_TIMEOUT + Duration::from_secs(1)));
    }
}
