//! Cooperative cancellation, threaded through everything that can suspend
//! per spec.md section 5: pending dials, proxy copies, peer timers,
//! forwarders, the TUN reader.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct CancelGuard {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelGuard, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelGuard { tx }, CancelToken { rx })
}

impl CancelGuard {
    /// Signal cancellation to every clone of the paired `CancelToken`.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been signalled; intended for use in
    /// `tokio::select!` alongside whatever suspension point is in flight.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_all_clones() {
        let (guard, token) = cancel_pair();
        let mut a = token.clone();
        let mut b = token.clone();
        assert!(!a.is_cancelled());
        guard.cancel();
        a.cancelled().await;
        b.cancelled().await;
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }
}
