//! Bridges one direction-pair of a proxied flow between a `smoltcp` socket
//! and `proxy::mux::copy_bidirectional`, per spec.md section 4.5.
//!
//! The socket lives inside the dataplane's single unified poll loop
//! (`stage::dataplane::DataPlane`), which owns it directly rather than
//! behind a mutex, so `copy_bidirectional`'s independently-scheduled copy
//! task can't borrow it. Each direction instead crosses an unbounded
//! channel: the dataplane loop pushes bytes it pulled out of the socket's
//! receive buffer and drains bytes destined for the socket's send buffer,
//! entirely synchronously; `FlowEndpoint` is the `AsyncRead + AsyncWrite`
//! face of that same channel pair that `copy_bidirectional` gets to see.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// The `copy_bidirectional`-facing end of a bridged flow direction-pair.
pub struct FlowEndpoint {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    leftover: Vec<u8>,
}

/// Builds a `FlowEndpoint` plus the dataplane-side sender/receiver pair used
/// to drive it: `to_copy` feeds bytes `copy_bidirectional` will read back
/// out of the endpoint, `from_copy` receives whatever the endpoint's writer
/// half wrote.
pub fn flow_endpoint() -> (
    FlowEndpoint,
    mpsc::UnboundedSender<Vec<u8>>,
    mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (to_copy, inbound) = mpsc::unbounded_channel();
    let (outbound, from_copy) = mpsc::unbounded_channel();
    (
        FlowEndpoint {
            outbound,
            inbound,
            leftover: Vec::new(),
        },
        to_copy,
        from_copy,
    )
}

impl AsyncRead for FlowEndpoint {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.leftover.is_empty() {
            let n = this.leftover.len().min(buf.remaining());
            buf.put_slice(&this.leftover[..n]);
            this.leftover.drain(..n);
            return Poll::Ready(Ok(()));
        }

        match this.inbound.poll_recv(cx) {
            Poll::Ready(Some(mut chunk)) => {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    this.leftover = chunk.split_off(n);
                }
                Poll::Ready(Ok(()))
            }
            // Sender dropped: the dataplane loop has observed the socket's
            // own half-close and is done feeding this direction.
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for FlowEndpoint {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.outbound.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "flow endpoint closed"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn bytes_pushed_in_are_readable_on_the_endpoint() {
        let (mut endpoint, to_copy, _from_copy) = flow_endpoint();
        to_copy.send(b"hello".to_vec()).unwrap();

        let mut buf = [0u8; 5];
        endpoint.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn a_short_read_buffer_carries_the_remainder_to_the_next_read() {
        let (mut endpoint, to_copy, _from_copy) = flow_endpoint();
        to_copy.send(b"hello".to_vec()).unwrap();

        let mut first = [0u8; 2];
        endpoint.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"he");

        let mut second = [0u8; 3];
        endpoint.read_exact(&mut second).await.unwrap();
        assert_eq!(&second, b"llo");
    }

    #[tokio::test]
    async fn writes_to_the_endpoint_arrive_on_from_copy() {
        let (mut endpoint, _to_copy, mut from_copy) = flow_endpoint();
        endpoint.write_all(b"reply").await.unwrap();
        assert_eq!(from_copy.recv().await, Some(b"reply".to_vec()));
    }

    #[tokio::test]
    async fn dropping_the_sender_yields_eof() {
        let (mut endpoint, to_copy, _from_copy) = flow_endpoint();
        drop(to_copy);

        let mut buf = [0u8; 8];
        let n = endpoint.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
