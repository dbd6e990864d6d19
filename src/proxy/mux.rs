//! Bidirectional byte-copy loop between a TUN-side flow and its WG-side
//! counterpart, per spec.md section 4.5: "once both ends of a flow are
//! open, bytes move in FIFO order per direction until either side closes or
//! the sandbox is torn down."

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::error::CageResult;

use super::flow::FlowId;

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Copies in both directions concurrently until one side reaches EOF, an
/// error occurs, or `cancel` fires; returns once the flow is fully closed.
#[instrument(level = "trace", skip_all, fields(flow = %flow))]
pub async fn copy_bidirectional<A, B>(
    flow: FlowId,
    tun_side: A,
    wg_side: B,
    mut cancel: CancelToken,
) -> CageResult<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut tun_read, mut tun_write) = tokio::io::split(tun_side);
    let (mut wg_read, mut wg_write) = tokio::io::split(wg_side);

    let tun_to_wg = copy_one_direction(&mut tun_read, &mut wg_write);
    let wg_to_tun = copy_one_direction(&mut wg_read, &mut tun_write);

    tokio::select! {
        result = tun_to_wg => {
            debug!(flow = %flow, "tun->wg direction closed");
            result?;
        }
        result = wg_to_tun => {
            debug!(flow = %flow, "wg->tun direction closed");
            result?;
        }
        _ = cancel.cancelled() => {
            debug!(flow = %flow, "flow cancelled");
        }
    }

    let _ = tun_write.shutdown().await;
    let _ = wg_write.shutdown().await;
    Ok(())
}

async fn copy_one_direction<R, W>(reader: &mut R, writer: &mut W) -> CageResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(crate::error::CageError::FlowIo)?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(crate::error::CageError::FlowIo)?;
        total += n as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use tokio::io::duplex;

    #[tokio::test]
    async fn copies_bytes_until_eof() {
        let (mut client_a, server_a) = duplex(64);
        let (client_b, mut server_b) = duplex(64);
        let (_guard, cancel) = cancel_pair();

        let flow = FlowId::new(
            super::super::flow::FlowKind::Tcp,
            "10.1.2.100:1".parse().unwrap(),
            "10.1.2.200:2".parse().unwrap(),
        );

        let copy_task = tokio::spawn(copy_bidirectional(flow, server_a, client_b, cancel));

        client_a.write_all(b"hello").await.unwrap();
        drop(client_a);

        let mut received = [0u8; 5];
        server_b.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello");

        drop(server_b);
        copy_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_ends_the_copy_loop() {
        let (_client_a, server_a) = duplex(64);
        let (client_b, _server_b) = duplex(64);
        let (guard, cancel) = cancel_pair();

        let flow = FlowId::new(
            super::super::flow::FlowKind::Tcp,
            "10.1.2.100:1".parse().unwrap(),
            "10.1.2.200:2".parse().unwrap(),
        );

        let copy_task = tokio::spawn(copy_bidirectional(flow, server_a, client_b, cancel));
        guard.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), copy_task).await;
        assert!(result.is_ok());
    }
}
