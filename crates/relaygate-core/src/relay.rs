//! Byte relay between an accepted client and its target

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Bytes moved by one relayed connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_target: u64,
    pub target_to_client: u64,
}

/// Relay bytes both ways until both directions have finished
///
/// A side that closes its write half has the close propagated to the other
/// side (`shutdown`), so half-closed protocols keep working. With an idle
/// timeout the connection is torn down once neither direction has carried
/// data for that long.
pub async fn relay(
    mut client: TcpStream,
    mut target: TcpStream,
    idle_timeout: Option<Duration>,
) -> io::Result<RelayStats> {
    let Some(idle) = idle_timeout else {
        let (up, down) = tokio::io::copy_bidirectional(&mut client, &mut target).await?;
        return Ok(RelayStats {
            client_to_target: up,
            target_to_client: down,
        });
    };

    let started = Instant::now();
    let last_activity = AtomicU64::new(0);

    let (mut client_read, mut client_write) = client.split();
    let (mut target_read, mut target_write) = target.split();

    let (up, down) = tokio::try_join!(
        pump(&mut client_read, &mut target_write, idle, started, &last_activity),
        pump(&mut target_read, &mut client_write, idle, started, &last_activity),
    )?;

    Ok(RelayStats {
        client_to_target: up,
        target_to_client: down,
    })
}

async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle: Duration,
    started: Instant,
    last_activity: &AtomicU64,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 16 * 1024];
    let mut total = 0u64;

    loop {
        match tokio::time::timeout(idle, reader.read(&mut buf)).await {
            Ok(Ok(0)) => {
                let _ = writer.shutdown().await;
                return Ok(total);
            }
            Ok(Ok(n)) => {
                // A peer that stops reading stalls the write; count that as idle too
                tokio::time::timeout(idle, writer.write_all(&buf[..n]))
                    .await
                    .map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("peer not reading for {:?}", idle),
                        )
                    })??;
                total += n as u64;
                last_activity.store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                // Quiet in this direction; the other one may still be busy
                let last = Duration::from_millis(last_activity.load(Ordering::Relaxed));
                if started.elapsed().saturating_sub(last) >= idle {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connection idle for {:?}", idle),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Connected (client-side, server-side) pair on loopback
    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_relay_both_directions_with_half_close() {
        let (mut user, relay_client_side) = pair().await;
        let (relay_target_side, mut service) = pair().await;

        let handle = tokio::spawn(relay(relay_client_side, relay_target_side, None));

        user.write_all(b"ping").await.unwrap();
        user.shutdown().await.unwrap();

        let mut received = Vec::new();
        service.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"ping");

        service.write_all(b"pong").await.unwrap();
        service.shutdown().await.unwrap();

        let mut reply = Vec::new();
        user.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"pong");

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.client_to_target, 4);
        assert_eq!(stats.target_to_client, 4);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_connection() {
        let (_user, relay_client_side) = pair().await;
        let (relay_target_side, _service) = pair().await;

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            relay(
                relay_client_side,
                relay_target_side,
                Some(Duration::from_millis(100)),
            ),
        )
        .await
        .expect("relay should give up on its own");

        let err = result.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_one_way_traffic_keeps_connection_alive() {
        let (mut user, relay_client_side) = pair().await;
        let (relay_target_side, mut service) = pair().await;

        let handle = tokio::spawn(relay(
            relay_client_side,
            relay_target_side,
            Some(Duration::from_millis(300)),
        ));

        // Only the service talks, but more often than the idle timeout
        for _ in 0..5 {
            service.write_all(b"tick").await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        service.shutdown().await.unwrap();
        user.shutdown().await.unwrap();

        let mut received = Vec::new();
        user.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 20);

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.target_to_client, 20);
    }

    #[tokio::test]
    async fn test_stalled_reader_times_out_despite_other_direction() {
        let (user, relay_client_side) = pair().await;
        let (relay_target_side, service) = pair().await;
        let (_user_read, mut user_write) = user.into_split();
        let (mut service_read, mut service_write) = service.into_split();

        // The user keeps sending but never reads what comes back
        tokio::spawn(async move {
            for _ in 0..100 {
                if user_write.write_all(b"keepalive").await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });
        tokio::spawn(async move {
            let mut sink = Vec::new();
            let _ = service_read.read_to_end(&mut sink).await;
        });
        tokio::spawn(async move {
            let chunk = vec![0u8; 1024 * 1024];
            for _ in 0..64 {
                if service_write.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            relay(
                relay_client_side,
                relay_target_side,
                Some(Duration::from_millis(300)),
            ),
        )
        .await
        .expect("relay should give up on a peer that stopped reading");

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }
}
