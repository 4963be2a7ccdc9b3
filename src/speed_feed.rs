//! Live speed inputs. Each loop parses readings as they arrive and writes them
//! into the shared [`SpeedOverride`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;

use crate::speed::{parse_speed, SpeedOverride};

/// Counters reported when a feed stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Parse one reading and publish it. Returns false if the reading was dropped.
pub fn apply_reading(speed: &SpeedOverride, text: &str, source: &str) -> bool {
    let parsed = parse_speed(text).and_then(|value| speed.publish(value).map(|_| value));
    match parsed {
        Ok(value) => {
            log::debug!("[{}] speed {:.3} m/s", source, value);
            true
        }
        Err(e) => {
            log::warn!("[{}] Dropped reading: {}", source, e);
            false
        }
    }
}

/// One reading per line until EOF.
pub async fn line_speed_loop<R>(reader: R, speed: Arc<SpeedOverride>, source: &str) -> FeedStats
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = FeedStats::default();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if apply_reading(&speed, &line, source) {
                    stats.accepted += 1;
                    if stats.accepted % 100 == 0 {
                        log::info!("[{}] {} readings", source, stats.accepted);
                    }
                } else {
                    stats.rejected += 1;
                }
            }
            Ok(None) => {
                log::info!(
                    "[{}] Input closed after {} readings ({} rejected)",
                    source,
                    stats.accepted,
                    stats.rejected
                );
                break;
            }
            Err(e) => {
                log::error!("[{}] Read failed: {}", source, e);
                break;
            }
        }
    }
    stats
}

pub async fn stdin_speed_loop(speed: Arc<SpeedOverride>) -> FeedStats {
    line_speed_loop(BufReader::new(tokio::io::stdin()), speed, "SPEED-STDIN").await
}

/// One reading per datagram. Runs until the socket errors.
pub async fn udp_speed_loop(socket: UdpSocket, speed: Arc<SpeedOverride>) -> FeedStats {
    let mut buf = [0u8; 256];
    let mut stats = FeedStats::default();

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                let text = String::from_utf8_lossy(&buf[..len]);
                if apply_reading(&speed, &text, "SPEED-UDP") {
                    stats.accepted += 1;
                    if stats.accepted == 1 {
                        log::info!("[SPEED-UDP] First reading from {}", peer);
                    }
                } else {
                    stats.rejected += 1;
                }
            }
            Err(e) => {
                log::error!(
                    "[SPEED-UDP] Socket error after {} readings: {}",
                    stats.accepted,
                    e
                );
                break;
            }
        }
    }
    stats
}

pub async fn bind_udp(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let socket = UdpSocket::bind(addr).await?;
    log::info!("[SPEED-UDP] Listening on {}", socket.local_addr()?);
    Ok(socket)
}
