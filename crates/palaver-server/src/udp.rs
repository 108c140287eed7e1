use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{error, warn};

use crate::engine::Engine;

/// Room for one datagram; anything beyond the 512-byte control cap is
/// rejected by the framer, this just has to be big enough to read it.
const RECV_BUFFER: usize = 2048;

/// Timer granularity for retransmissions and session reaping.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// The single-task event loop: one receive path, one timer path, both
/// feeding the engine that owns all state. Outgoing datagrams are flushed
/// after every step, so a broadcast caused by one command is on the wire
/// before the next command is read.
pub async fn run_control_loop(socket: UdpSocket, mut engine: Engine) -> anyhow::Result<()> {
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, addr)) => engine.handle_datagram(&buf[..len], addr, Instant::now()),
                    Err(e) => error!("udp recv error: {e}"),
                }
            }
            _ = tick.tick() => engine.tick(Instant::now()),
        }

        for (bytes, addr) in engine.drain_outbox() {
            if let Err(e) = socket.send_to(&bytes, addr).await {
                warn!(%addr, "udp send failed: {e}");
            }
        }
    }
}
