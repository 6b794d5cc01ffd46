// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Viewer-side transport for the meshcast producer over TCP (CBOR-framed
//! packets), plus a tool-facing port adapter.
//!
//! [`TransportChannel::connect`] spawns two tasks per connection: a reader
//! that reassembles packets, answers pings and runs the [`Heartbeat`], and a
//! writer fed by a bounded outbox. Inbound messages surface as
//! [`TransportEvent`]s; the connection ending surfaces exactly once as
//! [`TransportEvent::Disconnected`].

use anyhow::{Context, Result};
use meshcast_proto::{
    wire::{decode_message, encode_message, try_extract_frame, WireError, MAX_PAYLOAD_BYTES},
    Message,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

mod heartbeat;
pub mod port;

pub use heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatPoll};
pub use port::{ChannelTransport, TransportPort};

/// Commands queued for the writer before `send` starts failing.
pub const OUTBOX_CAPACITY: usize = 64;
/// Inbound events buffered before the reader waits on the consumer.
pub const EVENT_CAPACITY: usize = 1024;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// No traffic within the heartbeat timeout after a ping.
    HeartbeatTimeout,
    /// The peer closed the stream.
    PeerClosed,
    /// Socket error.
    Io(String),
    /// Framing desynchronized; the stream cannot be recovered.
    Protocol(WireError),
    /// The local event consumer went away.
    LocalClosed,
}

/// Something the transport delivers to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded inbound message (pings are answered, not forwarded).
    Message(Message),
    /// The connection is gone; no further events follow.
    Disconnected(DisconnectReason),
}

/// One live connection to the producer.
pub struct TransportChannel {
    outbox: mpsc::Sender<Message>,
    events: mpsc::Receiver<TransportEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    peer: Option<SocketAddr>,
}

impl TransportChannel {
    /// Connect to the producer at `addr`.
    pub async fn connect(addr: SocketAddr, heartbeat: HeartbeatConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to producer at {addr}"))?;
        stream.set_nodelay(true)?;
        info!(%addr, "transport connected");
        Ok(Self::from_stream(stream, heartbeat))
    }

    /// Wrap an already-connected stream. Must be called inside a tokio runtime.
    pub fn from_stream(stream: TcpStream, heartbeat: HeartbeatConfig) -> Self {
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let (outbox_tx, outbox_rx) = mpsc::channel::<Message>(OUTBOX_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(EVENT_CAPACITY);

        let writer = tokio::spawn(write_loop(write_half, outbox_rx));
        let reader = tokio::spawn(read_loop(
            read_half,
            outbox_tx.clone(),
            events_tx,
            heartbeat,
            writer.abort_handle(),
        ));

        Self {
            outbox: outbox_tx,
            events: events_rx,
            reader,
            writer,
            peer,
        }
    }

    /// Queue `msg` without waiting. Fails when the outbox is full or the
    /// writer has stopped.
    pub fn send(&self, msg: Message) -> Result<(), TrySendError<Message>> {
        self.outbox.try_send(msg)
    }

    /// Next event, or `None` once the reader is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Next event if one is ready.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    /// Tear the connection down.
    pub fn close(self) {
        info!(peer = ?self.peer, "transport closed locally");
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbox: mpsc::Receiver<Message>) {
    let mut ts: u64 = 0;
    while let Some(msg) = outbox.recv().await {
        let packet = match encode_message(&msg, ts) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%err, kind = msg.type_name(), "failed to encode outbound message");
                continue;
            }
        };
        ts += 1;
        if let Err(err) = writer.write_all(&packet).await {
            warn!(%err, "transport write failed");
            break;
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    outbox: mpsc::Sender<Message>,
    events: mpsc::Sender<TransportEvent>,
    heartbeat: HeartbeatConfig,
    writer: AbortHandle,
) {
    let reason = pump(&mut reader, &outbox, &events, heartbeat).await;
    writer.abort();
    info!(?reason, "transport disconnected");
    // Consumer may already be gone; nothing left to tell.
    let _ = events.send(TransportEvent::Disconnected(reason)).await;
}

async fn pump(
    reader: &mut OwnedReadHalf,
    outbox: &mpsc::Sender<Message>,
    events: &mpsc::Sender<TransportEvent>,
    config: HeartbeatConfig,
) -> DisconnectReason {
    let mut heartbeat = Heartbeat::new(config, Instant::now());
    let mut ticker = tokio::time::interval(config.poll_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut read_buf = vec![0u8; 16 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(32 * 1024);

    loop {
        tokio::select! {
            read = reader.read(&mut read_buf) => {
                let n = match read {
                    Ok(0) => return DisconnectReason::PeerClosed,
                    Ok(n) => n,
                    Err(err) => return DisconnectReason::Io(err.to_string()),
                };
                heartbeat.on_traffic(Instant::now());
                acc.extend_from_slice(&read_buf[..n]);

                loop {
                    let packet = match try_extract_frame(&mut acc, MAX_PAYLOAD_BYTES) {
                        Ok(Some(packet)) => packet,
                        Ok(None) => break,
                        Err(err) => return DisconnectReason::Protocol(err),
                    };
                    match decode_message(&packet) {
                        Ok((Message::HeartbeatPing, _, _)) => {
                            if outbox.try_send(Message::HeartbeatPong).is_err() {
                                warn!("outbox full; heartbeat pong dropped");
                            }
                        }
                        Ok((msg, ts, _)) => {
                            trace!(kind = msg.type_name(), ts, "inbound message");
                            if events.send(TransportEvent::Message(msg)).await.is_err() {
                                return DisconnectReason::LocalClosed;
                            }
                        }
                        Err(err) => warn!(%err, "dropping malformed packet"),
                    }
                }
            }
            _ = ticker.tick() => match heartbeat.poll(Instant::now()) {
                HeartbeatPoll::Idle => {}
                HeartbeatPoll::SendPing => {
                    debug!("link idle; sending heartbeat ping");
                    if outbox.try_send(Message::HeartbeatPing).is_err() {
                        warn!("outbox full; heartbeat ping dropped");
                    }
                }
                HeartbeatPoll::Expired => return DisconnectReason::HeartbeatTimeout,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use meshcast_proto::{BufferStatePayload, FrameVerticesPayload};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    async fn pair(config: HeartbeatConfig) -> (TransportChannel, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) =
            tokio::join!(TransportChannel::connect(addr, config), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn read_message(stream: &mut TcpStream, acc: &mut Vec<u8>) -> Message {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(packet) = try_extract_frame(acc, MAX_PAYLOAD_BYTES).unwrap() {
                return decode_message(&packet).unwrap().0;
            }
            let n = timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap();
            assert!(n > 0, "peer closed before a full packet");
            acc.extend_from_slice(&buf[..n]);
        }
    }

    async fn next_event(client: &mut TransportChannel) -> TransportEvent {
        timeout(WAIT, client.recv()).await.unwrap().unwrap()
    }

    fn frame(index: u64) -> Message {
        Message::FrameVertices(FrameVerticesPayload {
            positions: vec![0.0, 1.0, 2.0],
            index,
        })
    }

    #[tokio::test]
    async fn delivers_packet_split_across_writes() {
        let (mut client, mut server) = pair(HeartbeatConfig::default()).await;
        let packet = encode_message(&frame(7), 0).unwrap();
        server.write_all(&packet[..5]).await.unwrap();
        server.flush().await.unwrap();
        tokio::task::yield_now().await;
        server.write_all(&packet[5..]).await.unwrap();

        assert_eq!(next_event(&mut client).await, TransportEvent::Message(frame(7)));
    }

    #[tokio::test]
    async fn malformed_packet_is_dropped_and_stream_continues() {
        let (mut client, mut server) = pair(HeartbeatConfig::default()).await;
        let mut corrupt = encode_message(&frame(1), 0).unwrap();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        server.write_all(&corrupt).await.unwrap();
        server
            .write_all(&encode_message(&frame(2), 1).unwrap())
            .await
            .unwrap();

        assert_eq!(next_event(&mut client).await, TransportEvent::Message(frame(2)));
    }

    #[tokio::test]
    async fn outbound_commands_reach_the_peer() {
        let (client, mut server) = pair(HeartbeatConfig::default()).await;
        client.send(Message::buffer_state(false, 7)).unwrap();
        let mut acc = Vec::new();
        assert_eq!(
            read_message(&mut server, &mut acc).await,
            Message::BufferState(BufferStatePayload {
                open: false,
                resume_index: 7
            })
        );
    }

    #[tokio::test]
    async fn inbound_ping_is_answered() {
        let (_client, mut server) = pair(HeartbeatConfig::default()).await;
        server
            .write_all(&encode_message(&Message::HeartbeatPing, 0).unwrap())
            .await
            .unwrap();
        let mut acc = Vec::new();
        assert_eq!(read_message(&mut server, &mut acc).await, Message::HeartbeatPong);
    }

    #[tokio::test]
    async fn silent_peer_is_pinged_then_dropped() {
        let config = HeartbeatConfig {
            idle: Duration::from_millis(40),
            timeout: Duration::from_millis(80),
        };
        let (mut client, mut server) = pair(config).await;
        let mut acc = Vec::new();
        assert_eq!(read_message(&mut server, &mut acc).await, Message::HeartbeatPing);
        assert_eq!(
            next_event(&mut client).await,
            TransportEvent::Disconnected(DisconnectReason::HeartbeatTimeout)
        );
    }

    #[tokio::test]
    async fn peer_close_is_reported_once() {
        let (mut client, server) = pair(HeartbeatConfig::default()).await;
        drop(server);
        assert_eq!(
            next_event(&mut client).await,
            TransportEvent::Disconnected(DisconnectReason::PeerClosed)
        );
        assert_eq!(timeout(WAIT, client.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_stream_is_a_protocol_error() {
        let (mut client, mut server) = pair(HeartbeatConfig::default()).await;
        server.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(
            next_event(&mut client).await,
            TransportEvent::Disconnected(DisconnectReason::Protocol(WireError::BadMagic))
        );
    }
}
