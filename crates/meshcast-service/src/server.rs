// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! TCP front end: one viewer at a time, a reader that applies viewer
//! commands, a producer task that streams frames, and a writer fed by an
//! outbox.

use anyhow::{Context, Result};
use meshcast_app_core::prefs::HostPrefs;
use meshcast_proto::{
    wire::{decode_message, encode_message, try_extract_frame, MAX_PAYLOAD_BYTES},
    AlertPayload, ConnectionConfirmedPayload, FrameCountPayload, FrameVerticesPayload, Message,
    PipelineIdentityPayload, StreamUpdateAckPayload, TopologyPayload,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::pipeline::{pipeline_by_name, Pipeline};
use crate::state::{ProducerState, Step};

/// Alert sent to a viewer that connects while another is being served.
pub const SERVER_IN_USE: &str = "server already in use";

const OUTBOX_CAPACITY: usize = 256;

/// Runtime configuration for [`serve`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Pipeline to instantiate per viewer.
    pub pipeline_name: String,
    /// Default clip length for synthetic pipelines.
    pub num_frames: u64,
    /// Pause after a reposition.
    pub state_relief: Duration,
    /// Pause between steps while idle.
    pub buffer_relief: Duration,
}

impl From<&HostPrefs> for ServerConfig {
    fn from(prefs: &HostPrefs) -> Self {
        Self {
            pipeline_name: prefs.pipeline_name.clone(),
            num_frames: prefs.num_frames,
            state_relief: Duration::from_millis(prefs.state_relief_ms),
            buffer_relief: Duration::from_millis(prefs.buffer_relief_ms),
        }
    }
}

#[derive(Default)]
struct HubState {
    next_conn_id: u64,
    active: Option<u64>,
}

struct Producer {
    state: ProducerState,
    pipeline: Box<dyn Pipeline>,
}

/// Accept viewers until the listener fails.
pub async fn serve(listener: TcpListener, config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    let hub = Arc::new(Mutex::new(HubState::default()));
    loop {
        let (stream, peer) = listener.accept().await?;
        let hub = hub.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_viewer(stream, peer, hub, config).await {
                warn!(?err, %peer, "viewer handler error");
            }
        });
    }
}

async fn handle_viewer(
    mut stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<Mutex<HubState>>,
    config: Arc<ServerConfig>,
) -> Result<()> {
    let conn_id = {
        let mut h = hub.lock().await;
        if h.active.is_some() {
            drop(h);
            warn!(%peer, "a second viewer tried to connect while the server is in use");
            let alert = Message::Alert(AlertPayload {
                message: SERVER_IN_USE.into(),
            });
            stream.write_all(&encode_message(&alert, 0)?).await?;
            stream.shutdown().await?;
            return Ok(());
        }
        let id = h.next_conn_id;
        h.next_conn_id += 1;
        h.active = Some(id);
        id
    };
    info!(conn_id, %peer, "viewer connected");

    let result = run_viewer(stream, &config).await;

    let mut h = hub.lock().await;
    if h.active == Some(conn_id) {
        h.active = None;
    }
    info!(conn_id, "viewer disconnected");
    result
}

async fn run_viewer(stream: TcpStream, config: &ServerConfig) -> Result<()> {
    stream.set_nodelay(true)?;
    let pipeline = pipeline_by_name(&config.pipeline_name, config.num_frames)?;
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel::<Message>(OUTBOX_CAPACITY);
    let writer_task = tokio::spawn(write_loop(writer, rx));

    tx.send(Message::ConnectionConfirmed(ConnectionConfirmedPayload {
        confirmed: true,
    }))
    .await?;
    tx.send(Message::PipelineIdentity(PipelineIdentityPayload {
        name: pipeline.name().to_owned(),
    }))
    .await?;

    let shared = Arc::new(Mutex::new(Producer {
        state: ProducerState::default(),
        pipeline,
    }));
    load_clip(&shared, None, &tx).await?;

    let producer_task = tokio::spawn(produce(
        shared.clone(),
        tx.clone(),
        config.state_relief,
        config.buffer_relief,
    ));
    let result = read_loop(reader, &shared, &tx).await;
    producer_task.abort();
    writer_task.abort();
    result
}

/// Load a clip and announce it. Announcements are queued under the lock;
/// no frame of the new clip precedes them.
async fn load_clip(
    shared: &Mutex<Producer>,
    data: Option<&[u8]>,
    tx: &mpsc::Sender<Message>,
) -> Result<()> {
    let mut p = shared.lock().await;
    match p.pipeline.load(data) {
        Ok(num_frames) => {
            p.state = ProducerState::loaded(num_frames);
            info!(
                num_frames,
                pipeline = p.pipeline.name(),
                winding = ?p.pipeline.winding(),
                "clip loaded"
            );
            tx.send(Message::FrameCount(FrameCountPayload { count: num_frames }))
                .await?;
            tx.send(Message::Topology(TopologyPayload {
                triangles: p.pipeline.triangles(),
            }))
            .await?;
            tx.send(Message::StreamUpdateAck(StreamUpdateAckPayload { success: true }))
                .await?;
        }
        Err(err) => {
            warn!(%err, "pipeline failed to load clip");
            p.state = ProducerState::default();
            tx.send(Message::Alert(AlertPayload {
                message: format!("pipeline failed to load stream data: {err}"),
            }))
            .await?;
            tx.send(Message::StreamUpdateAck(StreamUpdateAckPayload { success: false }))
                .await?;
        }
    }
    Ok(())
}

enum Action {
    Relief,
    Send(Message),
    Wait,
}

async fn produce(
    shared: Arc<Mutex<Producer>>,
    tx: mpsc::Sender<Message>,
    state_relief: Duration,
    buffer_relief: Duration,
) {
    loop {
        let action = {
            let mut p = shared.lock().await;
            if p.state.take_relief() {
                Action::Relief
            } else {
                match p.state.next_step() {
                    Step::Produce(index) => match p.pipeline.forward(index) {
                        Ok(positions) => {
                            if (index + 1) % 50 == 0 {
                                debug!(index, num_frames = p.state.num_frames, "produced frame");
                            }
                            Action::Send(Message::FrameVertices(FrameVerticesPayload {
                                positions,
                                index,
                            }))
                        }
                        Err(err) => {
                            warn!(%err, index, "pipeline failed to produce frame");
                            Action::Wait
                        }
                    },
                    Step::Exhausted => {
                        trace!("reached clip end; restarting from cursor");
                        Action::Wait
                    }
                    Step::Idle => Action::Wait,
                }
            }
        };
        match action {
            Action::Relief => sleep(state_relief).await,
            Action::Send(msg) => {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Action::Wait => sleep(buffer_relief).await,
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    shared: &Mutex<Producer>,
    tx: &mpsc::Sender<Message>,
) -> Result<()> {
    let mut read_buf = vec![0u8; 16 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(32 * 1024);
    loop {
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            return Ok(());
        }
        acc.extend_from_slice(&read_buf[..n]);
        while let Some(packet) =
            try_extract_frame(&mut acc, MAX_PAYLOAD_BYTES).context("viewer stream desynchronized")?
        {
            match decode_message(&packet) {
                Ok((msg, _ts, _)) => handle_message(msg, shared, tx).await?,
                Err(err) => warn!(%err, "dropping malformed packet"),
            }
        }
    }
}

async fn handle_message(
    msg: Message,
    shared: &Mutex<Producer>,
    tx: &mpsc::Sender<Message>,
) -> Result<()> {
    match msg {
        Message::BufferState(p) => {
            info!(open = p.open, resume_index = p.resume_index, "viewer buffer state");
            shared.lock().await.state.set_buffer_open(p.open, p.resume_index);
        }
        Message::Reposition(p) => {
            info!(target_index = p.target_index, "viewer repositioned production");
            shared.lock().await.state.reposition(p.target_index);
        }
        Message::StreamUpload(p) => {
            info!(bytes = p.data.len(), "received stream data from viewer");
            load_clip(shared, Some(&p.data), tx).await?;
        }
        Message::HeartbeatPing => tx.send(Message::HeartbeatPong).await?,
        Message::HeartbeatPong => trace!("heartbeat pong"),
        other => warn!(kind = other.type_name(), "unexpected message from viewer"),
    }
    Ok(())
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Message>) {
    let mut ts: u64 = 0;
    while let Some(msg) = rx.recv().await {
        let packet = match encode_message(&msg, ts) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%err, kind = msg.type_name(), "failed to encode outbound message");
                continue;
            }
        };
        ts += 1;
        if writer.write_all(&packet).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use meshcast_proto::{BufferStatePayload, StreamUploadPayload};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn config(num_frames: u64) -> ServerConfig {
        ServerConfig {
            pipeline_name: "pulsing_icosphere".into(),
            num_frames,
            state_relief: Duration::from_millis(5),
            buffer_relief: Duration::from_millis(5),
        }
    }

    async fn start(config: ServerConfig) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, config));
        addr
    }

    struct Viewer {
        stream: TcpStream,
        acc: Vec<u8>,
    }

    impl Viewer {
        async fn connect(addr: SocketAddr) -> Self {
            Self {
                stream: TcpStream::connect(addr).await.unwrap(),
                acc: Vec::new(),
            }
        }

        async fn try_next(&mut self, within: Duration) -> Option<Message> {
            let mut buf = [0u8; 8192];
            loop {
                if let Some(packet) = try_extract_frame(&mut self.acc, MAX_PAYLOAD_BYTES).unwrap() {
                    return Some(decode_message(&packet).unwrap().0);
                }
                match timeout(within, self.stream.read(&mut buf)).await {
                    Ok(Ok(0)) | Err(_) => return None,
                    Ok(n) => self.acc.extend_from_slice(&buf[..n.unwrap()]),
                }
            }
        }

        async fn next(&mut self) -> Message {
            self.try_next(WAIT).await.expect("message before timeout")
        }

        async fn next_frame(&mut self) -> u64 {
            loop {
                if let Message::FrameVertices(f) = self.next().await {
                    return f.index;
                }
            }
        }

        async fn send(&mut self, msg: Message) {
            self.stream
                .write_all(&encode_message(&msg, 0).unwrap())
                .await
                .unwrap();
        }

        async fn greeting(&mut self) -> Vec<&'static str> {
            let mut kinds = Vec::new();
            for _ in 0..5 {
                kinds.push(self.next().await.type_name());
            }
            kinds
        }
    }

    #[tokio::test]
    async fn greets_then_streams_from_zero() {
        let addr = start(config(5)).await;
        let mut viewer = Viewer::connect(addr).await;
        assert_eq!(
            viewer.greeting().await,
            vec![
                "connection_confirmed",
                "pipeline_identity",
                "frame_count",
                "topology",
                "stream_update_ack"
            ]
        );
        let mut indices = Vec::new();
        for _ in 0..5 {
            indices.push(viewer.next_frame().await);
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn second_viewer_is_turned_away() {
        let addr = start(config(5)).await;
        let mut first = Viewer::connect(addr).await;
        assert_eq!(first.next().await.type_name(), "connection_confirmed");

        let mut second = Viewer::connect(addr).await;
        assert_eq!(
            second.next().await,
            Message::Alert(AlertPayload {
                message: SERVER_IN_USE.into()
            })
        );
        assert_eq!(second.try_next(WAIT).await, None);
    }

    #[tokio::test]
    async fn closed_buffer_pauses_and_reopen_resumes_at_index() {
        let addr = start(config(1000)).await;
        let mut viewer = Viewer::connect(addr).await;
        viewer.greeting().await;
        viewer.send(Message::buffer_state(false, 0)).await;
        while viewer.try_next(Duration::from_millis(300)).await.is_some() {}

        viewer
            .send(Message::BufferState(BufferStatePayload {
                open: true,
                resume_index: 500,
            }))
            .await;
        assert_eq!(viewer.next_frame().await, 500);
        assert_eq!(viewer.next_frame().await, 501);
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let addr = start(config(3)).await;
        let mut viewer = Viewer::connect(addr).await;
        viewer.greeting().await;
        viewer.send(Message::HeartbeatPing).await;
        loop {
            if viewer.next().await == Message::HeartbeatPong {
                break;
            }
        }
    }

    #[tokio::test]
    async fn stream_upload_reloads_or_alerts() {
        let addr = start(config(100)).await;
        let mut viewer = Viewer::connect(addr).await;
        viewer.greeting().await;

        viewer
            .send(Message::StreamUpload(StreamUploadPayload {
                data: br#"{"num_frames": 3}"#.to_vec(),
            }))
            .await;
        loop {
            if viewer.next().await == Message::FrameCount(FrameCountPayload { count: 3 }) {
                break;
            }
        }
        assert_eq!(viewer.next().await.type_name(), "topology");
        assert_eq!(
            viewer.next().await,
            Message::StreamUpdateAck(StreamUpdateAckPayload { success: true })
        );

        viewer
            .send(Message::StreamUpload(StreamUploadPayload {
                data: b"garbage".to_vec(),
            }))
            .await;
        loop {
            if let Message::Alert(_) = viewer.next().await {
                break;
            }
        }
        assert_eq!(
            viewer.next().await,
            Message::StreamUpdateAck(StreamUpdateAckPayload { success: false })
        );
    }
}
