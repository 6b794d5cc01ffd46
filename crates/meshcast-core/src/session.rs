// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One streaming session: owns the buffer, cursor, settings and pacer, and
//! routes inbound messages to them.

use meshcast_proto::Message;
use tracing::{debug, info, trace, warn};

use crate::{
    FlowController, FlowTransition, Frame, FrameBuffer, FrameError, FrameIndex, PacerPhase,
    PlaybackPacer, PlaybackSettings, Ports, Reconciliation, ReconciliationEngine, SourceWinding,
    Stage, StateChange, SyncState, TickOutcome, Topology,
};

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Enqueued at the buffer tail.
    Accepted,
    /// Dropped; producer told to restart at `expected`.
    Rollback {
        /// Index the producer was repositioned to.
        expected: FrameIndex,
    },
    /// Dropped; producer expected to catch up on its own.
    Waiting {
        /// Index the buffer expects next.
        expected: FrameIndex,
        /// How far behind the received frame was.
        gap: u64,
    },
    /// Dropped because the buffer is not admitting frames.
    Rejected,
    /// Dropped because the frame failed validation.
    Malformed(FrameError),
}

impl From<Reconciliation> for FrameDisposition {
    fn from(r: Reconciliation) -> Self {
        match r {
            Reconciliation::Accepted { .. } => Self::Accepted,
            Reconciliation::Rollback { expected, .. } => Self::Rollback { expected },
            Reconciliation::Wait { expected, gap, .. } => Self::Waiting { expected, gap },
        }
    }
}

/// Producer triangles arrive counter-clockwise.
const SOURCE_WINDING: SourceWinding = SourceWinding::CounterClockwise;

/// Running counters for inbound frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames enqueued.
    pub accepted: u64,
    /// Frames that triggered a reposition.
    pub rollbacks: u64,
    /// Frames dropped as slightly stale.
    pub waits: u64,
    /// Frames dropped while the buffer was closed.
    pub rejected: u64,
    /// Frames that failed validation.
    pub malformed: u64,
}

/// Viewer-side state for a single streaming session.
///
/// Inbound messages ([`StreamSession::handle_message`]) and render ticks
/// ([`StreamSession::tick`]) are separate `&mut self` calls and therefore
/// never interleave.
#[derive(Debug, Default)]
pub struct StreamSession {
    buffer: FrameBuffer,
    sync: SyncState,
    settings: PlaybackSettings,
    pacer: PlaybackPacer,
    reconciler: ReconciliationEngine,
    flow: FlowController,
    topology: Option<Topology>,
    vertex_count: Option<usize>,
    pipeline_name: Option<String>,
    connected: bool,
    stats: SessionStats,
}

impl StreamSession {
    /// Fresh session with the given playback settings.
    pub fn new(settings: PlaybackSettings) -> Self {
        Self {
            reconciler: ReconciliationEngine::new(settings.rollback_threshold()),
            settings,
            ..Self::default()
        }
    }

    /// Route one inbound message. Returns the frame outcome for
    /// `frame_vertices`, `None` for everything else.
    pub fn handle_message(
        &mut self,
        msg: Message,
        ports: &mut Ports<'_>,
    ) -> Option<FrameDisposition> {
        let kind = msg.type_name();
        match msg {
            Message::FrameVertices(payload) => return Some(self.on_frame(payload.into(), ports)),
            Message::Topology(payload) => {
                let topology = Topology::from_source(payload.triangles, SOURCE_WINDING);
                info!(triangles = topology.triangles().len(), "topology received");
                ports.mesh.set_topology(&topology.indices());
                self.topology = Some(topology);
                self.vertex_count = None;
            }
            Message::FrameCount(payload) => {
                info!(num_frames = payload.count, "clip length announced");
                self.sync.num_frames = payload.count;
                ports.observer.publish(StateChange::NumFrames(payload.count));
            }
            Message::StreamUpdateAck(payload) => {
                if payload.success {
                    self.reload(ports);
                } else {
                    warn!("producer failed to load stream data");
                    ports
                        .observer
                        .publish(StateChange::Alert("stream data failed to load".into()));
                }
            }
            Message::PipelineIdentity(payload) => {
                info!(pipeline = %payload.name, "producer pipeline");
                ports.observer.publish(StateChange::PipelineName(payload.name.clone()));
                self.pipeline_name = Some(payload.name);
            }
            Message::ConnectionConfirmed(payload) => {
                self.connected = payload.confirmed;
                ports.observer.publish(StateChange::Connected(payload.confirmed));
            }
            Message::PlaybackState(payload) => self.set_playing(payload.playing, ports),
            Message::Alert(payload) => {
                warn!(message = %payload.message, "producer alert");
                ports.observer.publish(StateChange::Alert(payload.message));
            }
            Message::HeartbeatPing | Message::HeartbeatPong => {
                trace!("heartbeat reached session; ignoring");
            }
            Message::BufferState(_) | Message::Reposition(_) | Message::StreamUpload(_) => {
                warn!(kind, "producer-bound message received by viewer; ignoring");
            }
        }
        None
    }

    /// Validate, admit and reconcile one inbound frame.
    pub fn on_frame(&mut self, frame: Frame, ports: &mut Ports<'_>) -> FrameDisposition {
        if let Err(err) = self.validate(&frame) {
            warn!(%err, "dropping malformed frame");
            self.stats.malformed += 1;
            return FrameDisposition::Malformed(err);
        }

        let transition = self.flow.evaluate(&mut self.buffer, &self.sync, ports.commands);
        if let Some(transition) = transition {
            let open = matches!(transition, FlowTransition::Opened { .. });
            ports.observer.publish(StateChange::BufferOpen(open));
        }
        if !self.buffer.is_open() {
            debug!(index = frame.index, "buffer closed; dropping frame");
            self.stats.rejected += 1;
            return FrameDisposition::Rejected;
        }

        let vertex_count = frame.vertex_count();
        let outcome = self
            .reconciler
            .reconcile(frame, &mut self.buffer, &self.sync, ports.commands);
        match outcome {
            Reconciliation::Accepted { .. } => {
                // Only a kept frame fixes the vertex count.
                self.vertex_count.get_or_insert(vertex_count);
                self.stats.accepted += 1;
                ports
                    .observer
                    .publish(StateChange::BufferedCount(self.buffer.len()));
            }
            Reconciliation::Rollback { .. } => self.stats.rollbacks += 1,
            Reconciliation::Wait { .. } => self.stats.waits += 1,
        }
        outcome.into()
    }

    fn validate(&self, frame: &Frame) -> Result<(), FrameError> {
        frame.check_shape()?;
        if let Some(expected) = self.vertex_count {
            if frame.vertex_count() != expected {
                return Err(FrameError::VertexCount {
                    index: frame.index,
                    expected,
                    got: frame.vertex_count(),
                });
            }
        }
        match &self.topology {
            Some(topology) => topology.check_frame(frame),
            None => Ok(()),
        }
    }

    /// Run one render tick at host time `now_ms`.
    pub fn tick(&mut self, now_ms: u64, ports: &mut Ports<'_>) -> TickOutcome {
        let stage = Stage {
            buffer: &mut self.buffer,
            sync: &mut self.sync,
            settings: &self.settings,
            topology: self.topology.as_ref(),
        };
        self.pacer.tick(now_ms, stage, ports)
    }

    /// Schedule a seek to `target` on the next tick. Targets past a known
    /// clip end are clamped to its last frame.
    pub fn request_seek(&mut self, target: FrameIndex) -> FrameIndex {
        let target = if self.sync.clip_known() {
            target.min(self.sync.num_frames - 1)
        } else {
            target
        };
        debug!(target, "seek requested");
        self.pacer.request_seek(target);
        target
    }

    /// Play or pause, publishing the change.
    pub fn set_playing(&mut self, playing: bool, ports: &mut Ports<'_>) {
        if self.pacer.set_playing(playing) {
            info!(playing, "playback state changed");
            ports.observer.publish(StateChange::Playing(playing));
        }
    }

    fn reload(&mut self, ports: &mut Ports<'_>) {
        info!("stream data loaded; restarting from frame 0");
        self.vertex_count = None;
        self.pacer.reset_display(0);
        self.pacer.request_seek(0);
        ports.observer.publish(StateChange::FrameIndex(0));
    }

    /// Transport went away. The buffer is kept; playback freezes once it
    /// drains.
    pub fn on_disconnect(&mut self, ports: &mut Ports<'_>) {
        if self.connected {
            info!(buffered = self.buffer.len(), "transport disconnected");
        }
        self.connected = false;
        ports.observer.publish(StateChange::Connected(false));
    }

    /// Tear the session down: buffer, cursor and pacer state are discarded.
    pub fn end(&mut self, ports: &mut Ports<'_>) {
        info!(stats = ?self.stats, "session ended");
        self.buffer.reset();
        self.sync = SyncState::default();
        self.pacer.clear();
        self.topology = None;
        self.vertex_count = None;
        self.connected = false;
        ports.observer.publish(StateChange::BufferedCount(0));
    }

    /// Frame queue.
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Clip length and head cursor.
    pub fn sync(&self) -> &SyncState {
        &self.sync
    }

    /// Current pacer phase.
    pub fn phase(&self) -> PacerPhase {
        self.pacer.phase()
    }

    /// Whether playback is running.
    pub fn is_playing(&self) -> bool {
        self.pacer.state().is_playing
    }

    /// Last frame index published as displayed.
    pub fn displayed(&self) -> Option<FrameIndex> {
        self.pacer.state().displayed
    }

    /// Session topology, once received.
    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    /// Producer pipeline name, once announced.
    pub fn pipeline_name(&self) -> Option<&str> {
        self.pipeline_name.as_deref()
    }

    /// Whether the producer confirmed this viewer and the link is up.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Inbound frame counters.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}
