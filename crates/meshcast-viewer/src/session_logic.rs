// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-tick glue between the transport, the playback session, and the
//! headless renderer.

use meshcast_client::{TransportEvent, TransportPort};
use meshcast_core::{CommandSink, FrameIndex, Ports, StreamSession, TickOutcome};
use tracing::info;

use crate::render_port::HeadlessRenderer;
use crate::viewer_state::ViewerState;

/// Upper bound on transport events folded into the session per tick.
pub const MAX_EVENTS_PER_TICK: usize = 256;

pub struct Viewer<T> {
    pub session: StreamSession,
    pub transport: T,
    pub renderer: HeadlessRenderer,
    pub state: ViewerState,
    pending_seek: Option<FrameIndex>,
}

impl<T: TransportPort + CommandSink> Viewer<T> {
    pub fn new(session: StreamSession, transport: T, autoplay: bool) -> Self {
        let mut viewer = Self {
            session,
            transport,
            renderer: HeadlessRenderer::default(),
            state: ViewerState::default(),
            pending_seek: None,
        };
        if autoplay {
            let mut ports = Ports::new(
                &mut viewer.transport,
                &mut viewer.renderer,
                &mut viewer.state,
            );
            viewer.session.set_playing(true, &mut ports);
        }
        viewer
    }

    /// Seek to `target` once the clip has been loaded.
    pub fn seek_when_ready(&mut self, target: FrameIndex) {
        self.pending_seek = Some(target);
    }

    /// Fold ready transport events into the session, then run one pacer tick.
    pub fn pump(&mut self, now_ms: u64) -> TickOutcome {
        let events = self.transport.drain_events(MAX_EVENTS_PER_TICK);
        let mut disconnected = false;
        {
            let mut ports = Ports::new(&mut self.transport, &mut self.renderer, &mut self.state);
            for event in events {
                match event {
                    TransportEvent::Message(msg) => {
                        self.session.handle_message(msg, &mut ports);
                    }
                    TransportEvent::Disconnected(reason) => {
                        info!(?reason, "producer connection lost");
                        self.session.on_disconnect(&mut ports);
                        disconnected = true;
                    }
                }
            }
        }
        if disconnected {
            self.transport.detach();
        }

        if self.session.displayed().is_some() && self.session.sync().num_frames > 0 {
            if let Some(target) = self.pending_seek.take() {
                let target = self.session.request_seek(target);
                info!(target, "seeking");
            }
        }

        let mut ports = Ports::new(&mut self.transport, &mut self.renderer, &mut self.state);
        self.session.tick(now_ms, &mut ports)
    }

    /// The producer is gone and every buffered frame has been shown.
    pub fn is_drained(&self) -> bool {
        !self.transport.is_attached() && self.session.buffer().is_empty()
    }

    /// End the session and drop the transport.
    pub fn shutdown(&mut self) {
        let mut ports = Ports::new(&mut self.transport, &mut self.renderer, &mut self.state);
        self.session.end(&mut ports);
        self.transport.detach();
    }
}
