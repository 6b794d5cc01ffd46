// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tool-facing transport adapter: a drainable event port plus the core's
//! command sink.
//!
//! Viewers poll [`TransportPort::drain_events`] once per tick and hand the
//! messages to a `StreamSession`; the session's flow-control commands go back
//! out through the same [`ChannelTransport`] without blocking the tick.

use meshcast_core::{Command, CommandSink};
use meshcast_proto::Message;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::{TransportChannel, TransportEvent};

/// Abstract port for receiving transport events.
pub trait TransportPort {
    /// Drain up to `max` ready events without waiting.
    fn drain_events(&mut self, max: usize) -> Vec<TransportEvent>;
    /// Whether a live channel is installed.
    fn is_attached(&self) -> bool;
    /// Drop the channel (closing the connection).
    fn detach(&mut self);
}

/// Channel-backed transport adapter.
#[derive(Default)]
pub struct ChannelTransport {
    channel: Option<TransportChannel>,
}

impl ChannelTransport {
    /// Construct an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a connected channel, replacing any previous one.
    pub fn set_channel(&mut self, channel: TransportChannel) {
        self.channel = Some(channel);
    }

    /// Queue a raw message for the producer. Dropped with a warning when the
    /// outbox is full, closed, or no channel is attached.
    pub fn send_message(&mut self, msg: Message) {
        let Some(channel) = &self.channel else {
            warn!(kind = msg.type_name(), "no transport attached; dropping message");
            return;
        };
        match channel.send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                warn!(kind = msg.type_name(), "transport outbox full; dropping message");
            }
            Err(TrySendError::Closed(msg)) => {
                warn!(kind = msg.type_name(), "transport closed; dropping message");
            }
        }
    }
}

impl TransportPort for ChannelTransport {
    fn drain_events(&mut self, max: usize) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        if let Some(channel) = &mut self.channel {
            for _ in 0..max {
                match channel.try_recv() {
                    Some(event) => out.push(event),
                    None => break,
                }
            }
        }
        out
    }

    fn is_attached(&self) -> bool {
        self.channel.is_some()
    }

    fn detach(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
    }
}

impl CommandSink for ChannelTransport {
    fn send_command(&mut self, command: Command) {
        self.send_message(command.into());
    }
}
