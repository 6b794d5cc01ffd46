// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Keepalive timer as a pure state machine.

use std::time::Duration;
use tokio::time::Instant;

/// Heartbeat timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Inbound silence before a ping is sent.
    pub idle: Duration,
    /// Further silence after the ping before the link is declared dead.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// How often the transport should poll the heartbeat.
    pub fn poll_period(&self) -> Duration {
        (self.idle.min(self.timeout) / 4).max(Duration::from_millis(5))
    }
}

/// Result of [`Heartbeat::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPoll {
    /// Nothing to do.
    Idle,
    /// Idle interval elapsed; send a ping now.
    SendPing,
    /// No traffic within the timeout after the ping; close the link.
    Expired,
}

/// Idle/ping/expire tracker. Any inbound traffic resets it.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_traffic: Instant,
    ping_sent_at: Option<Instant>,
}

impl Heartbeat {
    /// Start tracking as if traffic was seen at `now`.
    pub fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_traffic: now,
            ping_sent_at: None,
        }
    }

    /// Record inbound traffic.
    pub fn on_traffic(&mut self, now: Instant) {
        self.last_traffic = now;
        self.ping_sent_at = None;
    }

    /// Whether a ping is outstanding.
    pub fn awaiting_reply(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// Advance to `now`. Returns `SendPing` once per idle period.
    pub fn poll(&mut self, now: Instant) -> HeartbeatPoll {
        match self.ping_sent_at {
            Some(sent) if now.saturating_duration_since(sent) >= self.config.timeout => {
                HeartbeatPoll::Expired
            }
            Some(_) => HeartbeatPoll::Idle,
            None if now.saturating_duration_since(self.last_traffic) >= self.config.idle => {
                self.ping_sent_at = Some(now);
                HeartbeatPoll::SendPing
            }
            None => HeartbeatPoll::Idle,
        }
    }
}
