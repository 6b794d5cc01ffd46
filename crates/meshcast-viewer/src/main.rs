// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! meshcast-viewer: headless playback of a streamed vertex animation.

mod render_port;
mod session_logic;
mod viewer_state;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use meshcast_app_core::config::ConfigService;
use meshcast_app_core::config_port::ConfigPort;
use meshcast_app_core::prefs::ViewerPrefs;
use meshcast_client::{ChannelTransport, HeartbeatConfig, TransportChannel};
use meshcast_config_fs::FsConfigStore;
use meshcast_core::{FrameIndex, StreamSession};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::session_logic::Viewer;

#[derive(Parser, Debug)]
#[command(author, version, about = "meshcast headless viewer")]
struct Args {
    /// Producer address (overrides saved viewer prefs)
    #[arg(long)]
    server: Option<SocketAddr>,
    /// Playback frame rate (clamped to 1..=240)
    #[arg(long)]
    frame_rate: Option<u32>,
    /// Frames to buffer before playback starts
    #[arg(long)]
    min_playable: Option<usize>,
    /// Render tick rate in Hz
    #[arg(long)]
    tick_rate: Option<u32>,
    /// Start playing as soon as frames arrive
    #[arg(long)]
    autoplay: Option<bool>,
    /// Seek to this frame once the clip is loaded
    #[arg(long)]
    seek: Option<FrameIndex>,
    /// Heartbeat idle/timeout window in seconds
    #[arg(long, default_value_t = 60)]
    heartbeat_secs: u64,
    /// Write the effective settings back to the viewer prefs
    #[arg(long)]
    save: bool,
}

impl Args {
    fn apply(&self, prefs: &mut ViewerPrefs) {
        if let Some(addr) = self.server {
            prefs.server_addr = addr;
        }
        if let Some(fps) = self.frame_rate {
            prefs.playback.frame_rate = fps;
        }
        if let Some(frames) = self.min_playable {
            prefs.playback.minimum_playable_frame = frames;
        }
        if let Some(hz) = self.tick_rate {
            prefs.playback.tick_rate_hz = hz;
        }
        if let Some(autoplay) = self.autoplay {
            prefs.autoplay = autoplay;
        }
    }

    fn heartbeat(&self) -> HeartbeatConfig {
        let window = Duration::from_secs(self.heartbeat_secs.max(1));
        HeartbeatConfig {
            idle: window,
            timeout: window,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Config (best-effort)
    let config: Option<ConfigService<FsConfigStore>> =
        FsConfigStore::new().map(ConfigService::new).ok();
    let saved = config.as_ref().and_then(|c| c.load_viewer_prefs());
    let mut prefs = saved.clone().unwrap_or_default();
    args.apply(&mut prefs);
    let settings = prefs
        .playback
        .to_settings()
        .context("invalid playback settings")?;

    if let Some(cfg) = &config {
        if saved.is_none() || args.save {
            cfg.save_viewer_prefs(&prefs);
        }
    } else {
        warn!("no config directory; viewer prefs will not persist");
    }

    let channel = TransportChannel::connect(prefs.server_addr, args.heartbeat())
        .await
        .with_context(|| format!("failed to connect to {}", prefs.server_addr))?;
    info!(server = %prefs.server_addr, "connected to producer");
    let mut transport = ChannelTransport::new();
    transport.set_channel(channel);

    let tick_period = Duration::from_secs(1) / settings.tick_rate_hz();
    let mut viewer = Viewer::new(StreamSession::new(settings), transport, prefs.autoplay);
    if let Some(target) = args.seek {
        viewer.seek_when_ready(target);
    }

    let started = Instant::now();
    let mut ticker = interval(tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                viewer.pump(now_ms);
                if viewer.is_drained() {
                    info!("producer gone and buffer drained");
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
        }
    }

    let stats = viewer.session.stats();
    info!(
        frames_shown = viewer.state.frames_shown,
        uploads = viewer.renderer.uploads,
        accepted = stats.accepted,
        rollbacks = stats.rollbacks,
        waits = stats.waits,
        rejected = stats.rejected,
        malformed = stats.malformed,
        "session summary"
    );
    viewer.shutdown();
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_saved_prefs() {
        let args = Args::parse_from([
            "meshcast-viewer",
            "--frame-rate",
            "24",
            "--min-playable",
            "12",
            "--autoplay",
            "false",
        ]);
        let mut prefs = ViewerPrefs::default();
        args.apply(&mut prefs);
        assert_eq!(prefs.playback.frame_rate, 24);
        assert_eq!(prefs.playback.minimum_playable_frame, 12);
        assert!(!prefs.autoplay);
        assert_eq!(prefs.playback.to_settings().unwrap().frame_rate(), 24);
    }

    #[test]
    fn oversized_minimum_playable_is_rejected() {
        let args = Args::parse_from(["meshcast-viewer", "--min-playable", "100000"]);
        let mut prefs = ViewerPrefs::default();
        args.apply(&mut prefs);
        assert!(prefs.playback.to_settings().is_err());
    }
}
