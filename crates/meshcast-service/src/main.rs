// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! meshcast producer host: serves one viewer at a time over TCP, streaming
//! vertex frames from a named pipeline under the viewer's flow control.

mod pipeline;
mod server;
mod state;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use meshcast_app_core::config::ConfigService;
use meshcast_app_core::config_port::ConfigPort;
use meshcast_app_core::prefs::HostPrefs;
use meshcast_config_fs::FsConfigStore;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::pipeline::pipeline_by_name;
use crate::server::{serve, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "meshcast frame producer")]
struct Args {
    /// Address to listen on (overrides saved host prefs)
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Pipeline to serve (e.g. pulsing_icosphere)
    #[arg(long)]
    pipeline: Option<String>,
    /// Default clip length for synthetic pipelines
    #[arg(long)]
    frames: Option<u64>,
    /// Pause after a reposition, in milliseconds
    #[arg(long)]
    state_relief_ms: Option<u64>,
    /// Pause between idle steps, in milliseconds
    #[arg(long)]
    buffer_relief_ms: Option<u64>,
    /// Write the effective settings back to the host prefs
    #[arg(long)]
    save: bool,
}

impl Args {
    fn apply(&self, prefs: &mut HostPrefs) {
        if let Some(addr) = self.listen {
            prefs.listen_addr = addr;
        }
        if let Some(name) = &self.pipeline {
            prefs.pipeline_name.clone_from(name);
        }
        if let Some(frames) = self.frames {
            prefs.num_frames = frames;
        }
        if let Some(ms) = self.state_relief_ms {
            prefs.state_relief_ms = ms;
        }
        if let Some(ms) = self.buffer_relief_ms {
            prefs.buffer_relief_ms = ms;
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
    let saved = config.as_ref().and_then(|c| c.load_host_prefs());
    let mut prefs = saved.clone().unwrap_or_default();
    args.apply(&mut prefs);

    if let Some(cfg) = &config {
        if saved.is_none() || args.save {
            cfg.save_host_prefs(&prefs);
        }
    } else {
        warn!("no config directory; host prefs will not persist");
    }

    let preview = pipeline_by_name(&prefs.pipeline_name, prefs.num_frames)?;
    info!(
        pipeline = preview.name(),
        winding = ?preview.winding(),
        num_frames = prefs.num_frames,
        "pipeline ready"
    );
    drop(preview);

    let listener = TcpListener::bind(prefs.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", prefs.listen_addr))?;
    info!("meshcast host listening at {}", listener.local_addr()?);

    tokio::select! {
        res = serve(listener, ServerConfig::from(&prefs)) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_saved_prefs() {
        let args = Args::parse_from([
            "meshcast-service",
            "--listen",
            "0.0.0.0:9000",
            "--frames",
            "30",
        ]);
        let mut prefs = HostPrefs::default();
        args.apply(&mut prefs);
        assert_eq!(prefs.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(prefs.num_frames, 30);
        assert_eq!(prefs.pipeline_name, "pulsing_icosphere");
        assert_eq!(prefs.state_relief_ms, 500);
        assert!(!args.save);
    }
}
