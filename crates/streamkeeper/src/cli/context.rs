//! Shared command setup: configuration, capabilities and engine start.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use streamkeeper_sentinel::{
    CommandProbe, Engine, EngineConfig, EngineMode, LiveStatusProbe, StaticProbe,
};
use streamkeeper_worker::{CommandLauncher, HttpObjectSink, MirrorSink, UploadSink};
use tracing::{info, warn};

use super::Cli;

pub struct Context {
    pub config: EngineConfig,
    pub json: bool,
}

impl Context {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = EngineConfig::load(cli.config.as_deref())?;
        if let Some(dir) = &cli.recordings_dir {
            config.recordings_dir = dir.clone();
        }
        if let Some(db) = &cli.database {
            config.database_path = db.clone();
        }
        Ok(Self {
            config,
            json: cli.json,
        })
    }

    pub async fn start_engine(&self, mode: EngineMode) -> Result<Engine> {
        Engine::start_with(
            self.config.clone(),
            Arc::new(CommandLauncher::new()),
            live_probe(&self.config, mode),
            upload_sink(&self.config),
            mode,
        )
        .await
    }
}

/// HTTP object store if an endpoint is set, else a mirror directory, else none.
pub fn upload_sink(config: &EngineConfig) -> Option<Arc<dyn UploadSink>> {
    if let Some(endpoint) = &config.upload.endpoint {
        info!(endpoint = %endpoint, "Uploading to object store");
        return Some(Arc::new(HttpObjectSink::new(
            endpoint.clone(),
            config.upload.bucket.clone(),
            config.upload.token.clone(),
        )));
    }
    if let Some(dir) = &config.upload.mirror_dir {
        info!(dir = %dir.display(), "Mirroring recordings");
        return Some(Arc::new(MirrorSink::new(dir.clone())));
    }
    None
}

pub fn live_probe(config: &EngineConfig, mode: EngineMode) -> Arc<dyn LiveStatusProbe> {
    match &config.probe.command {
        Some(command) => Arc::new(CommandProbe::new(
            command.clone(),
            config.probe.args.clone(),
            Duration::from_secs(config.poll.probe_timeout_secs),
        )),
        None => {
            if mode == EngineMode::Serve {
                warn!("No live-status checker configured (probe.command); watchers will never see a target go live");
            }
            Arc::new(StaticProbe::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_prefers_the_http_endpoint() {
        let mut config = EngineConfig::default();
        assert!(upload_sink(&config).is_none());

        config.upload.mirror_dir = Some("/tmp/mirror".into());
        assert_eq!(upload_sink(&config).unwrap().name(), "mirror");

        config.upload.endpoint = Some("https://objects.example.com".into());
        assert_eq!(upload_sink(&config).unwrap().name(), "http");
    }
}
