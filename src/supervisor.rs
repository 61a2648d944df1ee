//! Owns one session per configured device plus the shared serialized queue.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dispatch::SerializedDispatcher;
use crate::keymap::{KeyMap, KeymapError};
use crate::session::DeviceSession;

pub struct Supervisor {
    config: Config,
    keymap: Arc<KeyMap>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            keymap: Arc::new(KeyMap::default()),
        }
    }

    /// Run every configured device session to completion.
    ///
    /// Sessions never exit voluntarily, so this returns only at the end of
    /// the service's life: an `abort`-policy unknown key escalates
    /// immediately; any other session failure is logged and its siblings
    /// keep running until every last one has died.
    pub async fn run(self) -> Result<()> {
        if self.config.devices.is_empty() {
            warn!("no devices configured, nothing to do");
            return Ok(());
        }

        let (serial, worker) = SerializedDispatcher::spawn();

        let mut sessions = JoinSet::new();
        for device in self.config.devices {
            let identity = device.device.clone();
            let session = DeviceSession::new(device, self.keymap.clone(), serial.clone());
            info!(device = %identity, "starting device session");
            sessions.spawn(async move {
                session
                    .run()
                    .await
                    .with_context(|| format!("device {identity}"))
            });
        }
        // Sessions hold their own queue handles; dropping ours lets the
        // worker drain and exit once the sessions are gone.
        drop(serial);

        let mut result = Ok(());
        while let Some(joined) = sessions.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(session_error)) => {
                    if session_error.is::<KeymapError>() {
                        result = Err(session_error);
                        break;
                    }
                    error!("device session failed: {session_error:#}");
                }
                Err(join_error) => error!("device session panicked: {join_error}"),
            }
        }

        if result.is_ok() && sessions.is_empty() {
            result = Err(anyhow!("all device sessions terminated"));
        }

        drop(sessions);
        let _ = worker.await;
        result
    }
}
