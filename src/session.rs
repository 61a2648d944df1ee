//! The per-device lifecycle: attach, read, lose, wait, reattach.
//!
//! Each session owns its device exclusively while attached (the device is
//! grabbed, so no other process sees its events) and owns the bookkeeping
//! for every concurrent command it has started. Device loss cancels and
//! joins those commands before the session goes back to searching.

use std::convert::Infallible;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use evdev::{Device, InputEventKind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::CancellationGroup;
use crate::config::{DeviceConfig, DispatchMode, UnknownKeyPolicy};
use crate::dispatch::{QueueClosed, SerializedDispatcher};
use crate::keymap::{KeyMap, KeyState, KeymapError};
use crate::runner::{self, CommandInvocation};

/// Wakeups bridged from the notify callback thread. Only creation events are
/// forwarded; the session re-derives existence on every wakeup anyway.
type WatchWakeup = Result<(), notify::Error>;

/// Watches a directory for the reappearance of a removed device node.
struct DeviceWatch {
    watcher: RecommendedWatcher,
    wake_rx: mpsc::Receiver<WatchWakeup>,
    dir: PathBuf,
}

impl DeviceWatch {
    fn new(dir: PathBuf) -> Result<Self> {
        let (wake_tx, wake_rx) = mpsc::channel::<WatchWakeup>(16);

        // The callback runs on notify's own thread; try_send is enough
        // because a dropped wakeup implies an earlier one is still pending.
        let watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) if matches!(event.kind, EventKind::Create(_)) => {
                        let _ = wake_tx.try_send(Ok(()));
                    }
                    Ok(_) => {}
                    Err(error) => {
                        let _ = wake_tx.try_send(Err(error));
                    }
                }
            })
            .context("Failed to create device watcher")?;

        Ok(Self {
            watcher,
            wake_rx,
            dir,
        })
    }

    /// Block until `path` exists.
    ///
    /// Existence is checked before the first wait, so a device that appeared
    /// before the watch was registered is never missed; every wakeup
    /// re-derives existence, so spurious or lost creation events cannot
    /// deadlock the search. Stale wakeups are drained afterwards so the next
    /// search cycle starts clean.
    async fn await_path(&mut self, path: &Path) -> Result<()> {
        self.watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", self.dir.display()))?;

        let result = self.wait_for_existence(path).await;

        if let Err(error) = self.watcher.unwatch(&self.dir) {
            debug!(dir = %self.dir.display(), "unwatch failed: {error}");
        }
        while self.wake_rx.try_recv().is_ok() {}

        result
    }

    async fn wait_for_existence(&mut self, path: &Path) -> Result<()> {
        loop {
            match tokio::fs::metadata(path).await {
                Ok(_) => return Ok(()),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    return Err(error)
                        .with_context(|| format!("Failed to stat {}", path.display()));
                }
            }
            match self.wake_rx.recv().await {
                Some(Ok(())) => {}
                Some(Err(error)) => {
                    warn!(dir = %self.dir.display(), "device watch error: {error}");
                }
                None => bail!("device watch channel closed"),
            }
        }
    }
}

/// State machine for one configured device.
pub struct DeviceSession {
    config: DeviceConfig,
    path: PathBuf,
    keymap: Arc<KeyMap>,
    serial: SerializedDispatcher,
}

impl DeviceSession {
    pub fn new(config: DeviceConfig, keymap: Arc<KeyMap>, serial: SerializedDispatcher) -> Self {
        let path = config.device_path();
        Self {
            config,
            path,
            keymap,
            serial,
        }
    }

    /// Drive the attach → read → reattach loop forever.
    ///
    /// Returns only when the watch mechanism cannot be established, when an
    /// `abort`-policy unknown key code is read, or when the command queue
    /// has shut down. Everything else loops back into searching.
    pub async fn run(self) -> Result<()> {
        let watch_dir = self
            .path
            .parent()
            .map(PathBuf::from)
            .with_context(|| format!("device path has no parent: {}", self.path.display()))?;
        let mut watch = DeviceWatch::new(watch_dir)?;

        loop {
            let error = self.attached().await;
            if error.is::<KeymapError>() || error.is::<QueueClosed>() {
                return Err(error);
            }
            warn!(device = %self.path.display(), "lost device: {error:#}");

            watch.await_path(&self.path).await?;
        }
    }

    /// One attached period. Always ends in an error; in-flight concurrent
    /// commands are cancelled and joined before it is returned.
    async fn attached(&self) -> anyhow::Error {
        let group = CancellationGroup::new();
        let error = match self.read_events(&group).await {
            Err(error) => error,
            Ok(infallible) => match infallible {},
        };

        group.cancel_all();
        group.join_all().await;
        error
    }

    async fn read_events(&self, group: &CancellationGroup) -> Result<Infallible> {
        let mut device = Device::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        device
            .grab()
            .with_context(|| format!("Failed to grab {}", self.path.display()))?;
        info!(device = %self.path.display(), "🔌 attached");

        let mut events = device
            .into_event_stream()
            .context("Failed to start event stream")?;

        loop {
            let event = events
                .next_event()
                .await
                .with_context(|| format!("Failed to read from {}", self.path.display()))?;

            let InputEventKind::Key(key) = event.kind() else {
                continue;
            };
            let Some(state) = KeyState::from_value(event.value()) else {
                continue;
            };
            if let Some(invocation) = self.invocation_for(key.code(), state)? {
                self.dispatch(invocation, group).await?;
            }
        }
    }

    /// Translate one key event into the command it should launch, if any.
    fn invocation_for(&self, code: u16, state: KeyState) -> Result<Option<CommandInvocation>> {
        let name = match self.keymap.translate(code) {
            Ok(name) => name,
            Err(error) => match self.config.on_unknown_key {
                UnknownKeyPolicy::Skip => {
                    warn!(device = %self.config.device, code, "skipping untranslatable key");
                    return Ok(None);
                }
                UnknownKeyPolicy::Abort => return Err(error.into()),
            },
        };

        let Some(binding) = self.config.binding(name) else {
            return Ok(None);
        };
        let Some(argv) = binding.argv_for(state) else {
            return Ok(None);
        };

        Ok(Some(CommandInvocation {
            argv: argv.to_vec(),
            timeout: self.config.command_timeout(),
        }))
    }

    async fn dispatch(&self, invocation: CommandInvocation, group: &CancellationGroup) -> Result<()> {
        match self.config.mode {
            DispatchMode::Concurrent => {
                let (signal, guard) = group.register();
                let device = self.config.device.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    if let Err(error) = runner::run(&invocation, Some(signal)).await {
                        warn!(device, "command failed: {error:#}");
                    }
                });
                Ok(())
            }
            DispatchMode::Serialized => Ok(self.serial.dispatch(invocation).await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyBinding;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn session(config: DeviceConfig) -> DeviceSession {
        let keymap = Arc::new(KeyMap::from_entries([(30, "a"), (48, "b")]));
        let (serial, _worker) = SerializedDispatcher::spawn();
        DeviceSession::new(config, keymap, serial)
    }

    fn config_with_binding() -> DeviceConfig {
        let mut keys = HashMap::new();
        keys.insert(
            "a".to_string(),
            KeyBinding {
                down: vec!["true".into()],
                ..KeyBinding::default()
            },
        );
        DeviceConfig {
            device: "/dev/input/event0".into(),
            mode: DispatchMode::Serialized,
            on_unknown_key: UnknownKeyPolicy::Skip,
            command_timeout_ms: None,
            keys,
        }
    }

    #[tokio::test]
    async fn test_bound_transition_produces_an_invocation() {
        let session = session(config_with_binding());
        let invocation = session.invocation_for(30, KeyState::Down).unwrap().unwrap();
        assert_eq!(invocation.argv, vec!["true".to_string()]);
        assert_eq!(invocation.timeout, None);
    }

    #[tokio::test]
    async fn test_unbound_transition_is_silent() {
        let session = session(config_with_binding());
        // "a" has no up/hold commands, "b" has no binding at all.
        assert!(session.invocation_for(30, KeyState::Up).unwrap().is_none());
        assert!(session.invocation_for(30, KeyState::Hold).unwrap().is_none());
        assert!(session.invocation_for(48, KeyState::Down).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_code_is_skipped_by_default() {
        let session = session(config_with_binding());
        assert!(session.invocation_for(999, KeyState::Down).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_code_aborts_when_configured() {
        let mut config = config_with_binding();
        config.on_unknown_key = UnknownKeyPolicy::Abort;
        let session = session(config);

        let error = session.invocation_for(999, KeyState::Down).unwrap_err();
        assert!(error.is::<KeymapError>());
    }

    #[tokio::test]
    async fn test_device_timeout_is_carried_on_invocations() {
        let mut config = config_with_binding();
        config.command_timeout_ms = Some(250);
        let session = session(config);

        let invocation = session.invocation_for(30, KeyState::Down).unwrap().unwrap();
        assert_eq!(invocation.timeout, Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_await_path_returns_immediately_for_existing_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pedal");
        std::fs::write(&path, b"").unwrap();

        let mut watch = DeviceWatch::new(dir.path().to_path_buf()).unwrap();
        timeout(Duration::from_secs(1), watch.await_path(&path))
            .await
            .expect("existing path must not wait for a watch event")
            .unwrap();
    }

    #[tokio::test]
    async fn test_await_path_wakes_when_the_path_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pedal");

        let mut watch = DeviceWatch::new(dir.path().to_path_buf()).unwrap();
        let waiting_for = path.clone();
        let waiter = tokio::spawn(async move {
            watch.await_path(&waiting_for).await.map(|()| watch)
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiter.is_finished(), "must block until the path appears");

        std::fs::write(&path, b"").unwrap();
        let mut watch = timeout(Duration::from_secs(5), waiter)
            .await
            .expect("creation must wake the search")
            .unwrap()
            .unwrap();

        // Wakeups from the creation burst were drained on the way out.
        assert!(watch.wake_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_await_path_fails_when_watch_dir_is_missing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let mut watch = DeviceWatch::new(missing.clone()).unwrap();
        assert!(watch.await_path(&missing.join("pedal")).await.is_err());
    }
}
