//! Pushes the agent artifact, wires port forwarding, and owns the agent
//! process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use scrcpy_common::config::{ConnectionMode, SessionConfig, VideoCodecKind};
use scrcpy_common::error::{Error, Result};

/// Device-management channel: pushing the agent artifact and wiring port
/// forwarding. Deliberately left abstract; this crate only depends on the
/// trait and never shells out to `adb` itself.
#[async_trait]
pub trait AdbService: Send + Sync {
    async fn push(&self, serial: &str, local_path: &str, remote_path: &str) -> Result<()>;
    async fn forward(&self, serial: &str, mode: ConnectionMode, port: u16) -> Result<()>;
    async fn remove_forward(&self, serial: &str, port: u16) -> Result<()>;
    async fn shell_spawn(&self, serial: &str, args: &[String]) -> Result<Child>;
}

#[derive(Debug, Clone, Copy)]
pub enum ExitEvent {
    Normal,
    Abnormal(i32),
}

const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct ServerLauncher {
    adb: Arc<dyn AdbService>,
    serial: String,
    child: Arc<AsyncMutex<Option<Child>>>,
    monitor: Option<JoinHandle<()>>,
}

impl ServerLauncher {
    pub fn new(adb: Arc<dyn AdbService>, serial: impl Into<String>) -> Self {
        Self {
            adb,
            serial: serial.into(),
            child: Arc::new(AsyncMutex::new(None)),
            monitor: None,
        }
    }

    /// Must complete before the first agent-side connection is attempted,
    /// because reverse mode requires the acceptor to already be listening.
    pub async fn prepare_environment(&self, cfg: &SessionConfig) -> Result<()> {
        self.adb
            .push(&self.serial, "scrcpy-server.jar", "/data/local/tmp/scrcpy-server.jar")
            .await?;
        self.adb.forward(&self.serial, cfg.connection_mode, cfg.port).await?;
        Ok(())
    }

    pub fn agent_args(serial: &str, cfg: &SessionConfig) -> Vec<String> {
        let mut args = vec!["-s".to_string(), serial.to_string()];
        if cfg.max_size > 0 {
            args.push(format!("--max-size={}", cfg.max_size));
        }
        args.push(format!("--video-bit-rate={}", cfg.bitrate_bps));
        args.push(format!("--max-fps={}", cfg.max_fps));
        let codec = match cfg.video_codec {
            VideoCodecKind::H264 => "h264",
            VideoCodecKind::H265 => "h265",
        };
        args.push(format!("--video-codec={codec}"));
        args.push("--no-playback".to_string());
        if !cfg.audio_enabled {
            args.push("--no-audio".to_string());
        }
        args.push("--no-control".to_string());
        args.push("--video-source=display".to_string());
        if cfg.stay_awake {
            args.push("--stay-awake".to_string());
        }
        args
    }

    /// Returns once the agent is spawned; the child is owned internally.
    pub async fn start_server(&mut self, cfg: &SessionConfig) -> Result<()> {
        let args = Self::agent_args(&self.serial, cfg);
        let child = self.adb.shell_spawn(&self.serial, &args).await.map_err(Error::agent_start_failed)?;
        *self.child.lock().await = Some(child);
        info!("agent process spawned");
        Ok(())
    }

    /// Polls the owned child for unexpected exit and reports it once via
    /// the returned channel. A clean `stop()` takes the child out from
    /// under the monitor first, so no event fires for expected teardown.
    pub fn spawn_monitor(&mut self) -> tokio::sync::oneshot::Receiver<ExitEvent> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let child = self.child.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(MONITOR_POLL_INTERVAL).await;
                let mut guard = child.lock().await;
                let Some(c) = guard.as_mut() else {
                    return;
                };
                match c.try_wait() {
                    Ok(Some(status)) => {
                        *guard = None;
                        let code = status.code().unwrap_or(-1);
                        let event = if Error::is_normal_exit_code(code) {
                            ExitEvent::Normal
                        } else {
                            ExitEvent::Abnormal(code)
                        };
                        let _ = tx.send(event);
                        return;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("error polling agent process: {e}");
                        return;
                    }
                }
            }
        });
        self.monitor = Some(handle);
        rx
    }

    /// Signals the child, waits for exit, then releases forwarded ports,
    /// in that order.
    pub async fn stop(&mut self, cfg: &SessionConfig) -> Result<()> {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                warn!("failed to signal agent process: {e}");
            }
            match child.wait().await {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    if !Error::is_normal_exit_code(code) {
                        warn!(code, "agent exited abnormally during stop");
                    }
                }
                Err(e) => error!("failed waiting for agent exit: {e}"),
            }
        }
        self.adb.remove_forward(&self.serial, cfg.port).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_args_omit_max_size_when_zero() {
        let mut cfg = SessionConfig::default();
        cfg.max_size = 0;
        let args = ServerLauncher::agent_args("emulator-5554", &cfg);
        assert!(!args.iter().any(|a| a.starts_with("--max-size")));
    }

    #[test]
    fn agent_args_include_max_size_when_set() {
        let mut cfg = SessionConfig::default();
        cfg.max_size = 1280;
        let args = ServerLauncher::agent_args("emulator-5554", &cfg);
        assert!(args.iter().any(|a| a == "--max-size=1280"));
    }

    #[test]
    fn agent_args_substitutes_real_serial() {
        let cfg = SessionConfig::default();
        let args = ServerLauncher::agent_args("emulator-5554", &cfg);
        assert_eq!(args[0], "-s");
        assert_eq!(args[1], "emulator-5554");
    }

    #[test]
    fn agent_args_add_no_audio_when_disabled() {
        let mut cfg = SessionConfig::default();
        cfg.audio_enabled = false;
        let args = ServerLauncher::agent_args("emulator-5554", &cfg);
        assert!(args.iter().any(|a| a == "--no-audio"));
    }
}
