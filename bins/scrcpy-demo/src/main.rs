//! Demonstrates `ScrcpySession`'s lifecycle against a loopback TCP pair
//! instead of a real device: a background task plays the part of the
//! agent, dialing back in reverse mode and writing a handful of fabricated
//! video/audio packets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use scrcpy_common::config::{AudioCodecKind, ConnectionMode, SessionConfig, VideoCodecKind};
use scrcpy_common::error::{Error, Result};
use scrcpy_core::{AdbService, PowerCoordinator, ScrcpySession};

struct LoopbackAdb {
    port: u16,
}

#[async_trait]
impl AdbService for LoopbackAdb {
    async fn push(&self, _serial: &str, _local_path: &str, _remote_path: &str) -> Result<()> {
        Ok(())
    }

    async fn forward(&self, _serial: &str, _mode: ConnectionMode, _port: u16) -> Result<()> {
        Ok(())
    }

    async fn remove_forward(&self, _serial: &str, _port: u16) -> Result<()> {
        Ok(())
    }

    /// Real `AdbService` impls exec `adb shell app_process ... scrcpy-server`.
    /// Here we spawn a harmless placeholder process for `ServerLauncher` to
    /// own, and separately kick off a task that plays the agent's wire role.
    async fn shell_spawn(&self, _serial: &str, _args: &[String]) -> Result<Child> {
        tokio::spawn(play_agent(self.port));
        Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::from)
    }
}

fn annex_b(nal: &[u8]) -> Vec<u8> {
    let mut v = vec![0x00, 0x00, 0x00, 0x01];
    v.extend_from_slice(nal);
    v
}

fn audio_packet(pts_us: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&pts_us.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

async fn play_agent(port: u16) {
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut video = match TcpStream::connect(("127.0.0.1", port)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("demo agent could not dial video: {e}");
            return;
        }
    };
    let mut stream = Vec::new();
    stream.extend(annex_b(&[0x67, 0x42, 0x00, 0x1e])); // SPS
    stream.extend(annex_b(&[0x68, 0xce, 0x3c, 0x80])); // PPS
    for i in 0..5u8 {
        stream.extend(annex_b(&[0x65, i, 0x84])); // VCL
    }
    let _ = video.write_all(&stream).await;

    if let Ok(mut audio) = TcpStream::connect(("127.0.0.1", port)).await {
        let mut stream = b"raw\0".to_vec();
        for i in 0..10u64 {
            let samples: Vec<u8> = (0..960 * 2).flat_map(|s| ((s as i16) % 100).to_le_bytes()).collect();
            stream.extend(audio_packet(i * 20_000, &samples));
        }
        let _ = audio.write_all(&stream).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scrcpy_common::init_tracing();

    let mut config = SessionConfig::default();
    config.port = 37183;
    config.connection_mode = ConnectionMode::Reverse;
    config.video_codec = VideoCodecKind::H264;
    config.audio_codec = AudioCodecKind::Raw;

    let adb = Arc::new(LoopbackAdb { port: config.port });
    let power = Arc::new(PowerCoordinator::new());

    let mut session = ScrcpySession::new(
        "demo-session",
        config,
        adb,
        "demo-serial",
        power,
        Box::new(scrcpy_core::NullAudioSink),
        scrcpy_core::immediate_scheduler(),
    );

    session.connect()?;
    session.start_capture().await?;

    tokio::time::sleep(Duration::from_millis(500)).await;

    tracing::info!(
        skipped = session.frame_skip_count(),
        discontinuities = session.audio_discontinuities(),
        "demo session stats"
    );

    session.stop_capture().await?;
    session.disconnect().await?;

    Ok(())
}
