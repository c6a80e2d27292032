//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Which side of the TCP pairing dials the other.
///
/// In `Reverse` mode the host listens and the agent dials back; in
/// `Forward` mode the host dials the agent, which must already be
/// listening. `prepare_environment` (which puts the acceptor into
/// listening state for `Reverse`) must complete before the agent starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Reverse,
    Forward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodecKind {
    H264,
    H265,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodecKind {
    Aac,
    Opus,
    Raw,
}

/// How the video elementary stream is chunked on the wire.
///
/// Annex-B delimits NAL units with start codes and lets the parser find
/// boundaries itself; metadata framing wraps each whole NAL in the same
/// 12-byte header shape the audio stream uses, so the parser never has to
/// scan for a start code. Agents vary in which one they emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFraming {
    AnnexB,
    MetadataFramed,
}

/// Per-session configuration, constructed by the caller and passed in.
/// There is no persistence layer inside this core — callers own
/// storing/loading this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub port: u16,
    pub connection_mode: ConnectionMode,
    /// 0 means unlimited (no `--max-size` argument is emitted).
    pub max_size: u32,
    pub bitrate_bps: u32,
    pub max_fps: u32,
    pub show_touches: bool,
    pub turn_screen_off: bool,
    pub stay_awake: bool,
    pub audio_enabled: bool,
    pub video_codec: VideoCodecKind,
    pub video_framing: VideoFraming,
    pub audio_codec: AudioCodecKind,
    pub target_buffering_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: 27183,
            connection_mode: ConnectionMode::Reverse,
            max_size: 0,
            bitrate_bps: 8_000_000,
            max_fps: 60,
            show_touches: false,
            turn_screen_off: false,
            stay_awake: true,
            audio_enabled: true,
            video_codec: VideoCodecKind::H264,
            video_framing: VideoFraming::AnnexB,
            audio_codec: AudioCodecKind::Opus,
            target_buffering_ms: 50,
        }
    }
}

impl SessionConfig {
    /// Pre-flight validation independent of any socket or process: a
    /// malformed config is rejected before anything is touched.
    pub fn validate(&self) -> Result<(), Error> {
        if self.port == 0 {
            return Err(Error::InvalidPort(self.port));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.target_buffering_ms, 50);
        assert_eq!(cfg.connection_mode, ConnectionMode::Reverse);
        assert_eq!(cfg.max_size, 0);
    }

    #[test]
    fn zero_port_is_invalid() {
        let mut cfg = SessionConfig::default();
        cfg.port = 0;
        assert!(cfg.validate().is_err());
    }
}
