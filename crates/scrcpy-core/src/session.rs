//! Top-level coordinator: owns the parsers, decoders, acceptor, launcher,
//! regulator, synchronizer, and frame pipeline, and drives the session
//! state machine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use scrcpy_codecs::audio::{AacAudioDecoder, AudioDecoder, RawAudioDecoder};
use scrcpy_codecs::video::{SoftwareVideoDecoder, VideoDecoder};
use scrcpy_codecs::{DecodedVideoFrame, Resolution};

use scrcpy_common::config::{AudioCodecKind, SessionConfig, VideoCodecKind};
use scrcpy_common::error::{Error, Result};

use crate::acceptor::SocketAcceptor;
use crate::audio_parser::AudioStreamParser;
use crate::audio_sink::AudioSink;
use crate::frame_pipeline::{FramePipeline, Scheduler};
use crate::launcher::{AdbService, ExitEvent, ServerLauncher};
use crate::power::PowerCoordinator;
use crate::regulator::AudioRegulator;
use crate::synchronizer::AudioSynchronizer;
use crate::video_parser::VideoStreamParser;

const VIDEO_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Capturing,
    Paused,
    Disconnected,
    /// Carries a human-readable description; the originating
    /// `scrcpy_common::Error` is logged at the point of transition.
    Error(String),
}

#[cfg(target_os = "macos")]
fn new_video_decoder(codec: VideoCodecKind) -> Box<dyn VideoDecoder> {
    Box::new(scrcpy_codecs::video::MacVideoDecoder::new(codec))
}

#[cfg(not(target_os = "macos"))]
fn new_video_decoder(_codec: VideoCodecKind) -> Box<dyn VideoDecoder> {
    Box::new(SoftwareVideoDecoder::new())
}

fn new_audio_decoder(codec: AudioCodecKind) -> Box<dyn AudioDecoder> {
    match codec {
        AudioCodecKind::Aac => Box::new(AacAudioDecoder::new()),
        AudioCodecKind::Raw => Box::new(RawAudioDecoder::new()),
        #[cfg(feature = "opus-support")]
        AudioCodecKind::Opus => Box::new(scrcpy_codecs::audio::OpusAudioDecoder::new()),
        #[cfg(not(feature = "opus-support"))]
        AudioCodecKind::Opus => Box::new(RawAudioDecoder::new()),
    }
}

struct Wiring {
    video_parser: Mutex<VideoStreamParser>,
    audio_parser: Mutex<AudioStreamParser>,
    video_decoder: Mutex<Box<dyn VideoDecoder>>,
    audio_decoder: Mutex<Box<dyn AudioDecoder>>,
    regulator: Mutex<AudioRegulator>,
    synchronizer: Mutex<AudioSynchronizer>,
    pipeline: Mutex<FramePipeline>,
    last_resolution: Mutex<Resolution>,
    state: Mutex<SessionState>,
}

pub struct ScrcpySession {
    session_id: String,
    config: SessionConfig,
    power: Arc<PowerCoordinator>,
    launcher: ServerLauncher,
    acceptor: Option<SocketAcceptor>,
    wiring: Arc<Wiring>,
    audio_sink: Box<dyn AudioSink>,
}

impl ScrcpySession {
    pub fn new(
        session_id: impl Into<String>,
        config: SessionConfig,
        adb: Arc<dyn AdbService>,
        serial: impl Into<String>,
        power: Arc<PowerCoordinator>,
        audio_sink: Box<dyn AudioSink>,
        scheduler: Scheduler,
    ) -> Self {
        let video_codec = config.video_codec;
        let video_framing = config.video_framing;
        let audio_codec = config.audio_codec;
        let target_ms = config.target_buffering_ms;
        Self {
            session_id: session_id.into(),
            launcher: ServerLauncher::new(adb, serial),
            config,
            power,
            acceptor: None,
            wiring: Arc::new(Wiring {
                video_parser: Mutex::new(VideoStreamParser::new(video_codec, video_framing)),
                audio_parser: Mutex::new(AudioStreamParser::new()),
                video_decoder: Mutex::new(new_video_decoder(video_codec)),
                audio_decoder: Mutex::new(new_audio_decoder(audio_codec)),
                regulator: Mutex::new(AudioRegulator::with_ms(2, 48_000, target_ms, target_ms * 4, target_ms * 2)),
                synchronizer: Mutex::new(AudioSynchronizer::new()),
                pipeline: Mutex::new(FramePipeline::new(scheduler)),
                last_resolution: Mutex::new(Resolution::DEFAULT),
                state: Mutex::new(SessionState::Idle),
            }),
            audio_sink,
        }
    }

    pub fn state(&self) -> SessionState {
        self.wiring.state.lock().unwrap().clone()
    }

    fn transition(&self, state: SessionState) {
        if let SessionState::Error(ref reason) = state {
            error!(reason, "session entered error state");
        } else {
            info!(?state, "session state transition");
        }
        *self.wiring.state.lock().unwrap() = state;
    }

    /// Resolves tool paths, constructs parsers/decoders (already done at
    /// construction time here), and wires callbacks between them. On
    /// success the session is `Connected`.
    pub fn connect(&mut self) -> Result<()> {
        let current = self.state();
        if !matches!(current, SessionState::Idle | SessionState::Disconnected) {
            return Err(Error::internal(format!("connect() called from {current:?}")));
        }
        self.transition(SessionState::Connecting);

        if let Err(e) = self.config.validate() {
            self.transition(SessionState::Error(e.to_string()));
            return Err(e);
        }

        let wiring = self.wiring.clone();
        self.wiring
            .video_parser
            .lock()
            .unwrap()
            .set_on_sps_changed(Box::new(move |sps| {
                handle_sps_changed(&wiring, sps);
            }));

        let wiring = self.wiring.clone();
        self.wiring
            .audio_decoder
            .lock()
            .unwrap()
            .set_audio_handler(Box::new(move |frame| {
                wiring.regulator.lock().unwrap().push(&frame.pcm);
            }));

        let wiring_config = self.wiring.clone();
        let wiring_packet = self.wiring.clone();
        let mut audio_parser = self.wiring.audio_parser.lock().unwrap();
        audio_parser.set_on_config_packet(Box::new(move |payload, _codec_id| {
            if let Err(e) = wiring_config.audio_decoder.lock().unwrap().process_config_packet(payload) {
                warn!("audio config packet rejected: {e}");
            }
        }));
        audio_parser.set_on_audio_packet(Box::new(move |packet| {
            let mut decoder = wiring_packet.audio_decoder.lock().unwrap();
            if !packet.is_config {
                if let Err(e) = decoder.decode(&packet.payload, packet.pts_us, packet.is_key) {
                    warn!("audio decode failed, dropping packet (best-effort): {e}");
                }
            }
            let format = decoder.output_format();
            drop(decoder);
            let samples_per_channel = packet.payload.len() / (format.channels.max(1) as usize * 2);
            let mut sync = wiring_packet.synchronizer.lock().unwrap();
            let _ = sync.process_audio_pts(packet.pts_us, samples_per_channel as u32, format.sample_rate, std::time::Instant::now());
        }));
        drop(audio_parser);

        self.transition(SessionState::Connected);
        self.power.acquire(&self.session_id);
        Ok(())
    }

    /// `Connected|Paused → Capturing`. State flips to `Capturing` before
    /// the agent is launched so `handle_decoded_frame`'s own `Capturing`
    /// check doesn't drop frames that arrive while the connection is
    /// still being established.
    ///
    /// Resuming from `Paused` skips straight back to dispatching frames:
    /// the acceptor and agent process were never torn down by
    /// `pause_capture`, only the frame pipeline was, so there is nothing
    /// left to relaunch.
    pub async fn start_capture(&mut self) -> Result<()> {
        let current = self.state();
        if current == SessionState::Paused {
            self.transition(SessionState::Capturing);
            self.wiring
                .pipeline
                .lock()
                .unwrap()
                .start((Resolution::DEFAULT.width, Resolution::DEFAULT.height));
            return Ok(());
        }
        if current != SessionState::Connected {
            return Err(Error::internal(format!("start_capture() called from {current:?}")));
        }

        self.launcher.prepare_environment(&self.config).await?;

        let mut acceptor = SocketAcceptor::new(self.config.connection_mode, self.config.port, self.config.audio_enabled);

        let wiring = self.wiring.clone();
        acceptor.set_on_video_data(Box::new(move |bytes| {
            on_video_data(&wiring, bytes);
        }));

        let wiring = self.wiring.clone();
        acceptor.set_on_audio_data(Box::new(move |bytes| {
            on_audio_data(&wiring, bytes);
        }));

        acceptor.start().await?;
        self.acceptor = Some(acceptor);

        self.transition(SessionState::Capturing);

        self.launcher.start_server(&self.config).await?;
        let _exit_rx = self.launcher.spawn_monitor();

        if let Some(acceptor) = self.acceptor.as_ref() {
            acceptor.wait_for_video_connection(VIDEO_CONNECTION_TIMEOUT).await?;
        }

        self.wiring
            .pipeline
            .lock()
            .unwrap()
            .start((Resolution::DEFAULT.width, Resolution::DEFAULT.height));

        Ok(())
    }

    /// `Capturing → Paused`: suspends frame delivery without tearing down
    /// the acceptor or agent process, so `start_capture()` can resume
    /// immediately rather than relaunching.
    pub async fn pause_capture(&mut self) -> Result<()> {
        let current = self.state();
        if current != SessionState::Capturing {
            return Err(Error::internal(format!("pause_capture() called from {current:?}")));
        }
        self.wiring.pipeline.lock().unwrap().stop();
        self.transition(SessionState::Paused);
        Ok(())
    }

    pub async fn stop_capture(&mut self) -> Result<()> {
        if !matches!(self.state(), SessionState::Capturing | SessionState::Paused) {
            return Ok(());
        }
        self.wiring.pipeline.lock().unwrap().stop();
        if let Some(mut acceptor) = self.acceptor.take() {
            acceptor.stop().await;
        }
        self.launcher.stop(&self.config).await?;
        self.wiring.video_parser.lock().unwrap().reset();
        self.wiring.audio_parser.lock().unwrap().reset();
        self.wiring.video_decoder.lock().unwrap().reset();
        self.wiring.audio_decoder.lock().unwrap().reset();
        self.audio_sink.stop();
        self.transition(SessionState::Connected);
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if matches!(self.state(), SessionState::Capturing | SessionState::Paused) {
            let _ = self.stop_capture().await;
        }
        self.power.release(&self.session_id);
        self.transition(SessionState::Disconnected);
        Ok(())
    }

    pub fn frame_skip_count(&self) -> u64 {
        self.wiring.pipeline.lock().unwrap().skipped_count()
    }

    pub fn audio_discontinuities(&self) -> u64 {
        self.wiring.synchronizer.lock().unwrap().discontinuity_count()
    }
}

fn on_video_data(wiring: &Arc<Wiring>, bytes: &[u8]) {
    let units = wiring.video_parser.lock().unwrap().append(bytes);
    for unit in units {
        if unit.kind.is_parameter_set() {
            continue;
        }
        if !unit.kind.is_vcl() {
            continue;
        }
        let mut decoder = wiring.video_decoder.lock().unwrap();
        if !decoder.is_ready() {
            let parser = wiring.video_parser.lock().unwrap();
            if !parser.has_complete_parameter_sets() {
                continue;
            }
            let init_result = match parser.vps() {
                Some(vps) => decoder.initialize_h265(vps, parser.sps().unwrap(), parser.pps().unwrap()),
                None => decoder.initialize_h264(parser.sps().unwrap(), parser.pps().unwrap()),
            };
            drop(parser);
            if let Err(e) = init_result {
                warn!("video decoder initialization failed: {e}");
                continue;
            }
            let wiring_for_frames = wiring.clone();
            decoder.set_frame_handler(Box::new(move |frame| {
                handle_decoded_frame(&wiring_for_frames, frame);
            }));
        }
        if let Err(e) = decoder.decode(&unit) {
            warn!("video decode failed: {e}");
        }
    }
}

fn on_audio_data(wiring: &Arc<Wiring>, bytes: &[u8]) {
    wiring.audio_parser.lock().unwrap().append(bytes);
}

fn handle_sps_changed(wiring: &Arc<Wiring>, _new_sps: &[u8]) {
    warn!("SPS changed, resetting video decoder and purging pre-rotation frames");
    wiring.video_decoder.lock().unwrap().reset();
    let size = {
        let res = *wiring.last_resolution.lock().unwrap();
        (res.width, res.height)
    };
    let mut pipeline = wiring.pipeline.lock().unwrap();
    pipeline.stop();
    pipeline.start(size);
}

fn handle_decoded_frame(wiring: &Arc<Wiring>, frame: DecodedVideoFrame) {
    if !matches!(*wiring.state.lock().unwrap(), SessionState::Capturing) {
        return;
    }
    {
        let mut last = wiring.last_resolution.lock().unwrap();
        if last.width != frame.width || last.height != frame.height {
            info!(width = frame.width, height = frame.height, "video size changed");
            *last = Resolution {
                width: frame.width,
                height: frame.height,
            };
        }
    }
    wiring.pipeline.lock().unwrap().push_frame(frame);
}

/// Reports the fate of the owned agent child process, surfaced by
/// `start_capture`'s caller polling the receiver from `spawn_monitor`.
pub fn classify_exit(event: ExitEvent) -> Option<Error> {
    match event {
        ExitEvent::Normal => None,
        ExitEvent::Abnormal(code) => Some(Error::ProcessTerminated(code)),
    }
}
