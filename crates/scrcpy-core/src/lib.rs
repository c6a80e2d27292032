//! Scrcpy wire-protocol pipeline: transport, parsing, decode dispatch,
//! audio/video synchronization, and session lifecycle.
//!
//! Ring buffer and frame handoff primitives sit at the bottom, parsers and
//! decoders above them, the socket/process layer alongside, and
//! `ScrcpySession` tying all of it together.

pub mod acceptor;
pub mod audio_parser;
pub mod audio_sink;
pub mod error_helper;
pub mod frame_buffer;
pub mod frame_pipeline;
pub mod launcher;
pub mod power;
pub mod regulator;
pub mod ring_buffer;
pub mod session;
pub mod synchronizer;
pub mod video_parser;

pub use acceptor::{AcceptorState, SocketAcceptor};
pub use audio_parser::{AudioPacket, AudioStreamParser};
pub use audio_sink::{AudioSink, NullAudioSink};
pub use frame_buffer::FrameBuffer;
pub use frame_pipeline::{immediate_scheduler, FramePipeline, Scheduler};
pub use launcher::{AdbService, ExitEvent, ServerLauncher};
pub use power::PowerCoordinator;
pub use regulator::AudioRegulator;
pub use ring_buffer::RingBuffer;
pub use session::{ScrcpySession, SessionState};
pub use synchronizer::{AudioSynchronizer, SyncDecision, VideoSyncInfo};
pub use video_parser::{VideoFraming, VideoStreamParser};
