//! `VideoDecoder` abstraction and its platform implementations.

use std::time::Instant;

use scrcpy_common::error::Result;

use crate::NalUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4:2:0 biplanar, matches VideoToolbox's preferred output.
    Nv12,
}

/// A decoded image delivered by a `VideoDecoder`. Planes are copied out of
/// whatever platform buffer produced them so the frame is plain, owned,
/// `Send` data by the time it reaches the `FrameBuffer`.
#[derive(Debug, Clone)]
pub struct DecodedVideoFrame {
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
    pub presentation: Instant,
    /// Plane bytes, Y followed by interleaved UV for `Nv12`.
    pub planes: Vec<u8>,
    pub y_stride: u32,
}

pub type FrameHandler = Box<dyn FnMut(DecodedVideoFrame) + Send>;

/// Platform-abstracted hardware (preferred) or software video decoder.
///
/// `initialize_h264`/`initialize_h265` must be called, and succeed, before
/// `decode` accepts VCL NAL units; `is_ready` gates that precondition for
/// callers. `reset` tears the decoder down without destroying the
/// `VideoDecoder` value itself, for reuse across an SPS change
/// (`handle_sps_changed`).
pub trait VideoDecoder: Send {
    fn initialize_h264(&mut self, sps: &[u8], pps: &[u8]) -> Result<()>;
    fn initialize_h265(&mut self, vps: &[u8], sps: &[u8], pps: &[u8]) -> Result<()>;
    fn is_ready(&self) -> bool;
    fn decode(&mut self, nal: &NalUnit) -> Result<()>;
    fn reset(&mut self);
    fn set_frame_handler(&mut self, handler: FrameHandler);
}

#[cfg(target_os = "macos")]
mod mac;
#[cfg(target_os = "macos")]
pub use mac::MacVideoDecoder;

mod software;
pub use software::SoftwareVideoDecoder;
