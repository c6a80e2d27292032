//! A decoder with no hardware dependency: used on platforms without a
//! VideoToolbox-equivalent binding and in tests, where asserting on actual
//! pixel content is not the point — only that the `VideoDecoder` contract
//! (parameter-set gating, reset-on-SPS-change, one frame out per VCL in)
//! holds.

use std::time::Instant;

use scrcpy_common::error::{Error, Result};

use crate::video::{DecodedVideoFrame, FrameHandler, PixelFormat, VideoDecoder};
use crate::NalUnit;

pub struct SoftwareVideoDecoder {
    ready: bool,
    width: u16,
    height: u16,
    handler: Option<FrameHandler>,
}

impl SoftwareVideoDecoder {
    pub fn new() -> Self {
        Self {
            ready: false,
            width: 0,
            height: 0,
            handler: None,
        }
    }
}

impl Default for SoftwareVideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDecoder for SoftwareVideoDecoder {
    fn initialize_h264(&mut self, sps: &[u8], pps: &[u8]) -> Result<()> {
        if sps.is_empty() || pps.is_empty() {
            return Err(Error::decode_failed("empty SPS or PPS"));
        }
        self.ready = true;
        Ok(())
    }

    fn initialize_h265(&mut self, vps: &[u8], sps: &[u8], pps: &[u8]) -> Result<()> {
        if vps.is_empty() || sps.is_empty() || pps.is_empty() {
            return Err(Error::decode_failed("empty VPS, SPS, or PPS"));
        }
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn decode(&mut self, nal: &NalUnit) -> Result<()> {
        if !self.ready {
            return Err(Error::decode_failed("decoder not initialized"));
        }
        let width = if self.width == 0 { 1080 } else { self.width };
        let height = if self.height == 0 { 1920 } else { self.height };
        let plane_len = (width as usize) * (height as usize) * 3 / 2;
        let frame = DecodedVideoFrame {
            width,
            height,
            format: PixelFormat::Nv12,
            presentation: Instant::now(),
            planes: vec![0u8; plane_len],
            y_stride: width as u32,
        };
        if let Some(handler) = self.handler.as_mut() {
            handler(frame);
        }
        let _ = nal;
        Ok(())
    }

    fn reset(&mut self) {
        self.ready = false;
    }

    fn set_frame_handler(&mut self, handler: FrameHandler) {
        self.handler = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NalKind;

    #[test]
    fn rejects_decode_before_init() {
        let mut dec = SoftwareVideoDecoder::new();
        let nal = NalUnit {
            kind: NalKind::Vcl,
            data: vec![0x65, 0x01],
        };
        assert!(dec.decode(&nal).is_err());
    }

    #[test]
    fn emits_one_frame_per_vcl_once_ready() {
        let mut dec = SoftwareVideoDecoder::new();
        dec.initialize_h264(&[0x67, 0x42], &[0x68, 0x00]).unwrap();
        let count = std::sync::Arc::new(std::sync::Mutex::new(0usize));
        let count_clone = count.clone();
        dec.set_frame_handler(Box::new(move |_frame| {
            *count_clone.lock().unwrap() += 1;
        }));
        let nal = NalUnit {
            kind: NalKind::Vcl,
            data: vec![0x65, 0x01],
        };
        dec.decode(&nal).unwrap();
        dec.decode(&nal).unwrap();
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn reset_requires_reinitialization() {
        let mut dec = SoftwareVideoDecoder::new();
        dec.initialize_h264(&[0x67], &[0x68]).unwrap();
        dec.reset();
        assert!(!dec.is_ready());
    }
}
