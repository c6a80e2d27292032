//! RAW PCM passthrough decoder: little-endian int16 to interleaved
//! Float32.

use scrcpy_common::error::{Error, Result};

use super::{AudioDecoder, AudioFrame, AudioHandler, PcmFormat};

pub struct RawAudioDecoder {
    format: PcmFormat,
    handler: Option<AudioHandler>,
}

impl RawAudioDecoder {
    pub fn new() -> Self {
        Self {
            format: PcmFormat {
                sample_rate: 48_000,
                channels: 2,
            },
            handler: None,
        }
    }
}

impl Default for RawAudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDecoder for RawAudioDecoder {
    fn initialize(&mut self, sample_rate: u32, channels: u8) -> Result<()> {
        self.format = PcmFormat {
            sample_rate,
            channels,
        };
        Ok(())
    }

    fn process_config_packet(&mut self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, payload: &[u8], _pts_us: u64, _is_key: bool) -> Result<()> {
        let frame_bytes = self.format.channels as usize * 2;
        if frame_bytes == 0 || payload.len() % frame_bytes != 0 {
            return Err(Error::decode_failed(format!(
                "RAW payload length {} is not a multiple of channels*2 ({})",
                payload.len(),
                frame_bytes
            )));
        }
        let pcm: Vec<f32> = payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();
        if let Some(handler) = self.handler.as_mut() {
            handler(AudioFrame {
                pcm,
                format: self.format,
            });
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn output_format(&self) -> PcmFormat {
        self.format
    }

    fn set_audio_handler(&mut self, handler: AudioHandler) {
        self.handler = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn converts_two_int16_samples_to_float() {
        let mut dec = RawAudioDecoder::new();
        dec.initialize(48_000, 2).unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        dec.set_audio_handler(Box::new(move |frame| {
            received_clone.lock().unwrap().extend(frame.pcm);
        }));
        dec.decode(&[0x00, 0x00, 0x40, 0x00], 1000, false).unwrap();
        let pcm = received.lock().unwrap().clone();
        assert_eq!(pcm.len(), 2);
        assert!((pcm[0] - 0.0).abs() < 1e-9);
        assert!((pcm[1] - (0x0040 as f32 / 32768.0)).abs() < 1e-9);
    }

    #[test]
    fn rejects_misaligned_payload() {
        let mut dec = RawAudioDecoder::new();
        dec.initialize(48_000, 2).unwrap();
        assert!(dec.decode(&[0x00, 0x00, 0x00], 0, false).is_err());
    }
}
