//! OPUS decoder: self-describing from the payload, config packet is
//! informational only.

use opus::{Channels, Decoder as OpusDecoder};

use scrcpy_common::error::{Error, Result};

use super::{AudioDecoder, AudioFrame, AudioHandler, PcmFormat};

/// Largest frame OPUS can produce at 48 kHz (120 ms).
const MAX_FRAME_SAMPLES: usize = 5_760;

pub struct OpusAudioDecoder {
    decoder: Option<OpusDecoder>,
    format: PcmFormat,
    handler: Option<AudioHandler>,
}

impl OpusAudioDecoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            format: PcmFormat {
                sample_rate: 48_000,
                channels: 2,
            },
            handler: None,
        }
    }
}

impl Default for OpusAudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDecoder for OpusAudioDecoder {
    fn initialize(&mut self, sample_rate: u32, channels: u8) -> Result<()> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            _ => Channels::Stereo,
        };
        let decoder = OpusDecoder::new(sample_rate, opus_channels)
            .map_err(|e| Error::decode_failed(format!("opus::Decoder::new failed: {e}")))?;
        self.decoder = Some(decoder);
        self.format = PcmFormat {
            sample_rate,
            channels,
        };
        Ok(())
    }

    fn process_config_packet(&mut self, _bytes: &[u8]) -> Result<()> {
        // Informational only; the decoder is self-describing from
        // subsequent payloads.
        Ok(())
    }

    fn decode(&mut self, payload: &[u8], _pts_us: u64, _is_key: bool) -> Result<()> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::decode_failed("opus decoder not initialized"))?;

        let mut out = vec![0f32; MAX_FRAME_SAMPLES * self.format.channels as usize];
        let decoded = decoder
            .decode_float(payload, &mut out, false)
            .map_err(|e| Error::decode_failed(format!("opus decode failed: {e}")))?;
        out.truncate(decoded * self.format.channels as usize);

        if let Some(handler) = self.handler.as_mut() {
            handler(AudioFrame {
                pcm: out,
                format: self.format,
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        if let Ok(decoder) = OpusDecoder::new(
            self.format.sample_rate,
            if self.format.channels == 1 {
                Channels::Mono
            } else {
                Channels::Stereo
            },
        ) {
            self.decoder = Some(decoder);
        }
    }

    fn output_format(&self) -> PcmFormat {
        self.format
    }

    fn set_audio_handler(&mut self, handler: AudioHandler) {
        self.handler = Some(handler);
    }
}
