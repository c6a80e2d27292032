//! AAC decoder backed by `fdk-aac`.
//!
//! The first config packet carries an AudioSpecificConfig; its first two
//! bytes encode audio-object-type, sample-rate-index, and channel-config.
//! Subsequent `decode` calls each push one AAC access unit (~1024 samples).

use fdk_aac::dec::{Decoder as FdkDecoder, DecoderError, Transport};

use scrcpy_common::error::{Error, Result};

use super::{AudioDecoder, AudioFrame, AudioHandler, PcmFormat};

/// Table 1.16 of ISO/IEC 14496-3: `samplingFrequencyIndex` 0..12.
const SAMPLE_RATE_TABLE: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Maximum samples a single AAC frame can decode to (2 channels x 2048,
/// generous upper bound for SBR-doubled frames).
const MAX_DECODED_SAMPLES: usize = 2 * 2048;

pub struct AacAudioDecoder {
    decoder: FdkDecoder,
    format: PcmFormat,
    configured: bool,
    handler: Option<AudioHandler>,
}

struct AudioSpecificConfig {
    sample_rate: u32,
    channels: u8,
}

fn parse_audio_specific_config(bytes: &[u8]) -> Result<AudioSpecificConfig> {
    if bytes.len() < 2 {
        return Err(Error::decode_failed("AudioSpecificConfig shorter than 2 bytes"));
    }
    let byte0 = bytes[0];
    let byte1 = bytes[1];

    let _audio_object_type = byte0 >> 3;
    let sample_rate_index = ((byte0 & 0x07) << 1) | (byte1 >> 7);
    let channel_config = (byte1 >> 3) & 0x0F;

    let sample_rate = *SAMPLE_RATE_TABLE
        .get(sample_rate_index as usize)
        .ok_or_else(|| Error::decode_failed(format!("invalid sample rate index {sample_rate_index}")))?;

    Ok(AudioSpecificConfig {
        sample_rate,
        channels: channel_config,
    })
}

impl AacAudioDecoder {
    pub fn new() -> Self {
        Self {
            decoder: FdkDecoder::new(Transport::Adts),
            format: PcmFormat {
                sample_rate: 48_000,
                channels: 2,
            },
            configured: false,
            handler: None,
        }
    }
}

impl Default for AacAudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDecoder for AacAudioDecoder {
    fn initialize(&mut self, sample_rate: u32, channels: u8) -> Result<()> {
        self.format = PcmFormat {
            sample_rate,
            channels,
        };
        // The real transport format, and therefore the real sample rate
        // and channel count, is only known once the AudioSpecificConfig
        // arrives; this establishes the fallback used until then.
        self.decoder = FdkDecoder::new(Transport::Raw);
        self.configured = false;
        Ok(())
    }

    fn process_config_packet(&mut self, bytes: &[u8]) -> Result<()> {
        let asc = parse_audio_specific_config(bytes)?;
        self.format = PcmFormat {
            sample_rate: asc.sample_rate,
            channels: asc.channels,
        };
        self.decoder
            .fill(bytes)
            .map_err(|e: DecoderError| Error::decode_failed(format!("AAC config fill failed: {e:?}")))?;
        self.configured = true;
        Ok(())
    }

    fn decode(&mut self, payload: &[u8], _pts_us: u64, _is_key: bool) -> Result<()> {
        if !self.configured {
            return Err(Error::decode_failed("AAC decoder missing AudioSpecificConfig"));
        }
        self.decoder
            .fill(payload)
            .map_err(|e: DecoderError| Error::decode_failed(format!("AAC fill failed: {e:?}")))?;

        let mut pcm_i16 = vec![0i16; MAX_DECODED_SAMPLES];
        match self.decoder.decode_frame(&mut pcm_i16) {
            Ok(()) => {}
            Err(DecoderError::NOT_ENOUGH_BITS) => return Ok(()),
            Err(e) => return Err(Error::decode_failed(format!("AAC decode failed: {e:?}"))),
        }

        let stream_info = self.decoder.stream_info();
        let frame_size = (stream_info.frameSize as usize) * (stream_info.numChannels.max(1) as usize);
        let frame_size = frame_size.min(pcm_i16.len());

        let pcm: Vec<f32> = pcm_i16[..frame_size]
            .iter()
            .map(|&s| s as f32 / 32768.0)
            .collect();

        if let Some(handler) = self.handler.as_mut() {
            handler(AudioFrame {
                pcm,
                format: self.format,
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.decoder = FdkDecoder::new(Transport::Raw);
        self.configured = false;
    }

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

    #[test]
    fn parses_48khz_stereo_low_complexity() {
        // audio_object_type=2 (AAC LC), sample_rate_index=3 (48000), channel_config=2.
        let byte0 = (2u8 << 3) | 0b001;
        let byte1 = (1u8 << 7) | (2u8 << 3);
        let asc = parse_audio_specific_config(&[byte0, byte1]).unwrap();
        assert_eq!(asc.sample_rate, 48_000);
        assert_eq!(asc.channels, 2);
    }

    #[test]
    fn rejects_short_config() {
        assert!(parse_audio_specific_config(&[0x12]).is_err());
    }
}
