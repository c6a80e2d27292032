//! `AudioDecoder` variants: RAW, AAC, OPUS, all normalized to interleaved
//! Float32 PCM.

use scrcpy_common::error::Result;

mod aac;
mod raw;

pub use aac::AacAudioDecoder;
pub use raw::RawAudioDecoder;

#[cfg(feature = "opus-support")]
mod opus_codec;
#[cfg(feature = "opus-support")]
pub use opus_codec::OpusAudioDecoder;

/// 32-bit fourcc identifying the audio codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodecId {
    Opus,
    Aac,
    Flac,
    Raw,
}

impl AudioCodecId {
    /// `id` is the big-endian u32 read from the head of the audio stream.
    pub fn from_fourcc(id: u32) -> Option<Self> {
        match id {
            0x6f70_7573 => Some(AudioCodecId::Opus), // "opus"
            0x6161_6300 => Some(AudioCodecId::Aac),  // "aac\0"
            0x666c_6163 => Some(AudioCodecId::Flac), // "flac"
            0x7261_7700 => Some(AudioCodecId::Raw),  // "raw\0"
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u8,
}

#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved Float32 samples.
    pub pcm: Vec<f32>,
    pub format: PcmFormat,
}

pub type AudioHandler = Box<dyn FnMut(AudioFrame) + Send>;

/// Common surface across RAW/AAC/OPUS decoders.
pub trait AudioDecoder: Send {
    fn initialize(&mut self, sample_rate: u32, channels: u8) -> Result<()>;
    fn process_config_packet(&mut self, bytes: &[u8]) -> Result<()>;
    fn decode(&mut self, payload: &[u8], pts_us: u64, is_key: bool) -> Result<()>;
    fn reset(&mut self);
    fn output_format(&self) -> PcmFormat;
    fn set_audio_handler(&mut self, handler: AudioHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_decoding() {
        assert_eq!(AudioCodecId::from_fourcc(0x6f70_7573), Some(AudioCodecId::Opus));
        assert_eq!(AudioCodecId::from_fourcc(0x6161_6300), Some(AudioCodecId::Aac));
        assert_eq!(AudioCodecId::from_fourcc(0x666c_6163), Some(AudioCodecId::Flac));
        assert_eq!(AudioCodecId::from_fourcc(0x7261_7700), Some(AudioCodecId::Raw));
        assert_eq!(AudioCodecId::from_fourcc(0xdead_beef), None);
    }
}
