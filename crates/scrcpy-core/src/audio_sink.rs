//! Output side of the audio path: whatever pulls regulated PCM out to a
//! speaker. Kept as a trait so tests and the demo binary can swap in a
//! silent sink without touching the regulator or synchronizer.

use scrcpy_common::error::Result;

use crate::regulator::AudioRegulator;

pub trait AudioSink: Send {
    /// Configures the sink for the decoder's output format. May be called
    /// again if the format changes mid-session (e.g. a codec reconfigure).
    fn configure(&mut self, sample_rate: u32, channels: u16) -> Result<()>;

    /// Pulls `n_samples` frames worth of audio from `regulator` and hands
    /// them to the output device. Called on whatever cadence the sink's
    /// device callback demands.
    fn pull_and_play(&mut self, regulator: &mut AudioRegulator, n_samples: usize) -> Result<()>;

    fn stop(&mut self);
}

/// Discards audio; used by tests and headless runs.
#[derive(Default)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn configure(&mut self, _sample_rate: u32, _channels: u16) -> Result<()> {
        Ok(())
    }

    fn pull_and_play(&mut self, regulator: &mut AudioRegulator, n_samples: usize) -> Result<()> {
        let _ = regulator.pull(n_samples);
        Ok(())
    }

    fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_drains_without_erroring() {
        let mut sink = NullAudioSink;
        let mut reg = AudioRegulator::new(2, 48_000);
        reg.push(&vec![0.5; 9600]);
        sink.configure(48_000, 2).unwrap();
        sink.pull_and_play(&mut reg, 100).unwrap();
    }
}
